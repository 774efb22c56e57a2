//! Offline completion backend.
//!
//! Echoes the latest user message back, streamed word by word. It keeps the
//! runtime usable without network access or API keys.

use async_trait::async_trait;
use tokio::sync::mpsc;
use traymind_core::backend::{ChunkStream, CompletionBackend};
use traymind_core::error::BackendError;
use traymind_core::message::{Message, Role};

#[derive(Debug, Clone)]
pub struct EchoBackend {
    prefix: String,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self {
            prefix: "You said: ".into(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn reply_to(&self, messages: &[Message]) -> Result<String, BackendError> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or_else(|| BackendError::RequestFailed("no user message in context".into()))?;

        let mut reply = format!("{}{}", self.prefix, last.content.text());
        if last.content.has_image() {
            reply.push_str(" [with screenshot]");
        }
        Ok(reply)
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, BackendError> {
        self.reply_to(messages)
    }

    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream, BackendError> {
        let reply = self.reply_to(messages)?;
        let chunks: Vec<&str> = reply.split_inclusive(' ').collect();
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk.
            let _ = tx.try_send(Ok(chunk.to_string()));
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_last_user_message() {
        let backend = EchoBackend::new();
        let reply = backend
            .complete(&[Message::user("first"), Message::assistant("ok"), Message::user("second")])
            .await
            .unwrap();
        assert_eq!(reply, "You said: second");
    }

    #[tokio::test]
    async fn stream_reassembles_to_reply() {
        let backend = EchoBackend::with_prefix("> ");
        let mut rx = backend.stream(&[Message::user("hello there world")]).await.unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), "> hello there world");
    }

    #[tokio::test]
    async fn empty_context_fails() {
        let err = EchoBackend::new().complete(&[]).await.unwrap_err();
        assert!(matches!(err, BackendError::RequestFailed(_)));
    }
}
