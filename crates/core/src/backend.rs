//! CompletionBackend trait: the abstraction over the LLM API wrapper.
//!
//! The agent hands a pruned context to a backend and receives the reply as
//! a stream of text deltas. Retry and fallback between models belong to
//! the implementation, not to the agent.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::message::Message;

/// Receiving half of a streamed completion.
pub type ChunkStream = mpsc::Receiver<Result<String, BackendError>>;

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// A human-readable name (e.g. "openrouter", "echo").
    fn name(&self) -> &str;

    /// Send the conversation and get the full reply.
    async fn complete(&self, messages: &[Message]) -> Result<String, BackendError>;

    /// Send the conversation and get a stream of reply deltas.
    ///
    /// Default implementation calls `complete()` and yields it as one chunk.
    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream, BackendError> {
        let response = self.complete(messages).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(response)).await;
        Ok(rx)
    }
}
