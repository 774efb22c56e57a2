//! The query agent.
//!
//! Turns `AGENT_EVENT.QUERY_RECEIVED` into a streamed model reply:
//!
//! 1. **Record** the query as a user message (multimodal if a screenshot is attached)
//! 2. **Select a role** for the conversation and announce it as `API_EVENT.ROLE_SELECTED`
//! 3. **Read context** from the context manager (pruned active branch)
//! 4. **Stream** the reply through the completion backend, one `RESPONSE_CHUNK` per delta,
//!    with the role's system prompt as the first message
//! 5. **Record** the full reply and publish `REQUEST_COMPLETE`

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, info, warn};
use traymind_core::backend::CompletionBackend;
use traymind_core::error::{BackendError, ListenerError};
use traymind_core::event::{Event, EventDispatcher, Listener, ListenerResult, Payload, topics};
use traymind_core::message::{DEFAULT_IMAGE_MIME, Message, MessageContent, Role};

use crate::context::ContextManager;
use crate::role::RoleSelector;

/// Screenshot format the agent understands.
pub const IMAGE_FORMAT_BASE64: &str = "base64";

/// A base64 image waiting to be sent with a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Screenshot {
    pub data: String,
    pub mime_type: String,
}

impl Screenshot {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    fn from_payload(payload: &Payload, data_key: &str, mime_key: &str) -> Option<Self> {
        let data = payload.str(data_key)?;
        Some(Self::new(data, payload.str(mime_key).unwrap_or(DEFAULT_IMAGE_MIME)))
    }
}

pub struct Agent {
    /// Event bus
    events: Arc<EventDispatcher>,

    /// Conversation history
    context: Arc<ContextManager>,

    roles: Arc<RoleSelector>,

    /// The model boundary
    backend: Arc<dyn CompletionBackend>,

    /// Role of the running conversation
    current_role: Mutex<Option<String>>,

    /// Screenshot waiting to be attached to the next query
    pending_image: Mutex<Option<Screenshot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Agent {
    /// Build the agent and subscribe it to its events.
    pub fn new(
        events: Arc<EventDispatcher>,
        context: Arc<ContextManager>,
        roles: Arc<RoleSelector>,
        backend: Arc<dyn CompletionBackend>,
    ) -> Arc<Self> {
        let agent = Arc::new(Self {
            events: Arc::clone(&events),
            context,
            roles,
            backend,
            current_role: Mutex::new(None),
            pending_image: Mutex::new(None),
        });

        let weak = Arc::downgrade(&agent);
        events.subscribe(
            topics::QUERY_RECEIVED,
            on_event(&weak, |agent, event| async move {
                let user_message = event.payload.require_str("user_message")?.to_string();
                let image = Screenshot::from_payload(&event.payload, "image_data", "image_mime_type");
                agent.process_query(&user_message, image).await;
                Ok::<_, ListenerError>(())
            }),
        );
        events.subscribe(
            topics::CLEAR_CONTEXT,
            on_event(&weak, |agent, _| async move {
                agent.clear();
                Ok::<_, ListenerError>(())
            }),
        );
        events.subscribe(
            topics::SCREEN_CAPTURED,
            on_event(&weak, |agent, event| async move {
                let image = event.payload.require_str("image_data")?;
                let format = event.payload.str("format").unwrap_or_default();
                let mime_type = event.payload.str("mime_type").unwrap_or(DEFAULT_IMAGE_MIME);
                agent.accept_screenshot(image, format, mime_type);
                Ok::<_, ListenerError>(())
            }),
        );

        info!(backend = agent.backend.name(), "Agent ready");
        agent
    }

    /// Store a screenshot for the next query. Only base64 is accepted.
    pub fn accept_screenshot(&self, image_data: &str, format: &str, mime_type: &str) {
        if format != IMAGE_FORMAT_BASE64 {
            warn!(format = %format, "Ignoring screen capture in unknown format");
            return;
        }
        info!(bytes = image_data.len(), mime_type = %mime_type, "Screen capture stored for next query");
        *lock(&self.pending_image) = Some(Screenshot::new(image_data, mime_type));
    }

    pub fn has_pending_image(&self) -> bool {
        lock(&self.pending_image).is_some()
    }

    /// The role chosen for the running conversation.
    pub fn current_role(&self) -> Option<String> {
        lock(&self.current_role).clone()
    }

    /// Forget the conversation, its role and any pending screenshot.
    pub fn clear(&self) {
        self.context.clear();
        lock(&self.current_role).take();
        lock(&self.pending_image).take();
        info!("Agent context cleared");
    }

    /// Run one query through the backend, reporting progress on the bus.
    pub async fn process_query(&self, user_message: &str, image: Option<Screenshot>) {
        let preview: String = user_message.chars().take(50).collect();
        info!(query = %preview, "Processing query");

        // An explicit image wins, but the pending one is consumed either way.
        let pending = lock(&self.pending_image).take();
        let image = image.or(pending);

        let content = match &image {
            Some(shot) => {
                debug!(mime_type = %shot.mime_type, "Query includes image data, formatting as multimodal");
                MessageContent::with_image(user_message, &shot.mime_type, &shot.data)
            }
            None => MessageContent::from(user_message),
        };
        self.context.add(Role::User, content);

        let system_prompt = self.select_role(user_message);

        match self.stream_reply(system_prompt).await {
            Ok(full_response) => {
                self.context.add(Role::Assistant, full_response.as_str());
                info!(chars = full_response.len(), "Full response generated");
                self.events.publish(
                    topics::REQUEST_COMPLETE,
                    Payload::new().kwarg("full_response", full_response),
                );
            }
            Err(e) => {
                error!(backend = self.backend.name(), error = %e, "Query failed");
                self.events.publish(
                    topics::API_FAILURE,
                    Payload::new()
                        .kwarg("backend", self.backend.name())
                        .kwarg("error", e.to_string()),
                );
                self.events.publish(
                    topics::REQUEST_COMPLETE,
                    Payload::new().kwarg("full_response", format!("An internal error occurred: {e}")),
                );
                self.events.publish(
                    topics::NOTIFY_ERROR,
                    Payload::new()
                        .kwarg("title", "Agent Error")
                        .kwarg("message", e.to_string()),
                );
            }
        }
    }

    /// Choose (or keep) the conversation's role; returns its system prompt.
    fn select_role(&self, user_message: &str) -> Option<String> {
        let mut current = lock(&self.current_role);
        let role = self.roles.select(user_message, current.as_deref())?;
        *current = Some(role.id.clone());
        drop(current);

        self.events
            .publish(topics::ROLE_SELECTED, Payload::new().kwarg("role_id", role.id));
        Some(role.system_prompt).filter(|prompt| !prompt.is_empty())
    }

    async fn stream_reply(&self, system_prompt: Option<String>) -> Result<String, BackendError> {
        let mut messages = self.context.get_context();
        if let Some(prompt) = system_prompt {
            messages.insert(0, Message::system(prompt));
        }
        let mut stream = self.backend.stream(&messages).await?;

        let mut full_response = String::new();
        while let Some(chunk) = stream.recv().await {
            let chunk = chunk?;
            full_response.push_str(&chunk);
            self.events
                .publish(topics::RESPONSE_CHUNK, Payload::new().kwarg("chunk", chunk));
        }
        Ok(full_response)
    }
}

/// An async listener that forwards to the agent while it is alive.
fn on_event<F, Fut>(agent: &Weak<Agent>, handler: F) -> Listener
where
    F: Fn(Arc<Agent>, Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ListenerResult> + Send + 'static,
{
    let agent = agent.clone();
    let handler = Arc::new(handler);
    Listener::asynchronous(move |event| {
        let agent = agent.upgrade();
        let handler = Arc::clone(&handler);
        async move {
            match agent {
                Some(agent) => handler(agent, event).await,
                None => Ok(()),
            }
        }
    })
}
