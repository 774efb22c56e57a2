//! # Traymind Core
//!
//! The event-driven runtime shared by every Traymind crate: the priority
//! event bus, the service locator, and the traits plugins and completion
//! backends implement against.
//!
//! ## Design Philosophy
//!
//! Components never call each other directly. They publish onto the
//! [`EventDispatcher`] and react to what others publish, and they obtain
//! their collaborators from the [`ServiceLocator`]. Implementations live in
//! their own crates; everything depends inward on core.

pub mod backend;
pub mod command;
pub mod error;
pub mod event;
pub mod message;
pub mod plugin;
pub mod service;

// Re-export key types at crate root for ergonomics
pub use backend::{ChunkStream, CompletionBackend};
pub use command::Command;
pub use error::{
    BackendError, CommandError, Error, ListenerError, PluginError, Result, ServiceError,
};
pub use event::{
    DispatcherOptions, Event, EventDispatcher, EventPriorities, Listener, ListenerResult, Payload,
    topics,
};
pub use message::{ContentPart, Message, MessageContent, Role};
pub use plugin::{Plugin, PluginContext, PluginFactory, PluginMetadata, ResourceTracker};
pub use service::{Dependencies, Dependency, Lifetime, ServiceFactory, ServiceLocator};
