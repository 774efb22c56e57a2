//! Error types for the Traymind runtime.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each subsystem has its own error enum; [`Error`] aggregates them.

use thiserror::Error;

/// The top-level error type for all Traymind operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Service resolution ---
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    // --- Plugins ---
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    // --- Completion backend ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Commands ---
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Subsystem errors ---

/// Failures raised by the [`ServiceLocator`](crate::service::ServiceLocator).
///
/// These indicate wiring mistakes and are meant to fail fast at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Service '{0}' not found")]
    NotFound(String),

    #[error("Cannot resolve dependency '{dependency}' for service '{service}'")]
    MissingDependency { dependency: String, service: String },

    #[error("Cyclic dependency detected: {}", chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("Service '{service}' is not of type {expected}")]
    TypeMismatch { service: String, expected: &'static str },

    #[error("Failed to construct service '{service}': {reason}")]
    Construction { service: String, reason: String },
}

/// Failures around plugin discovery, loading and execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("Plugin '{0}' is not discovered.")]
    NotDiscovered(String),

    #[error("Plugin '{0}' is disabled in configuration.")]
    Disabled(String),

    #[error("Plugin '{plugin_id}' failed to load: {reason}")]
    Load { plugin_id: String, reason: String },

    #[error("Failed to read plugin metadata from {source_path}: {reason}")]
    Metadata { source_path: String, reason: String },

    #[error("Plugin '{plugin_id}' failed during {hook}: {reason}")]
    Execution {
        plugin_id: String,
        hook: String,
        reason: String,
    },
}

/// Failures from a completion backend (the LLM boundary).
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),
}

/// Failures raised while running or undoing a command.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command '{command}' failed: {reason}")]
    Failed { command: String, reason: String },

    #[error("Command '{command}' cannot be undone: {reason}")]
    Undo { command: String, reason: String },

    #[error("Command '{0}' panicked")]
    Panicked(String),
}

/// An error returned by an event listener.
///
/// The dispatcher catches these per listener; they never reach the
/// publisher or sibling listeners.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<PluginError> for ListenerError {
    fn from(err: PluginError) -> Self {
        Self(err.to_string())
    }
}

impl From<BackendError> for ListenerError {
    fn from(err: BackendError) -> Self {
        Self(err.to_string())
    }
}

impl From<serde_json::Error> for ListenerError {
    fn from(err: serde_json::Error) -> Self {
        Self(format!("invalid event payload: {err}"))
    }
}
