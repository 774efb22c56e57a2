//! Traymind runtime wiring.
//!
//! The binary's commands and the end-to-end tests share [`runtime`], which
//! registers every service in one [`ServiceLocator`](traymind_core::ServiceLocator)
//! and brings the event bus and plugins up and down.

pub mod runtime;

pub use runtime::{Runtime, services};
