//! Command trait: a reversible unit of work run by the command executor.
//!
//! Commands are executed once and, when that succeeds, kept in a bounded
//! history so the most recent ones can be undone in reverse order.

use async_trait::async_trait;

use crate::error::CommandError;

#[async_trait]
pub trait Command: Send + Sync {
    /// A short name for logs and errors (e.g. "open_url").
    fn name(&self) -> &str;

    /// Perform the command and return its output.
    async fn execute(&mut self) -> Result<String, CommandError>;

    /// Reverse the effects of `execute`.
    async fn undo(&mut self) -> Result<(), CommandError>;
}
