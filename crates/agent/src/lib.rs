//! Conversation context and the query agent.
//!
//! The agent sits on the event bus and follows a simple cycle:
//!
//! 1. **Receive** `AGENT_EVENT.QUERY_RECEIVED` (text, optionally a screenshot)
//! 2. **Record** it on the active branch of the conversation tree
//! 3. **Select** a role, which supplies the system prompt
//! 4. **Prune** the branch into model context
//! 5. **Stream** the reply from the completion backend back onto the bus
//!
//! Branching lets the user go back to any earlier message and continue
//! from there without losing the other line of conversation.
//!
//! Alongside the agent live the command executor (undoable commands with
//! a bounded history) and error analytics (recurring-error reports).

pub mod agent;
pub mod analytics;
pub mod backend;
pub mod command;
pub mod context;
pub mod role;

pub use agent::{Agent, Screenshot};
pub use analytics::{ErrorAnalytics, ErrorReport};
pub use backend::EchoBackend;
pub use command::{CommandExecutor, CommandHistory};
pub use role::{RoleSelector, SelectedRole};
pub use context::{
    BranchMessage, ContextManager, ContextPruner, ConversationTree, NodeId, PruningStrategy,
};
