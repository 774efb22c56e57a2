//! Conversation context: branching history and read-time pruning.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`ConversationTree`] | Arena of message nodes; the current node marks the active branch |
//! | [`ContextPruner`] | Eviction policy applied when context is read (FIFO) |
//! | [`ContextManager`] | Shared service wrapping both, announcing branch moves |

pub mod manager;
pub mod pruner;
pub mod tree;

pub use manager::ContextManager;
pub use pruner::{ContextPruner, PruningStrategy};
pub use tree::{BranchMessage, ConversationTree, NodeId, ROOT_MESSAGE};
