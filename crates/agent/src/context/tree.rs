//! Conversation tree: branching message history.
//!
//! Every message is a node whose parent is the message it answered. The
//! *current* node marks the tip of the active branch; adding a message
//! appends a child there. Pointing current back at an older node and adding
//! again starts a sibling branch, leaving the old one intact.
//!
//! Nodes live in an arena (`Vec<Node>`) linked by index, with an id index
//! for lookups. The root is a sentinel system message that never shows up
//! in rendered context.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use traymind_core::message::{Message, MessageContent, Role};
use uuid::Uuid;

/// Content of the sentinel root message.
pub const ROOT_MESSAGE: &str = "Conversation started.";

// ── Data Structures ───────────────────────────────────────────────────────

/// Stable identifier of a conversation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A message on a branch, tagged with the node that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchMessage {
    pub id: NodeId,
    #[serde(flatten)]
    pub message: Message,
}

#[derive(Debug, Clone)]
struct Node {
    id: NodeId,
    message: Message,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Branching conversation history.
#[derive(Debug, Clone)]
pub struct ConversationTree {
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    current: usize,
}

const ROOT: usize = 0;

// ── Implementation ────────────────────────────────────────────────────────

impl ConversationTree {
    pub fn new() -> Self {
        let root = Node {
            id: NodeId::new(),
            message: Message::system(ROOT_MESSAGE),
            parent: None,
            children: Vec::new(),
        };
        let index = HashMap::from([(root.id, ROOT)]);
        info!(root = %root.id, "Conversation tree initialized");
        Self {
            nodes: vec![root],
            index,
            current: ROOT,
        }
    }

    /// Append a message below the current node and make it current.
    pub fn add_message(&mut self, role: Role, content: impl Into<MessageContent>) -> NodeId {
        let id = NodeId::new();
        let slot = self.nodes.len();
        let parent = self.current;

        self.nodes.push(Node {
            id,
            message: Message::new(role, content),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(slot);
        self.index.insert(id, slot);
        self.current = slot;

        debug!(node = %id, parent = %self.nodes[parent].id, "Added message node");
        id
    }

    /// The active branch, oldest first, without the root.
    pub fn get_current_branch(&self) -> Vec<BranchMessage> {
        self.branch_to(self.current)
    }

    /// Make `id` the current node. Returns `false` for an unknown id.
    pub fn switch_to_node(&mut self, id: NodeId) -> bool {
        match self.index.get(&id) {
            Some(&slot) => {
                self.current = slot;
                info!(node = %id, "Switched context to branch");
                true
            }
            None => {
                warn!(node = %id, "Node not found, cannot switch context");
                false
            }
        }
    }

    /// Point current at `id` so the next message opens a new branch there.
    pub fn create_branch_at(&mut self, id: NodeId) -> Option<NodeId> {
        let Some(&slot) = self.index.get(&id) else {
            warn!(node = %id, "Node not found, cannot create branch");
            return None;
        };
        self.current = slot;
        info!(node = %id, "Ready to branch; next message starts a new branch");
        Some(id)
    }

    /// Drop everything and start over with a fresh root.
    pub fn clear(&mut self) {
        *self = Self::new();
        info!("Conversation tree cleared");
    }

    /// Every root-to-leaf path, without the root. Empty for a fresh tree.
    pub fn get_all_branches(&self) -> Vec<Vec<BranchMessage>> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(slot, node)| *slot != ROOT && node.children.is_empty())
            .map(|(slot, _)| self.branch_to(slot))
            .collect()
    }

    pub fn current_node_id(&self) -> NodeId {
        self.nodes[self.current].id
    }

    pub fn root_id(&self) -> NodeId {
        self.nodes[ROOT].id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    /// The message stored at `id`.
    pub fn message(&self, id: NodeId) -> Option<&Message> {
        self.index.get(&id).map(|&slot| &self.nodes[slot].message)
    }

    /// Number of messages, not counting the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn branch_to(&self, slot: usize) -> Vec<BranchMessage> {
        let mut branch = Vec::new();
        let mut cursor = Some(slot);
        while let Some(at) = cursor {
            let node = &self.nodes[at];
            if node.parent.is_none() {
                break;
            }
            branch.push(BranchMessage {
                id: node.id,
                message: node.message.clone(),
            });
            cursor = node.parent;
        }
        branch.reverse();
        branch
    }
}

impl Default for ConversationTree {
    fn default() -> Self {
        Self::new()
    }
}
