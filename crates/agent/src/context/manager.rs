//! Context manager: the conversation tree as a shared service.
//!
//! Wraps a [`ConversationTree`] and a [`ContextPruner`] behind mutexes so
//! the agent, the front end and plugins can all reach the same history.
//! Branch moves are announced on the bus; pruning settings follow
//! `UI_EVENT.SETTINGS_CHANGED`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{info, warn};
use traymind_config::ConfigStore;
use traymind_core::event::{EventDispatcher, Listener, Payload, topics};
use traymind_core::message::{Message, MessageContent, Role};

use super::pruner::ContextPruner;
use super::tree::{BranchMessage, ConversationTree, NodeId};

pub struct ContextManager {
    tree: Mutex<ConversationTree>,
    pruner: Mutex<ContextPruner>,
    events: Arc<EventDispatcher>,
    config: Arc<ConfigStore>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ContextManager {
    /// Build the manager and subscribe it to settings changes.
    pub fn new(events: Arc<EventDispatcher>, config: Arc<ConfigStore>) -> Arc<Self> {
        let settings = config.get().context;
        let manager = Arc::new(Self {
            tree: Mutex::new(ConversationTree::new()),
            pruner: Mutex::new(ContextPruner::new(&settings)),
            events: Arc::clone(&events),
            config,
        });
        info!(max_messages = settings.max_messages, "Context manager settings loaded");

        let weak: Weak<Self> = Arc::downgrade(&manager);
        events.subscribe(
            topics::SETTINGS_CHANGED,
            Listener::sync(move |_| {
                if let Some(manager) = weak.upgrade() {
                    manager.reload_settings();
                }
                Ok(())
            }),
        );
        manager
    }

    /// Re-read pruning settings from the config store.
    pub fn reload_settings(&self) {
        let settings = self.config.get().context;
        lock(&self.pruner).update_config(&settings);
        info!(max_messages = settings.max_messages, "Context manager settings reloaded");
    }

    /// Append to the active branch. Unknown roles are stored as `user`.
    pub fn add_message(&self, role: &str, content: impl Into<MessageContent>) -> NodeId {
        let role = role.parse::<Role>().unwrap_or_else(|_| {
            warn!(role = %role, "Invalid message role, defaulting to 'user'");
            Role::User
        });
        self.add(role, content)
    }

    pub fn add(&self, role: Role, content: impl Into<MessageContent>) -> NodeId {
        lock(&self.tree).add_message(role, content)
    }

    /// The active branch after pruning, ready for the model.
    pub fn get_context(&self) -> Vec<Message> {
        let branch = lock(&self.tree).get_current_branch();
        let messages = branch.into_iter().map(|m| m.message).collect();
        lock(&self.pruner).prune(messages)
    }

    /// The whole active branch, unpruned, with node ids.
    pub fn get_full_history(&self) -> Vec<BranchMessage> {
        lock(&self.tree).get_current_branch()
    }

    pub fn clear(&self) {
        lock(&self.tree).clear();
        info!("Conversation history cleared");
    }

    /// Branch from `id`: the next message becomes a sibling of its children.
    pub fn create_branch_at(&self, id: NodeId) -> bool {
        let moved = lock(&self.tree).create_branch_at(id);
        match moved {
            Some(current) => {
                self.announce_branch(current);
                true
            }
            None => false,
        }
    }

    pub fn switch_to_branch(&self, id: NodeId) -> bool {
        let switched = lock(&self.tree).switch_to_node(id);
        if switched {
            self.announce_branch(id);
        }
        switched
    }

    pub fn get_branches(&self) -> Vec<Vec<BranchMessage>> {
        lock(&self.tree).get_all_branches()
    }

    pub fn current_node_id(&self) -> NodeId {
        lock(&self.tree).current_node_id()
    }

    /// Number of stored messages across all branches.
    pub fn len(&self) -> usize {
        lock(&self.tree).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn announce_branch(&self, current: NodeId) {
        self.events.publish(
            topics::BRANCH_CHANGED,
            Payload::new().kwarg("current_node_id", current.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use traymind_config::{AppConfig, ConfigStore};
    use traymind_core::event::Event;

    fn manager_with(max_messages: usize) -> (Arc<ContextManager>, Arc<EventDispatcher>, Arc<ConfigStore>) {
        let mut config = AppConfig::default();
        config.context.max_messages = max_messages;
        let store = Arc::new(ConfigStore::in_memory(config));
        let events = Arc::new(EventDispatcher::default());
        let manager = ContextManager::new(Arc::clone(&events), Arc::clone(&store));
        (manager, events, store)
    }

    fn capture(events: &EventDispatcher, event_type: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        events.subscribe(
            event_type,
            Listener::sync(move |event| {
                let _ = tx.send(event.clone());
                Ok(())
            }),
        );
        rx
    }

    #[test]
    fn unknown_role_is_coerced_to_user() {
        let (manager, _, _) = manager_with(50);
        manager.add_message("narrator", "once upon a time");
        manager.add_message("assistant", "and then");
        let context = manager.get_context();
        assert_eq!(context[0].role, Role::User);
        assert_eq!(context[1].role, Role::Assistant);
    }

    #[test]
    fn context_is_pruned_but_history_is_not() {
        let (manager, _, _) = manager_with(3);
        for i in 1..=4 {
            manager.add_message("user", format!("m{i}"));
        }
        let context: Vec<String> = manager.get_context().iter().map(|m| m.content.text()).collect();
        assert_eq!(context, vec!["m2", "m3", "m4"]);
        assert_eq!(manager.get_full_history().len(), 4);
    }

    #[test]
    fn clear_empties_history() {
        let (manager, _, _) = manager_with(50);
        manager.add_message("user", "hello");
        manager.clear();
        assert!(manager.is_empty());
        assert!(manager.get_context().is_empty());
    }

    #[tokio::test]
    async fn branch_moves_are_announced() {
        let (manager, events, _) = manager_with(50);
        let mut changed = capture(&events, topics::BRANCH_CHANGED);
        events.start().unwrap();

        let a = manager.add_message("user", "A");
        manager.add_message("assistant", "B");
        assert!(manager.create_branch_at(a));

        let event = tokio::time::timeout(Duration::from_secs(2), changed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.payload.str("current_node_id"), Some(a.to_string().as_str()));

        manager.add_message("user", "C");
        assert_eq!(manager.get_branches().len(), 2);
        events.stop().await;
    }

    #[tokio::test]
    async fn failed_branch_move_is_silent() {
        let (manager, events, _) = manager_with(50);
        let stranger: NodeId = "00000000-0000-4000-8000-000000000000".parse().unwrap();
        assert!(!manager.switch_to_branch(stranger));
        assert!(!manager.create_branch_at(stranger));
        assert_eq!(events.pending(), 0);
    }

    #[tokio::test]
    async fn settings_change_reloads_pruner() {
        let (manager, events, store) = manager_with(50);
        let mut changed = capture(&events, topics::SETTINGS_CHANGED);
        events.start().unwrap();

        for i in 1..=3 {
            manager.add_message("user", format!("m{i}"));
        }
        store.update(|c| c.context.max_messages = 1).unwrap();
        events.publish(topics::SETTINGS_CHANGED, Payload::new());

        tokio::time::timeout(Duration::from_secs(2), changed.recv())
            .await
            .unwrap()
            .unwrap();
        let context = manager.get_context();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content.text(), "m3");
        events.stop().await;
    }
}
