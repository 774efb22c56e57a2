//! Context pruning: what part of a branch is sent to the model.
//!
//! Pruning happens when context is read; the tree itself is never trimmed.

use tracing::{debug, info, warn};
use traymind_config::ContextConfig;

/// Eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningStrategy {
    /// Keep the most recent `max_messages`.
    Fifo,
}

impl PruningStrategy {
    /// Parse a configured name; unknown names fall back to FIFO.
    pub fn from_name(name: &str) -> Self {
        match name {
            "fifo" => PruningStrategy::Fifo,
            other => {
                warn!(strategy = %other, "Unknown pruning strategy, defaulting to 'fifo'");
                PruningStrategy::Fifo
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextPruner {
    strategy: PruningStrategy,
    max_messages: usize,
}

impl ContextPruner {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            strategy: PruningStrategy::from_name(&config.pruning_strategy),
            max_messages: config.max_messages,
        }
    }

    pub fn update_config(&mut self, config: &ContextConfig) {
        *self = Self::new(config);
        info!(max_messages = self.max_messages, "Context pruner config updated");
    }

    pub fn strategy(&self) -> PruningStrategy {
        self.strategy
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn prune<T>(&self, messages: Vec<T>) -> Vec<T> {
        match self.strategy {
            PruningStrategy::Fifo => self.prune_fifo(messages),
        }
    }

    fn prune_fifo<T>(&self, mut messages: Vec<T>) -> Vec<T> {
        if messages.len() <= self.max_messages {
            return messages;
        }
        let before = messages.len();
        let kept = messages.split_off(before - self.max_messages);
        debug!(from = before, to = kept.len(), "Pruned conversation (FIFO)");
        kept
    }
}

impl Default for ContextPruner {
    fn default() -> Self {
        Self::new(&ContextConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(strategy: &str, max_messages: usize) -> ContextConfig {
        ContextConfig {
            pruning_strategy: strategy.into(),
            max_messages,
        }
    }

    #[test]
    fn fifo_keeps_most_recent() {
        let pruner = ContextPruner::new(&config("fifo", 3));
        assert_eq!(pruner.prune(vec!["m1", "m2", "m3", "m4"]), vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn short_branch_is_untouched() {
        let pruner = ContextPruner::new(&config("fifo", 3));
        assert_eq!(pruner.prune(vec![1, 2, 3]), vec![1, 2, 3]);
        assert!(pruner.prune(Vec::<u8>::new()).is_empty());
    }

    #[test]
    fn unknown_strategy_falls_back_to_fifo() {
        let pruner = ContextPruner::new(&config("summarize", 2));
        assert_eq!(pruner.strategy(), PruningStrategy::Fifo);
        assert_eq!(pruner.prune(vec![1, 2, 3]), vec![2, 3]);
    }

    #[test]
    fn update_config_swaps_limit() {
        let mut pruner = ContextPruner::default();
        assert_eq!(pruner.max_messages(), 50);
        pruner.update_config(&config("fifo", 1));
        assert_eq!(pruner.prune(vec!["a", "b"]), vec!["b"]);
    }
}
