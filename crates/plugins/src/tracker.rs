//! Component tracking.
//!
//! The plugin manager reports every successfully loaded plugin here as
//! `plugin:<id>`, which gives status output a list of live components.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};
use traymind_core::plugin::ResourceTracker;

#[derive(Debug, Default)]
pub struct MemoryTracker {
    components: Mutex<Vec<String>>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracked tags in the order they were first seen.
    pub fn tracked(&self) -> Vec<String> {
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_tracked(&self, tag: &str) -> bool {
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t == tag)
    }
}

impl ResourceTracker for MemoryTracker {
    fn track_component(&self, tag: &str) {
        let mut components = self.components.lock().unwrap_or_else(PoisonError::into_inner);
        if components.iter().any(|t| t == tag) {
            warn!(component = %tag, "Component is already tracked");
            return;
        }
        debug!(component = %tag, "Tracking component");
        components.push(tag.to_string());
    }
}
