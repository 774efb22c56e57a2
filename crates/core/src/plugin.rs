//! Plugin traits: the contract between the plugin manager and plugins.
//!
//! A plugin ships as a [`PluginFactory`]: metadata can be read from it
//! without constructing anything, and [`PluginFactory::create`] builds the
//! instance only when the manager decides to load it.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PluginError;
use crate::event::{EventDispatcher, Listener};
use crate::service::ServiceLocator;

/// Static description of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin id.
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub description: String,

    /// Load during startup even when lazy loading is on.
    #[serde(default)]
    pub eager_load: bool,
}

fn default_version() -> String {
    "0.1.0".into()
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            eager_load: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager_load = true;
        self
    }
}

/// What a plugin gets to work with.
///
/// Listeners registered through [`PluginContext::subscribe`] are recorded,
/// so the manager can take them off the bus again when a load fails.
#[derive(Clone)]
pub struct PluginContext {
    pub events: Arc<EventDispatcher>,
    pub services: Arc<ServiceLocator>,
    subscriptions: Arc<Mutex<Vec<(String, Listener)>>>,
}

impl PluginContext {
    pub fn new(events: Arc<EventDispatcher>, services: Arc<ServiceLocator>) -> Self {
        Self {
            events,
            services,
            subscriptions: Arc::default(),
        }
    }

    /// Same bus and services, with an empty subscription record.
    pub fn scoped(&self) -> Self {
        Self::new(Arc::clone(&self.events), Arc::clone(&self.services))
    }

    /// Subscribe on the bus and remember the registration.
    pub fn subscribe(&self, event_type: impl Into<String>, listener: Listener) {
        let event_type = event_type.into();
        self.events.subscribe(event_type.clone(), listener.clone());
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event_type, listener));
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Remove every listener recorded by this context. Returns how many.
    pub fn unsubscribe_all(&self) -> usize {
        let recorded = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (event_type, listener) in &recorded {
            self.events.unsubscribe(event_type, listener);
        }
        recorded.len()
    }
}

/// A loaded plugin.
///
/// `initialize` runs once per load; a failure there means the plugin is
/// not cached and a later request retries from scratch.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// One-time setup: subscribe listeners, acquire resources.
    async fn initialize(&self) -> Result<(), PluginError>;

    async fn start(&self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A discoverable plugin.
pub trait PluginFactory: Send + Sync {
    /// Read the plugin's metadata. Must not construct the plugin.
    fn metadata(&self) -> Result<PluginMetadata, PluginError>;

    /// Where the plugin comes from (module path), for diagnostics.
    fn source(&self) -> &str;

    /// The concrete plugin type name.
    fn type_name(&self) -> &str;

    /// Construct a fresh instance.
    fn create(&self, ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError>;
}

/// Something that wants to know which components are alive.
pub trait ResourceTracker: Send + Sync {
    fn track_component(&self, tag: &str);
}
