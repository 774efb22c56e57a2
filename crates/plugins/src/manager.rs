//! Central plugin lifecycle manager.
//!
//! Discovery reads metadata from every factory in the [`PluginCatalog`]
//! without constructing anything. Loading constructs the plugin, runs its
//! `initialize` hook, caches it and announces it on the bus. Loading is lazy
//! by default: only `eager_load` plugins are loaded at startup, the rest on
//! first [`PluginManager::get_plugin`].
//!
//! A plugin that fails (error or panic) during construction or `initialize`
//! is reported as `ERROR_EVENT.PLUGIN_CRASH` and left unloaded; the caller
//! gets a [`PluginError::Load`] and nothing else is affected.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use traymind_config::ConfigStore;
use traymind_core::error::PluginError;
use traymind_core::event::{Payload, topics};
use traymind_core::plugin::{Plugin, PluginContext, PluginFactory, PluginMetadata, ResourceTracker};

use crate::catalog::PluginCatalog;

/// A discovered plugin.
#[derive(Clone)]
pub struct PluginEntry {
    pub plugin_id: String,
    pub source: String,
    pub type_name: String,
    pub metadata: PluginMetadata,
    factory: Arc<dyn PluginFactory>,
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("plugin_id", &self.plugin_id)
            .field("source", &self.source)
            .field("type_name", &self.type_name)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Outcome of [`PluginManager::discover_and_load_plugins`].
#[derive(Debug, Default)]
pub struct LoadSummary {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, PluginError)>,
    /// Lazy plugins left for first use.
    pub deferred: Vec<String>,
    /// Turned off in `plugins.enabled`.
    pub disabled: Vec<String>,
}

pub struct PluginManager {
    catalog: PluginCatalog,
    registry: RwLock<BTreeMap<String, PluginEntry>>,
    loaded: Mutex<BTreeMap<String, Arc<dyn Plugin>>>,
    /// Per-plugin load gates so concurrent requests share one load.
    load_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    ctx: PluginContext,
    config: Arc<ConfigStore>,
    tracker: Option<Arc<dyn ResourceTracker>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PluginManager {
    /// Create a manager and run discovery.
    pub fn new(catalog: PluginCatalog, ctx: PluginContext, config: Arc<ConfigStore>) -> Self {
        let registry = discover(&catalog);
        info!(discovered = registry.len(), "Plugin discovery complete");
        Self {
            catalog,
            registry: RwLock::new(registry),
            loaded: Mutex::new(BTreeMap::new()),
            load_gates: Mutex::new(HashMap::new()),
            ctx,
            config,
            tracker: None,
        }
    }

    /// Report successful loads to `tracker`.
    pub fn with_tracker(mut self, tracker: Arc<dyn ResourceTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// The context handed to every plugin this manager builds.
    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    /// Re-read the catalog. Already loaded plugins stay loaded.
    pub fn rediscover(&self) -> usize {
        let registry = discover(&self.catalog);
        let count = registry.len();
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = registry;
        info!(discovered = count, "Plugin rediscovery complete");
        count
    }

    /// Load eager plugins (or all of them when lazy loading is off).
    ///
    /// Never fails: per-plugin failures are collected in the summary.
    pub async fn discover_and_load_plugins(&self) -> LoadSummary {
        let settings = self.config.get().plugins;
        let mut summary = LoadSummary::default();

        for entry in self.discovered() {
            let id = entry.plugin_id;
            if !settings.is_enabled(&id) {
                info!(plugin_id = %id, "Plugin disabled in configuration, skipping");
                summary.disabled.push(id);
                continue;
            }
            if settings.lazy_load && !entry.metadata.eager_load {
                debug!(plugin_id = %id, "Plugin deferred until first use");
                summary.deferred.push(id);
                continue;
            }
            match self.get_plugin(&id).await {
                Ok(_) => summary.loaded.push(id),
                Err(e) => summary.failed.push((id, e)),
            }
        }

        info!(
            loaded = summary.loaded.len(),
            failed = summary.failed.len(),
            deferred = summary.deferred.len(),
            "Startup plugin loading finished"
        );
        summary
    }

    /// The loaded instance of `plugin_id`, loading it first if needed.
    pub async fn get_plugin(&self, plugin_id: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        if let Some(plugin) = self.loaded_instance(plugin_id) {
            return Ok(plugin);
        }

        let entry = self
            .entry(plugin_id)
            .ok_or_else(|| PluginError::NotDiscovered(plugin_id.to_string()))?;

        if !self.config.get().plugins.is_enabled(plugin_id) {
            return Err(PluginError::Disabled(plugin_id.to_string()));
        }

        let gate = self.load_gate(plugin_id);
        let _guard = gate.lock().await;

        // Another caller may have finished the load while we waited.
        if let Some(plugin) = self.loaded_instance(plugin_id) {
            return Ok(plugin);
        }
        self.load(&entry).await
    }

    /// All loaded plugins, by id. Never triggers loading.
    pub fn get_all_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        lock(&self.loaded).values().cloned().collect()
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        lock(&self.loaded).keys().cloned().collect()
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        lock(&self.loaded).contains_key(plugin_id)
    }

    /// Every discovered plugin, by id.
    pub fn discovered(&self) -> Vec<PluginEntry> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn entry(&self, plugin_id: &str) -> Option<PluginEntry> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plugin_id)
            .cloned()
    }

    /// Run the `start` hook of every loaded plugin.
    pub async fn start_all(&self) -> Vec<(String, PluginError)> {
        let mut failures = Vec::new();
        for (id, plugin) in self.loaded_snapshot() {
            match plugin.start().await {
                Ok(()) => debug!(plugin_id = %id, "Plugin started"),
                Err(e) => {
                    error!(plugin_id = %id, error = %e, "Plugin failed to start");
                    self.ctx.events.publish(
                        topics::PLUGIN_CRASH,
                        Payload::new()
                            .kwarg("plugin_name", id.as_str())
                            .kwarg("error", e.to_string()),
                    );
                    failures.push((id, e));
                }
            }
        }
        failures
    }

    /// Run the `stop` hook of every loaded plugin.
    pub async fn stop_all(&self) -> Vec<(String, PluginError)> {
        let mut failures = Vec::new();
        for (id, plugin) in self.loaded_snapshot() {
            if let Err(e) = plugin.stop().await {
                warn!(plugin_id = %id, error = %e, "Plugin failed to stop cleanly");
                failures.push((id, e));
            }
        }
        failures
    }

    async fn load(&self, entry: &PluginEntry) -> Result<Arc<dyn Plugin>, PluginError> {
        let id = entry.plugin_id.as_str();
        debug!(plugin_id = %id, source = %entry.source, "Loading plugin");

        match self.construct_and_initialize(entry).await {
            Ok(plugin) => {
                lock(&self.loaded).insert(id.to_string(), Arc::clone(&plugin));
                info!(plugin_id = %id, version = %entry.metadata.version, "Plugin loaded");

                let metadata = serde_json::to_value(&entry.metadata).unwrap_or(Value::Null);
                self.ctx.events.publish(
                    topics::PLUGIN_LOADED,
                    Payload::new().kwarg("plugin_id", id).kwarg("metadata", metadata),
                );
                if let Some(tracker) = &self.tracker {
                    tracker.track_component(&format!("plugin:{id}"));
                }
                Ok(plugin)
            }
            Err(reason) => {
                error!(plugin_id = %id, error = %reason, "Plugin failed to load");
                self.ctx.events.publish(
                    topics::PLUGIN_CRASH,
                    Payload::new()
                        .kwarg("plugin_name", id)
                        .kwarg("error", reason.as_str()),
                );
                Err(PluginError::Load {
                    plugin_id: id.to_string(),
                    reason,
                })
            }
        }
    }

    /// Build and initialize a fresh instance; any error or panic becomes a reason.
    ///
    /// Each attempt gets its own scoped context; when the attempt fails, the
    /// listeners it subscribed are removed before the error is returned.
    async fn construct_and_initialize(&self, entry: &PluginEntry) -> Result<Arc<dyn Plugin>, String> {
        let ctx = self.ctx.scoped();
        let outcome = Self::build(entry, &ctx).await;
        if outcome.is_err() {
            let removed = ctx.unsubscribe_all();
            if removed > 0 {
                debug!(plugin_id = %entry.plugin_id, removed, "Dropped listeners of failed plugin");
            }
        }
        outcome
    }

    async fn build(entry: &PluginEntry, ctx: &PluginContext) -> Result<Arc<dyn Plugin>, String> {
        let plugin = match std::panic::catch_unwind(AssertUnwindSafe(|| entry.factory.create(ctx))) {
            Ok(Ok(plugin)) => plugin,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(panic) => return Err(panic_reason("construction", panic.as_ref())),
        };

        match AssertUnwindSafe(plugin.initialize()).catch_unwind().await {
            Ok(Ok(())) => Ok(plugin),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(panic_reason("initialize", panic.as_ref())),
        }
    }

    fn loaded_instance(&self, plugin_id: &str) -> Option<Arc<dyn Plugin>> {
        lock(&self.loaded).get(plugin_id).cloned()
    }

    fn loaded_snapshot(&self) -> Vec<(String, Arc<dyn Plugin>)> {
        lock(&self.loaded)
            .iter()
            .map(|(id, plugin)| (id.clone(), Arc::clone(plugin)))
            .collect()
    }

    fn load_gate(&self, plugin_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(lock(&self.load_gates).entry(plugin_id.to_string()).or_default())
    }
}

fn discover(catalog: &PluginCatalog) -> BTreeMap<String, PluginEntry> {
    let mut registry = BTreeMap::new();
    for factory in catalog.iter() {
        let metadata = match factory.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(source = factory.source(), error = %e, "Could not read plugin metadata, skipping");
                continue;
            }
        };

        let plugin_id = metadata.name.clone();
        if registry.contains_key(&plugin_id) {
            warn!(plugin_id = %plugin_id, source = factory.source(), "Duplicate plugin id, keeping the first");
            continue;
        }

        debug!(plugin_id = %plugin_id, eager = metadata.eager_load, "Discovered plugin");
        registry.insert(
            plugin_id.clone(),
            PluginEntry {
                plugin_id,
                source: factory.source().to_string(),
                type_name: factory.type_name().to_string(),
                metadata,
                factory: Arc::clone(factory),
            },
        );
    }
    registry
}

fn panic_reason(stage: &str, panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("panicked during {stage}: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticFactory;
    use crate::tracker::MemoryTracker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use traymind_config::AppConfig;
    use traymind_core::event::{Event, EventDispatcher, Listener};
    use traymind_core::service::ServiceLocator;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Ok,
        FailInit,
        PanicInit,
        FailStart,
        SlowInit,
        Subscribe,
        SubscribeThenFail,
    }

    const HALF_EVENT: &str = "TEST_EVENT.HALF";

    struct TestPlugin {
        metadata: PluginMetadata,
        behaviour: Behaviour,
        ctx: PluginContext,
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn metadata(&self) -> &PluginMetadata {
            &self.metadata
        }

        async fn initialize(&self) -> Result<(), PluginError> {
            match self.behaviour {
                Behaviour::FailInit => Err(PluginError::Execution {
                    plugin_id: self.metadata.name.clone(),
                    hook: "initialize".into(),
                    reason: "Init failed".into(),
                }),
                Behaviour::PanicInit => panic!("init exploded"),
                Behaviour::SlowInit => {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(())
                }
                Behaviour::Subscribe => {
                    self.ctx.subscribe(HALF_EVENT, Listener::sync(|_| Ok(())));
                    Ok(())
                }
                Behaviour::SubscribeThenFail => {
                    self.ctx.subscribe(HALF_EVENT, Listener::sync(|_| Ok(())));
                    Err(PluginError::Execution {
                        plugin_id: self.metadata.name.clone(),
                        hook: "initialize".into(),
                        reason: "half initialized".into(),
                    })
                }
                Behaviour::Ok | Behaviour::FailStart => Ok(()),
            }
        }

        async fn start(&self) -> Result<(), PluginError> {
            match self.behaviour {
                Behaviour::FailStart => Err(PluginError::Execution {
                    plugin_id: self.metadata.name.clone(),
                    hook: "start".into(),
                    reason: "no device".into(),
                }),
                _ => Ok(()),
            }
        }
    }

    fn factory(metadata: PluginMetadata, behaviour: Behaviour, creates: &Arc<AtomicUsize>) -> StaticFactory {
        let creates = Arc::clone(creates);
        StaticFactory::new(metadata.clone(), "tests", move |ctx| {
            creates.fetch_add(1, Ordering::SeqCst);
            Ok(TestPlugin {
                metadata: metadata.clone(),
                behaviour,
                ctx: ctx.clone(),
            })
        })
    }

    struct BrokenMetadata;

    impl PluginFactory for BrokenMetadata {
        fn metadata(&self) -> Result<PluginMetadata, PluginError> {
            Err(PluginError::Metadata {
                source_path: "tests::broken".into(),
                reason: "unreadable".into(),
            })
        }
        fn source(&self) -> &str {
            "tests::broken"
        }
        fn type_name(&self) -> &str {
            "Broken"
        }
        fn create(&self, _ctx: &PluginContext) -> Result<Arc<dyn Plugin>, PluginError> {
            unreachable!("never discovered")
        }
    }

    struct Harness {
        manager: PluginManager,
        events: Arc<EventDispatcher>,
        creates: Arc<AtomicUsize>,
    }

    fn harness(config: AppConfig, build: impl FnOnce(&Arc<AtomicUsize>) -> PluginCatalog) -> Harness {
        let events = Arc::new(EventDispatcher::default());
        let ctx = PluginContext::new(Arc::clone(&events), Arc::new(ServiceLocator::new()));
        let creates = Arc::new(AtomicUsize::new(0));
        let catalog = build(&creates);
        let manager = PluginManager::new(catalog, ctx, Arc::new(ConfigStore::in_memory(config)));
        Harness {
            manager,
            events,
            creates,
        }
    }

    fn standard(creates: &Arc<AtomicUsize>) -> PluginCatalog {
        PluginCatalog::new()
            .with(factory(PluginMetadata::new("mock_plugin"), Behaviour::Ok, creates))
            .with(factory(PluginMetadata::new("failing_plugin"), Behaviour::FailInit, creates))
    }

    fn capture(events: &EventDispatcher, types: &[&str]) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event_type in types {
            let tx = tx.clone();
            events.subscribe(
                *event_type,
                Listener::sync(move |event| {
                    let _ = tx.send(event.clone());
                    Ok(())
                }),
            );
        }
        rx
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    #[test]
    fn discovery_constructs_nothing() {
        let h = harness(AppConfig::default(), standard);
        let ids: Vec<String> = h.manager.discovered().into_iter().map(|e| e.plugin_id).collect();
        assert_eq!(ids, vec!["failing_plugin", "mock_plugin"]);
        assert!(h.manager.get_all_plugins().is_empty());
        assert_eq!(h.creates.load(Ordering::SeqCst), 0);
        assert_eq!(h.manager.entry("mock_plugin").unwrap().source, "tests");
    }

    #[test]
    fn unreadable_metadata_and_duplicates_are_skipped() {
        let h = harness(AppConfig::default(), |creates| {
            PluginCatalog::new()
                .with(BrokenMetadata)
                .with(factory(PluginMetadata::new("dup").with_version("1.0.0"), Behaviour::Ok, creates))
                .with(factory(PluginMetadata::new("dup").with_version("2.0.0"), Behaviour::Ok, creates))
        });
        let discovered = h.manager.discovered();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].metadata.version, "1.0.0");
    }

    #[tokio::test]
    async fn lazy_get_plugin_loads_and_announces() {
        let h = harness(AppConfig::default(), standard);
        let mut rx = capture(&h.events, &[topics::PLUGIN_LOADED]);
        h.events.start().unwrap();

        let plugin = h.manager.get_plugin("mock_plugin").await.unwrap();
        assert_eq!(plugin.metadata().name, "mock_plugin");
        assert!(h.manager.is_loaded("mock_plugin"));

        let event = next(&mut rx).await;
        assert_eq!(event.payload.str("plugin_id"), Some("mock_plugin"));
        assert_eq!(event.payload.get("metadata").unwrap()["name"], "mock_plugin");

        // Cached: no second construction.
        let again = h.manager.get_plugin("mock_plugin").await.unwrap();
        assert!(Arc::ptr_eq(&plugin, &again));
        assert_eq!(h.creates.load(Ordering::SeqCst), 1);
        h.events.stop().await;
    }

    #[tokio::test]
    async fn unknown_plugin_is_not_discovered() {
        let h = harness(AppConfig::default(), standard);
        let err = h.manager.get_plugin("nonexistent").await.err().unwrap();
        assert_eq!(err.to_string(), "Plugin 'nonexistent' is not discovered.");
    }

    #[tokio::test]
    async fn failing_plugin_is_reported_and_not_cached() {
        let h = harness(AppConfig::default(), standard);
        let mut rx = capture(&h.events, &[topics::PLUGIN_CRASH]);
        h.events.start().unwrap();

        let err = h.manager.get_plugin("failing_plugin").await.err().unwrap();
        assert!(matches!(&err, PluginError::Load { plugin_id, reason }
            if plugin_id == "failing_plugin" && reason.contains("Init failed")));
        assert!(!h.manager.is_loaded("failing_plugin"));

        let event = next(&mut rx).await;
        assert_eq!(event.payload.str("plugin_name"), Some("failing_plugin"));
        assert!(event.payload.str("error").unwrap().contains("Init failed"));

        // A later request retries from scratch.
        assert!(h.manager.get_plugin("failing_plugin").await.is_err());
        assert_eq!(h.creates.load(Ordering::SeqCst), 2);
        h.events.stop().await;
    }

    #[tokio::test]
    async fn failed_initialize_leaves_no_listeners_behind() {
        let h = harness(AppConfig::default(), |creates| {
            PluginCatalog::new()
                .with(factory(PluginMetadata::new("half"), Behaviour::SubscribeThenFail, creates))
                .with(factory(PluginMetadata::new("whole"), Behaviour::Subscribe, creates))
        });

        for _ in 0..3 {
            assert!(h.manager.get_plugin("half").await.is_err());
        }
        assert!(!h.manager.is_loaded("half"));
        assert_eq!(h.creates.load(Ordering::SeqCst), 3);
        assert_eq!(h.events.listener_count(HALF_EVENT), 0);

        // A successful load keeps what it subscribed.
        h.manager.get_plugin("whole").await.unwrap();
        assert_eq!(h.events.listener_count(HALF_EVENT), 1);
        assert_eq!(h.manager.context().subscription_count(), 0);
    }

    #[tokio::test]
    async fn panicking_plugin_is_contained() {
        let h = harness(AppConfig::default(), |creates| {
            PluginCatalog::new().with(factory(PluginMetadata::new("bomb"), Behaviour::PanicInit, creates))
        });
        let err = h.manager.get_plugin("bomb").await.err().unwrap();
        assert!(err.to_string().contains("init exploded"));
        assert!(h.manager.get_all_plugins().is_empty());
    }

    #[tokio::test]
    async fn eager_mode_loads_everything_and_isolates_failures() {
        let mut config = AppConfig::default();
        config.plugins.lazy_load = false;
        let h = harness(config, standard);

        let summary = h.manager.discover_and_load_plugins().await;
        assert_eq!(summary.loaded, vec!["mock_plugin"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "failing_plugin");
        assert_eq!(h.manager.loaded_ids(), vec!["mock_plugin"]);
    }

    #[tokio::test]
    async fn lazy_mode_loads_only_eager_plugins() {
        let h = harness(AppConfig::default(), |creates| {
            PluginCatalog::new()
                .with(factory(PluginMetadata::new("early").eager(), Behaviour::Ok, creates))
                .with(factory(PluginMetadata::new("late"), Behaviour::Ok, creates))
        });

        let summary = h.manager.discover_and_load_plugins().await;
        assert_eq!(summary.loaded, vec!["early"]);
        assert_eq!(summary.deferred, vec!["late"]);
        assert!(!h.manager.is_loaded("late"));

        h.manager.get_plugin("late").await.unwrap();
        assert_eq!(h.manager.loaded_ids(), vec!["early", "late"]);
    }

    #[tokio::test]
    async fn disabled_plugin_is_skipped_and_refused() {
        let mut config = AppConfig::default();
        config.plugins.lazy_load = false;
        config.plugins.enabled.insert("mock_plugin".into(), false);
        let h = harness(config, standard);

        let summary = h.manager.discover_and_load_plugins().await;
        assert_eq!(summary.disabled, vec!["mock_plugin"]);
        assert_eq!(
            h.manager.get_plugin("mock_plugin").await.err(),
            Some(PluginError::Disabled("mock_plugin".into()))
        );
        assert_eq!(h.creates.load(Ordering::SeqCst), 1); // only failing_plugin was attempted
    }

    #[tokio::test]
    async fn tracker_sees_only_successful_loads() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut h = harness(AppConfig::default(), standard);
        h.manager = h.manager.with_tracker(tracker.clone());

        h.manager.get_plugin("mock_plugin").await.unwrap();
        let _ = h.manager.get_plugin("failing_plugin").await;

        assert_eq!(tracker.tracked(), vec!["plugin:mock_plugin"]);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_load() {
        let h = harness(AppConfig::default(), |creates| {
            PluginCatalog::new().with(factory(PluginMetadata::new("slow"), Behaviour::SlowInit, creates))
        });

        let results = futures::future::join_all((0..5).map(|_| h.manager.get_plugin("slow"))).await;
        let plugins: Vec<_> = results.into_iter().map(Result::unwrap).collect();

        assert_eq!(h.creates.load(Ordering::SeqCst), 1);
        assert!(plugins.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn start_failures_are_isolated() {
        let h = harness(AppConfig::default(), |creates| {
            PluginCatalog::new()
                .with(factory(PluginMetadata::new("good"), Behaviour::Ok, creates))
                .with(factory(PluginMetadata::new("flaky"), Behaviour::FailStart, creates))
        });
        h.manager.get_plugin("good").await.unwrap();
        h.manager.get_plugin("flaky").await.unwrap();

        let failures = h.manager.start_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "flaky");
        assert!(h.manager.stop_all().await.is_empty());
    }

    #[tokio::test]
    async fn rediscover_keeps_loaded_plugins() {
        let h = harness(AppConfig::default(), standard);
        h.manager.get_plugin("mock_plugin").await.unwrap();
        assert_eq!(h.manager.rediscover(), 2);
        assert!(h.manager.is_loaded("mock_plugin"));
    }
}
