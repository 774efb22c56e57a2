//! Service registration and the runtime lifecycle.
//!
//! Every long-lived component is registered by name in one
//! [`ServiceLocator`] and built on first resolve:
//!
//! | service              | depends on                                   |
//! |----------------------|----------------------------------------------|
//! | `config_store`       |                                              |
//! | `event_dispatcher`   | `config_store`                               |
//! | `memory_tracker`     |                                              |
//! | `plugin_manager`     | `event_dispatcher`, `config_store`, `memory_tracker` (optional) |
//! | `context_manager`    | `event_dispatcher`, `config_store`           |
//! | `role_selector`      | `config_store`                               |
//! | `completion_backend` |                                              |
//! | `agent`              | `event_dispatcher`, `context_manager`, `role_selector`, `completion_backend` |
//! | `command_executor`   | `event_dispatcher`, `config_store`           |
//! | `error_analytics`    | `event_dispatcher`, `config_store`           |

use std::sync::{Arc, Weak};

use tracing::{info, warn};
use traymind_agent::{
    Agent, CommandExecutor, ContextManager, EchoBackend, ErrorAnalytics, RoleSelector,
};
use traymind_config::ConfigStore;
use traymind_core::backend::CompletionBackend;
use traymind_core::error::{Error, ListenerError, ServiceError};
use traymind_core::event::{EventDispatcher, Listener, topics};
use traymind_core::plugin::PluginContext;
use traymind_core::service::{Lifetime, ServiceFactory, ServiceLocator};
use traymind_plugins::{LoadSummary, MemoryTracker, PluginCatalog, PluginManager};

/// Registered service names.
pub mod services {
    pub const CONFIG_STORE: &str = "config_store";
    pub const EVENT_DISPATCHER: &str = "event_dispatcher";
    pub const MEMORY_TRACKER: &str = "memory_tracker";
    pub const PLUGIN_MANAGER: &str = "plugin_manager";
    pub const CONTEXT_MANAGER: &str = "context_manager";
    pub const ROLE_SELECTOR: &str = "role_selector";
    pub const COMPLETION_BACKEND: &str = "completion_backend";
    pub const AGENT: &str = "agent";
    pub const COMMAND_EXECUTOR: &str = "command_executor";
    pub const ERROR_ANALYTICS: &str = "error_analytics";
}

/// Register the runtime's services as singletons in `locator`.
pub fn register_services(
    locator: &Arc<ServiceLocator>,
    config: Arc<ConfigStore>,
    catalog: PluginCatalog,
    backend: Arc<dyn CompletionBackend>,
) {
    locator.register(
        services::CONFIG_STORE,
        ServiceFactory::instance(config),
        Lifetime::Singleton,
    );

    locator.register(
        services::EVENT_DISPATCHER,
        ServiceFactory::new(|deps| {
            let events = deps.get::<ConfigStore>(services::CONFIG_STORE)?.get().events;
            Ok(EventDispatcher::new(
                events.priorities(),
                events.dispatcher_options(),
            ))
        })
        .depends_on(services::CONFIG_STORE),
        Lifetime::Singleton,
    );

    locator.register(
        services::MEMORY_TRACKER,
        ServiceFactory::new(|_| Ok(MemoryTracker::new())),
        Lifetime::Singleton,
    );

    // Plugins get the locator itself; a weak handle keeps the registry
    // from owning its own factory.
    let weak_locator: Weak<ServiceLocator> = Arc::downgrade(locator);
    locator.register(
        services::PLUGIN_MANAGER,
        ServiceFactory::new(move |deps| {
            let locator = weak_locator
                .upgrade()
                .ok_or_else(|| ServiceError::Construction {
                    service: deps.service().to_string(),
                    reason: "service locator was dropped".into(),
                })?;
            let ctx = PluginContext::new(deps.get(services::EVENT_DISPATCHER)?, locator);
            let mut manager = PluginManager::new(
                catalog.clone(),
                ctx,
                deps.get(services::CONFIG_STORE)?,
            );
            if let Some(tracker) = deps.optional::<MemoryTracker>(services::MEMORY_TRACKER)? {
                manager = manager.with_tracker(tracker);
            }
            Ok(manager)
        })
        .depends_on(services::EVENT_DISPATCHER)
        .depends_on(services::CONFIG_STORE)
        .optionally_depends_on(services::MEMORY_TRACKER),
        Lifetime::Singleton,
    );

    locator.register(
        services::CONTEXT_MANAGER,
        ServiceFactory::shared(|deps| {
            Ok(ContextManager::new(
                deps.get(services::EVENT_DISPATCHER)?,
                deps.get(services::CONFIG_STORE)?,
            ))
        })
        .depends_on(services::EVENT_DISPATCHER)
        .depends_on(services::CONFIG_STORE),
        Lifetime::Singleton,
    );

    locator.register(
        services::ROLE_SELECTOR,
        ServiceFactory::new(|deps| Ok(RoleSelector::new(deps.get(services::CONFIG_STORE)?)))
            .depends_on(services::CONFIG_STORE),
        Lifetime::Singleton,
    );

    locator.register(
        services::COMPLETION_BACKEND,
        ServiceFactory::new(move |_| Ok(Arc::clone(&backend))),
        Lifetime::Singleton,
    );

    locator.register(
        services::AGENT,
        ServiceFactory::shared(|deps| {
            let backend =
                deps.get::<Arc<dyn CompletionBackend>>(services::COMPLETION_BACKEND)?;
            Ok(Agent::new(
                deps.get(services::EVENT_DISPATCHER)?,
                deps.get(services::CONTEXT_MANAGER)?,
                deps.get(services::ROLE_SELECTOR)?,
                Arc::clone(&backend),
            ))
        })
        .depends_on(services::EVENT_DISPATCHER)
        .depends_on(services::CONTEXT_MANAGER)
        .depends_on(services::ROLE_SELECTOR)
        .depends_on(services::COMPLETION_BACKEND),
        Lifetime::Singleton,
    );

    locator.register(
        services::COMMAND_EXECUTOR,
        ServiceFactory::shared(|deps| {
            let events = deps.get::<EventDispatcher>(services::EVENT_DISPATCHER)?;
            Ok(CommandExecutor::new(&events, deps.get(services::CONFIG_STORE)?))
        })
        .depends_on(services::EVENT_DISPATCHER)
        .depends_on(services::CONFIG_STORE),
        Lifetime::Singleton,
    );

    locator.register(
        services::ERROR_ANALYTICS,
        ServiceFactory::shared(|deps| {
            Ok(ErrorAnalytics::new(
                deps.get(services::EVENT_DISPATCHER)?,
                deps.get(services::CONFIG_STORE)?,
            ))
        })
        .depends_on(services::EVENT_DISPATCHER)
        .depends_on(services::CONFIG_STORE),
        Lifetime::Singleton,
    );
}

/// The wired application.
pub struct Runtime {
    pub services: Arc<ServiceLocator>,
    pub config: Arc<ConfigStore>,
    pub events: Arc<EventDispatcher>,
    pub context: Arc<ContextManager>,
    pub agent: Arc<Agent>,
    pub commands: Arc<CommandExecutor>,
    pub analytics: Arc<ErrorAnalytics>,
    pub plugins: Arc<PluginManager>,
}

impl Runtime {
    /// Register and resolve every service. Nothing runs until [`Runtime::start`].
    pub fn bootstrap(
        config: Arc<ConfigStore>,
        catalog: PluginCatalog,
        backend: Arc<dyn CompletionBackend>,
    ) -> Result<Self, Error> {
        let locator = Arc::new(ServiceLocator::new());
        register_services(&locator, Arc::clone(&config), catalog, backend);

        let events: Arc<EventDispatcher> = locator.resolve(services::EVENT_DISPATCHER)?;
        // Sync listeners run in subscription order, so the store is reloaded
        // before the context manager reads it.
        subscribe_settings_reload(&events, &config);

        let context = locator.resolve(services::CONTEXT_MANAGER)?;
        let agent = locator.resolve(services::AGENT)?;
        let commands = locator.resolve(services::COMMAND_EXECUTOR)?;
        let analytics = locator.resolve(services::ERROR_ANALYTICS)?;
        let plugins = locator.resolve(services::PLUGIN_MANAGER)?;
        info!(services = ?locator.names(), "Runtime wired");

        Ok(Self {
            services: locator,
            config,
            events,
            context,
            agent,
            commands,
            analytics,
            plugins,
        })
    }

    /// Built-in plugins and the offline echo backend.
    pub fn with_defaults(config: Arc<ConfigStore>) -> Result<Self, Error> {
        Self::bootstrap(
            config,
            traymind_plugins::builtin_catalog(),
            Arc::new(EchoBackend::new()),
        )
    }

    /// Start the event bus, load startup plugins and run their `start` hooks.
    pub async fn start(&self) -> Result<LoadSummary, Error> {
        self.events.start()?;
        let summary = self.plugins.discover_and_load_plugins().await;
        for (plugin_id, e) in self.plugins.start_all().await {
            warn!(plugin_id = %plugin_id, error = %e, "Plugin did not start");
        }
        info!(loaded = ?summary.loaded, deferred = ?summary.deferred, "Runtime started");
        Ok(summary)
    }

    pub async fn shutdown(&self) {
        self.plugins.stop_all().await;
        self.events.stop().await;
        info!("Runtime stopped");
    }
}

fn subscribe_settings_reload(events: &Arc<EventDispatcher>, config: &Arc<ConfigStore>) {
    let weak_events = Arc::downgrade(events);
    let config = Arc::clone(config);
    events.subscribe(
        topics::SETTINGS_CHANGED,
        Listener::sync(move |_| {
            let reloaded = config
                .reload()
                .map_err(|e| ListenerError::new(format!("settings reload failed: {e}")))?;
            if let Some(events) = weak_events.upgrade() {
                events.set_priorities(reloaded.events.priorities());
            }
            Ok(())
        }),
    );
}
