//! End-to-end integration tests for the Traymind runtime.
//!
//! These tests wire the full runtime through the service locator and drive
//! it only through the event bus, the way a front end would.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use traymind::{Runtime, services};
use traymind_config::{AppConfig, ConfigStore};
use traymind_core::backend::CompletionBackend;
use traymind_core::error::{BackendError, PluginError};
use traymind_core::event::{Event, Listener, Payload, topics};
use traymind_core::message::{Message, Role};
use traymind_core::plugin::{Plugin, PluginContext, PluginMetadata};
use traymind_core::service::{Lifetime, ServiceFactory};
use traymind_plugins::builtin::screen_capture::{
    self, CaptureError, SCREEN_GRABBER_SERVICE, ScreenGrabber,
};
use traymind_plugins::builtin::{DemoPlugin, demo};
use traymind_plugins::{MemoryTracker, PluginCatalog, StaticFactory, builtin_catalog};

// ── Helpers ──────────────────────────────────────────────────────────────

fn runtime_with(config: AppConfig) -> Runtime {
    Runtime::with_defaults(Arc::new(ConfigStore::in_memory(config))).unwrap()
}

async fn started() -> Runtime {
    let runtime = runtime_with(AppConfig::default());
    runtime.start().await.unwrap();
    runtime
}

/// Forward every event of `event_type` into a channel.
fn watch(runtime: &Runtime, event_type: &str) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    runtime.events.subscribe(
        event_type,
        Listener::sync(move |event| {
            let _ = tx.send(event.clone());
            Ok(())
        }),
    );
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn query(runtime: &Runtime, text: &str) {
    runtime.events.publish(
        topics::QUERY_RECEIVED,
        Payload::new().kwarg("user_message", text),
    );
}

struct FailingBackend;

#[async_trait]
impl CompletionBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _messages: &[Message]) -> Result<String, BackendError> {
        Err(BackendError::RequestFailed("upstream returned 503".into()))
    }
}

struct FixedGrabber;

impl ScreenGrabber for FixedGrabber {
    fn grab(&self) -> Result<Vec<u8>, CaptureError> {
        Ok(b"fake png bytes".to_vec())
    }
}

struct BrokenPlugin {
    metadata: PluginMetadata,
}

#[async_trait]
impl Plugin for BrokenPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn initialize(&self) -> Result<(), PluginError> {
        Err(PluginError::Execution {
            plugin_id: "broken".into(),
            hook: "initialize".into(),
            reason: "missing hardware".into(),
        })
    }
}

/// Subscribes through its context, then fails to initialize.
struct HalfPlugin {
    metadata: PluginMetadata,
    ctx: PluginContext,
}

const HALF_EVENT: &str = "TEST_EVENT.HALF";

#[async_trait]
impl Plugin for HalfPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn initialize(&self) -> Result<(), PluginError> {
        self.ctx.subscribe(HALF_EVENT, Listener::sync(|_| Ok(())));
        Err(PluginError::Execution {
            plugin_id: "half".into(),
            hook: "initialize".into(),
            reason: "device went away".into(),
        })
    }
}

/// Keeps every request it was sent.
#[derive(Default)]
struct RecordingBackend {
    requests: Mutex<Vec<Vec<Message>>>,
}

#[async_trait]
impl CompletionBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, BackendError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        Ok("ok".into())
    }
}

// ── Query flow ───────────────────────────────────────────────────────────

#[tokio::test]
async fn query_streams_chunks_then_completes() {
    let runtime = started().await;
    let mut chunks = watch(&runtime, topics::RESPONSE_CHUNK);
    let mut complete = watch(&runtime, topics::REQUEST_COMPLETE);

    query(&runtime, "hello there");

    let done = next(&mut complete).await;
    let full = done.payload.str("full_response").unwrap().to_string();
    assert_eq!(full, "You said: hello there");

    // Chunks are queued before the completion, so all of them have arrived.
    let mut streamed = String::new();
    while let Ok(chunk) = chunks.try_recv() {
        streamed.push_str(chunk.payload.str("chunk").unwrap());
    }
    assert_eq!(streamed, full);

    assert_eq!(runtime.context.len(), 2);
    let context = runtime.context.get_context();
    assert_eq!(context.last().unwrap().role, Role::Assistant);
    assert_eq!(context.last().unwrap().content.text(), full);
    runtime.shutdown().await;
}

#[tokio::test]
async fn follow_up_queries_share_history() {
    let runtime = started().await;
    let mut complete = watch(&runtime, topics::REQUEST_COMPLETE);

    query(&runtime, "first");
    next(&mut complete).await;
    query(&runtime, "second");
    let done = next(&mut complete).await;

    assert_eq!(done.payload.str("full_response"), Some("You said: second"));
    assert_eq!(runtime.context.len(), 4);
    runtime.shutdown().await;
}

#[tokio::test]
async fn backend_failure_is_reported_on_the_bus() {
    let runtime = Runtime::bootstrap(
        Arc::new(ConfigStore::default()),
        builtin_catalog(),
        Arc::new(FailingBackend),
    )
    .unwrap();
    let mut failures = watch(&runtime, topics::API_FAILURE);
    let mut complete = watch(&runtime, topics::REQUEST_COMPLETE);
    let mut notices = watch(&runtime, topics::NOTIFY_ERROR);
    runtime.start().await.unwrap();

    query(&runtime, "anyone there?");

    let failure = next(&mut failures).await;
    assert!(failure.payload.str("error").unwrap().contains("503"));
    let done = next(&mut complete).await;
    assert!(
        done.payload
            .str("full_response")
            .unwrap()
            .starts_with("An internal error occurred:")
    );
    assert_eq!(next(&mut notices).await.payload.str("title"), Some("Agent Error"));

    // The failed query stays in history; no assistant message was added.
    assert_eq!(runtime.context.len(), 1);
    runtime.shutdown().await;
}

#[tokio::test]
async fn clear_context_event_empties_history() {
    let runtime = started().await;
    let mut complete = watch(&runtime, topics::REQUEST_COMPLETE);
    query(&runtime, "remember this");
    next(&mut complete).await;
    assert!(!runtime.context.is_empty());

    runtime.events.publish(topics::CLEAR_CONTEXT, Payload::new());

    let context = Arc::clone(&runtime.context);
    eventually(move || context.is_empty()).await;
    runtime.shutdown().await;
}

#[tokio::test]
async fn branching_keeps_both_replies() {
    let runtime = started().await;
    let mut complete = watch(&runtime, topics::REQUEST_COMPLETE);
    let mut branch_changes = watch(&runtime, topics::BRANCH_CHANGED);

    query(&runtime, "tell me a joke");
    next(&mut complete).await;
    let first_question = runtime.context.get_full_history()[1].id;

    assert!(runtime.context.create_branch_at(first_question));
    let changed = next(&mut branch_changes).await;
    assert_eq!(
        changed.payload.str("current_node_id"),
        Some(first_question.to_string().as_str())
    );

    query(&runtime, "a different one");
    next(&mut complete).await;

    let branches = runtime.context.get_branches();
    assert_eq!(branches.len(), 2);
    let texts: Vec<String> = runtime
        .context
        .get_context()
        .iter()
        .map(|m| m.content.text())
        .collect();
    assert!(texts.contains(&"a different one".to_string()));
    assert!(!texts.contains(&"You said: tell me a joke".to_string()));
    runtime.shutdown().await;
}

// ── Plugins ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn startup_loads_eager_plugins_only() {
    let runtime = runtime_with(AppConfig::default());
    let mut loaded = watch(&runtime, topics::PLUGIN_LOADED);

    let summary = runtime.start().await.unwrap();

    assert_eq!(summary.loaded, vec![demo::PLUGIN_ID]);
    assert_eq!(summary.deferred, vec![screen_capture::PLUGIN_ID]);
    assert!(runtime.plugins.is_loaded(demo::PLUGIN_ID));
    assert!(!runtime.plugins.is_loaded(screen_capture::PLUGIN_ID));

    let event = next(&mut loaded).await;
    assert_eq!(event.payload.str("plugin_id"), Some(demo::PLUGIN_ID));

    let tracker: Arc<MemoryTracker> = runtime.services.resolve(services::MEMORY_TRACKER).unwrap();
    assert_eq!(tracker.tracked(), vec!["plugin:demo"]);
    runtime.shutdown().await;
}

#[tokio::test]
async fn eager_loading_everything_when_lazy_is_off() {
    let mut config = AppConfig::default();
    config.plugins.lazy_load = false;
    let runtime = runtime_with(config);

    let summary = runtime.start().await.unwrap();

    assert_eq!(summary.loaded.len(), 2);
    assert!(summary.deferred.is_empty());
    runtime.shutdown().await;
}

#[tokio::test]
async fn demo_plugin_answers_greetings() {
    let runtime = started().await;
    let mut sent = watch(&runtime, topics::DEMO_GREETING_SENT);

    runtime
        .events
        .publish(topics::DEMO_GREET, Payload::new().kwarg("name", "Grace"));

    let event = next(&mut sent).await;
    assert_eq!(event.payload.str("plugin"), Some(demo::PLUGIN_ID));
    runtime.shutdown().await;
}

#[tokio::test]
async fn failing_plugin_does_not_stop_startup() {
    let catalog = PluginCatalog::new()
        .with(StaticFactory::new(
            PluginMetadata::new("broken").eager(),
            "tests::broken",
            |_| {
                Ok(BrokenPlugin {
                    metadata: PluginMetadata::new("broken").eager(),
                })
            },
        ))
        .with(StaticFactory::new(
            DemoPlugin::metadata(),
            "tests::demo",
            |ctx| Ok(DemoPlugin::new(ctx)),
        ));
    let runtime = Runtime::bootstrap(
        Arc::new(ConfigStore::default()),
        catalog,
        Arc::new(traymind_agent::EchoBackend::new()),
    )
    .unwrap();
    let mut crashes = watch(&runtime, topics::PLUGIN_CRASH);

    let summary = runtime.start().await.unwrap();

    assert_eq!(summary.loaded, vec![demo::PLUGIN_ID]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "broken");
    assert!(!runtime.plugins.is_loaded("broken"));

    let crash = next(&mut crashes).await;
    assert_eq!(crash.payload.str("plugin_name"), Some("broken"));
    assert!(crash.payload.str("error").unwrap().contains("missing hardware"));

    let tracker: Arc<MemoryTracker> = runtime.services.resolve(services::MEMORY_TRACKER).unwrap();
    assert!(!tracker.is_tracked("plugin:broken"));
    runtime.shutdown().await;
}

#[tokio::test]
async fn disabled_plugin_is_never_loaded() {
    let mut config = AppConfig::default();
    config.plugins.enabled.insert(demo::PLUGIN_ID.into(), false);
    let runtime = runtime_with(config);

    let summary = runtime.start().await.unwrap();

    assert_eq!(summary.disabled, vec![demo::PLUGIN_ID]);
    assert!(matches!(
        runtime.plugins.get_plugin(demo::PLUGIN_ID).await,
        Err(PluginError::Disabled(_))
    ));
    runtime.shutdown().await;
}

#[tokio::test]
async fn screenshot_is_attached_to_the_next_query() {
    let runtime = started().await;
    let grabber: Arc<dyn ScreenGrabber> = Arc::new(FixedGrabber);
    runtime.services.register(
        SCREEN_GRABBER_SERVICE,
        ServiceFactory::new(move |_| Ok(Arc::clone(&grabber))),
        Lifetime::Singleton,
    );
    let mut open_chat = watch(&runtime, topics::OPEN_CHAT);
    let mut complete = watch(&runtime, topics::REQUEST_COMPLETE);

    // Lazy plugin: loaded on first use.
    runtime
        .plugins
        .get_plugin(screen_capture::PLUGIN_ID)
        .await
        .unwrap();
    runtime.events.publish(topics::SCREEN_CAPTURE, Payload::new());
    next(&mut open_chat).await;

    let agent = Arc::clone(&runtime.agent);
    eventually(move || agent.has_pending_image()).await;

    query(&runtime, "what is on my screen?");
    let done = next(&mut complete).await;
    assert_eq!(
        done.payload.str("full_response"),
        Some("You said: what is on my screen? [with screenshot]")
    );
    assert!(!runtime.agent.has_pending_image());

    let history = runtime.context.get_full_history();
    assert!(history[1].message.content.has_image());
    runtime.shutdown().await;
}

// ── Settings ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn settings_change_reloads_pruning_and_priorities() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    AppConfig::default().save_to(&path).unwrap();

    let store = Arc::new(ConfigStore::open(path.clone()).unwrap());
    let runtime = Runtime::with_defaults(Arc::clone(&store)).unwrap();
    runtime.start().await.unwrap();

    for text in ["m1", "m2", "m3"] {
        runtime.context.add_message("user", text);
    }
    assert_eq!(runtime.context.get_context().len(), 3);

    let mut changed = AppConfig::default();
    changed.context.max_messages = 2;
    changed.events.priorities.insert("USER_ACTION".into(), 1);
    changed.save_to(&path).unwrap();
    runtime
        .events
        .publish(topics::SETTINGS_CHANGED, Payload::new());

    let context = Arc::clone(&runtime.context);
    eventually(move || context.get_context().len() == 2).await;
    let texts: Vec<String> = runtime
        .context
        .get_context()
        .iter()
        .map(|m| m.content.text())
        .collect();
    assert_eq!(texts, vec!["m2", "m3"]);
    assert_eq!(runtime.events.priority_for("USER_ACTION.CLICK"), 1);
    assert_eq!(store.get().context.max_messages, 2);
    runtime.shutdown().await;
}

// ── Roles ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn role_prompt_leads_every_request_of_a_conversation() {
    let backend = Arc::new(RecordingBackend::default());
    let runtime = Runtime::bootstrap(
        Arc::new(ConfigStore::default()),
        builtin_catalog(),
        backend.clone(),
    )
    .unwrap();
    runtime.start().await.unwrap();
    let mut roles = watch(&runtime, topics::ROLE_SELECTED);
    let mut complete = watch(&runtime, topics::REQUEST_COMPLETE);

    query(&runtime, "can you rephrase this email?");
    next(&mut complete).await;
    query(&runtime, "and the python version?");
    next(&mut complete).await;

    assert_eq!(next(&mut roles).await.payload.str("role_id"), Some("writer"));
    assert_eq!(next(&mut roles).await.payload.str("role_id"), Some("writer"));

    let requests = backend.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    for sent in &requests {
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0].content.text().contains("careful editor"));
    }
    assert_eq!(requests[1].len(), 4);
    runtime.shutdown().await;
}

// ── Failure bookkeeping ──────────────────────────────────────────────────

#[tokio::test]
async fn repeated_plugin_failures_are_reported_and_leave_no_listeners() {
    let mut config = AppConfig::default();
    config.analytics.threshold_count = 3;
    let catalog = PluginCatalog::new().with(StaticFactory::new(
        PluginMetadata::new("half"),
        "tests::half",
        |ctx| {
            Ok(HalfPlugin {
                metadata: PluginMetadata::new("half"),
                ctx: ctx.clone(),
            })
        },
    ));
    let runtime = Runtime::bootstrap(
        Arc::new(ConfigStore::in_memory(config)),
        catalog,
        Arc::new(traymind_agent::EchoBackend::new()),
    )
    .unwrap();
    runtime.start().await.unwrap();
    let mut recurring = watch(&runtime, topics::RECURRING_ERROR);

    for _ in 0..3 {
        assert!(runtime.plugins.get_plugin("half").await.is_err());
    }
    assert_eq!(runtime.events.listener_count(HALF_EVENT), 0);

    let report = next(&mut recurring).await;
    assert_eq!(report.payload.str("pattern"), Some("ERROR_EVENT.PLUGIN_CRASH:half"));
    assert!(report.payload.str("error").unwrap().contains("device went away"));
    runtime.shutdown().await;
}
