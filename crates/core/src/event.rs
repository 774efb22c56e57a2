//! Event dispatcher: the priority-ordered publish/subscribe backbone.
//!
//! Every component talks to every other component through this bus.
//! Producers call [`EventDispatcher::publish`], which only enqueues and never
//! waits; a single background task drains the queue in
//! `(priority, sequence)` order and fans each event out to its listeners.
//!
//! Event types are dot-delimited hierarchical names such as
//! `"UI_EVENT.OPEN_CHAT"`. Priorities are resolved from the most specific
//! configured prefix (`"UI_EVENT.OPEN_CHAT"`, then `"UI_EVENT"`), falling back
//! to the `DEFAULT` entry. Lower numbers dispatch first.
//!
//! The bus is a fault barrier: a listener that returns an error or panics is
//! logged and skipped, and the loop keeps running.

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ListenerError};

/// Well-known event types exchanged between components.
pub mod topics {
    pub const QUERY_RECEIVED: &str = "AGENT_EVENT.QUERY_RECEIVED";
    pub const CLEAR_CONTEXT: &str = "AGENT_EVENT.CLEAR_CONTEXT";
    pub const SCREEN_CAPTURE: &str = "PLUGIN_EVENT.SCREEN_CAPTURE";
    pub const SCREEN_CAPTURED: &str = "PLUGIN_EVENT.SCREEN_CAPTURED";
    pub const PLUGIN_LOADED: &str = "PLUGIN_EVENT.LOADED";
    pub const PLUGIN_CRASH: &str = "ERROR_EVENT.PLUGIN_CRASH";
    pub const RESPONSE_CHUNK: &str = "API_EVENT.RESPONSE_CHUNK";
    pub const REQUEST_COMPLETE: &str = "API_EVENT.REQUEST_COMPLETE";
    pub const ROLE_SELECTED: &str = "API_EVENT.ROLE_SELECTED";
    pub const API_FAILURE: &str = "ERROR_EVENT.API_FAILURE";
    pub const BRANCH_CHANGED: &str = "CONTEXT_EVENT.BRANCH_CHANGED";
    pub const SETTINGS_CHANGED: &str = "UI_EVENT.SETTINGS_CHANGED";
    pub const OPEN_CHAT: &str = "UI_EVENT.OPEN_CHAT";
    pub const NOTIFY_ERROR: &str = "NOTIFICATION_EVENT.ERROR";
    pub const LISTENER_FAILED: &str = "DIAGNOSTIC_EVENT.LISTENER_FAILED";
    pub const RECURRING_ERROR: &str = "DIAGNOSTIC_EVENT.RECURRING_ERROR";
    pub const DEMO_GREET: &str = "DEMO_EVENT.GREET";
    pub const DEMO_GREETING_SENT: &str = "DEMO_EVENT.GREETING_SENT";

    /// Category of diagnostics emitted by the dispatcher itself.
    pub const DIAGNOSTIC_CATEGORY: &str = "DIAGNOSTIC_EVENT";
}

// ── Payload & envelope ────────────────────────────────────────────────────

/// Positional and keyword arguments carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    /// A string keyword argument, if present and a string.
    pub fn str(&self, key: &str) -> Option<&str> {
        self.kwargs.get(key).and_then(Value::as_str)
    }

    /// A string keyword argument the listener cannot work without.
    pub fn require_str(&self, key: &str) -> Result<&str, ListenerError> {
        self.str(key)
            .ok_or_else(|| ListenerError(format!("missing string argument '{key}'")))
    }
}

/// A dequeued event as seen by listeners.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub priority: i64,
    pub sequence: u64,
    pub payload: Payload,
}

struct QueuedEvent(Event);

impl QueuedEvent {
    fn priority(&self) -> i64 {
        self.0.priority
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.sequence == other.0.sequence
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    // BinaryHeap is a max-heap: the smallest (priority, sequence) must compare greatest.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .0
            .priority
            .cmp(&self.0.priority)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

// ── Listeners ─────────────────────────────────────────────────────────────

pub type ListenerResult = Result<(), ListenerError>;

type SyncHandler = dyn Fn(&Event) -> ListenerResult + Send + Sync;
type AsyncHandler = dyn Fn(Arc<Event>) -> BoxFuture<'static, ListenerResult> + Send + Sync;

/// A subscribed callback, synchronous or asynchronous.
///
/// The handle is cheap to clone; clones share identity, which is what
/// [`EventDispatcher::unsubscribe`] matches on.
#[derive(Clone)]
pub enum Listener {
    Sync(Arc<SyncHandler>),
    Async(Arc<AsyncHandler>),
}

impl Listener {
    /// Wrap a synchronous callback. It runs inline on the dispatcher task.
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(&Event) -> ListenerResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(handler))
    }

    /// Wrap an asynchronous callback. It runs as its own task, concurrently
    /// with the other async listeners of the same event.
    pub fn asynchronous<F, Fut>(handler: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ListenerResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |event| Box::pin(handler(event))))
    }

    fn same_as(&self, other: &Listener) -> bool {
        match (self, other) {
            (Self::Sync(a), Self::Sync(b)) => Arc::ptr_eq(a, b),
            (Self::Async(a), Self::Async(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Listener::Sync"),
            Self::Async(_) => f.write_str("Listener::Async"),
        }
    }
}

// ── Priorities ────────────────────────────────────────────────────────────

/// Prefix → priority table with a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPriorities {
    table: HashMap<String, i64>,
    default: i64,
}

impl EventPriorities {
    /// Key of the fallback entry in a configured table.
    pub const DEFAULT_KEY: &'static str = "DEFAULT";

    /// Fallback used when a table has no `DEFAULT` entry.
    pub const FALLBACK: i64 = 50;

    /// Build from a configured table; its `DEFAULT` entry becomes the default.
    pub fn from_map(mut table: HashMap<String, i64>) -> Self {
        let default = table.remove(Self::DEFAULT_KEY).unwrap_or(Self::FALLBACK);
        Self { table, default }
    }

    pub fn with_default(default: i64) -> Self {
        Self {
            table: HashMap::new(),
            default,
        }
    }

    pub fn set(&mut self, prefix: impl Into<String>, priority: i64) {
        self.table.insert(prefix.into(), priority);
    }

    pub fn default_priority(&self) -> i64 {
        self.default
    }

    /// Resolve a priority, most specific dotted prefix first.
    pub fn resolve(&self, event_type: &str) -> i64 {
        let mut candidate = event_type;
        loop {
            if let Some(priority) = self.table.get(candidate) {
                return *priority;
            }
            match candidate.rfind('.') {
                Some(idx) => candidate = &candidate[..idx],
                None => return self.default,
            }
        }
    }
}

impl Default for EventPriorities {
    fn default() -> Self {
        Self::with_default(Self::FALLBACK)
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────

/// Runtime knobs for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// How long `stop()` waits for the loop task to wind down.
    pub stop_timeout: Duration,

    /// Publish `DIAGNOSTIC_EVENT.LISTENER_FAILED` when a listener fails.
    pub report_listener_errors: bool,

    /// After this many consecutive dequeues at one priority, let one pending
    /// event of another priority through. `None` keeps strict ordering.
    pub max_consecutive_same_priority: Option<usize>,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(2),
            report_listener_errors: true,
            max_consecutive_same_priority: None,
        }
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedEvent>,
    /// Priority of the last dequeued event and how many in a row shared it.
    streak: Option<(i64, usize)>,
}

struct Shared {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    queue: Mutex<QueueState>,
    wakeup: Notify,
    sequence: AtomicU64,
    priorities: RwLock<EventPriorities>,
    options: DispatcherOptions,
}

/// The priority-queued async event bus.
pub struct EventDispatcher {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventDispatcher {
    pub fn new(priorities: EventPriorities, options: DispatcherOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                listeners: RwLock::new(HashMap::new()),
                queue: Mutex::new(QueueState::default()),
                wakeup: Notify::new(),
                sequence: AtomicU64::new(0),
                priorities: RwLock::new(priorities),
                options,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn with_priorities(priorities: EventPriorities) -> Self {
        Self::new(priorities, DispatcherOptions::default())
    }

    /// Register a listener for an event type.
    pub fn subscribe(&self, event_type: impl Into<String>, listener: Listener) {
        let event_type = event_type.into();
        debug!(event_type = %event_type, ?listener, "Listener subscribed");
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(listener);
    }

    /// Remove one registration of `listener`. Unknown listeners are ignored.
    pub fn unsubscribe(&self, event_type: &str, listener: &Listener) {
        let mut listeners = self
            .shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(registered) = listeners.get_mut(event_type) {
            if let Some(pos) = registered.iter().position(|l| l.same_as(listener)) {
                registered.remove(pos);
            }
            if registered.is_empty() {
                listeners.remove(event_type);
            }
        }
    }

    /// Enqueue an event and return immediately.
    ///
    /// Safe to call from any thread, including threads outside the runtime.
    pub fn publish(&self, event_type: impl Into<String>, payload: Payload) {
        self.shared.publish(event_type.into(), payload);
    }

    /// Spawn the dispatch loop on the current Tokio runtime.
    pub fn start(&self) -> Result<(), Error> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("event dispatcher needs a Tokio runtime: {e}")))?;

        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("Event dispatcher already running");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        *task = Some(runtime.spawn(async move { shared.run().await }));
        info!(pending = self.pending(), "Event dispatcher started");
        Ok(())
    }

    /// Cancel the dispatch loop and wait (bounded) for it to finish.
    ///
    /// Events published afterwards stay queued until the next `start()`.
    pub async fn stop(&self) {
        let Some(handle) = lock(&self.task).take() else {
            return;
        };
        handle.abort();
        match tokio::time::timeout(self.shared.options.stop_timeout, handle).await {
            Ok(Ok(())) => info!("Event dispatcher stopped"),
            Ok(Err(e)) if e.is_cancelled() => info!("Event dispatcher stopped"),
            Ok(Err(e)) => warn!(error = %e, "Event dispatcher task ended abnormally"),
            Err(_) => warn!(
                timeout_ms = self.shared.options.stop_timeout.as_millis() as u64,
                "Event dispatcher did not stop within timeout"
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of events waiting to be dispatched.
    pub fn pending(&self) -> usize {
        lock(&self.shared.queue).heap.len()
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.shared
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// The priority an event of this type would be queued with.
    pub fn priority_for(&self, event_type: &str) -> i64 {
        self.shared
            .priorities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(event_type)
    }

    /// Swap the priority table. Already-queued events keep their priority.
    pub fn set_priorities(&self, priorities: EventPriorities) {
        *self
            .shared
            .priorities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = priorities;
        info!("Event priorities updated");
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(EventPriorities::default(), DispatcherOptions::default())
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

impl Shared {
    fn publish(&self, event_type: String, payload: Payload) {
        let priority = self
            .priorities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(&event_type);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        debug!(event_type = %event_type, priority, sequence, "Event queued");

        lock(&self.queue).heap.push(QueuedEvent(Event {
            event_type,
            priority,
            sequence,
            payload,
        }));
        self.wakeup.notify_one();
    }

    async fn run(self: Arc<Self>) {
        loop {
            match self.next_event() {
                Some(event) => self.dispatch(event).await,
                None => self.wakeup.notified().await,
            }
        }
    }

    fn next_event(&self) -> Option<Event> {
        let mut guard = lock(&self.queue);
        let state = &mut *guard;
        let mut next = state.heap.pop()?;

        if let (Some(max), Some((priority, count))) =
            (self.options.max_consecutive_same_priority, state.streak)
        {
            if next.priority() == priority && count >= max.max(1) {
                if let Some(other) = take_other_priority(&mut state.heap, priority) {
                    debug!(
                        starved_priority = other.priority(),
                        streak = count,
                        "Starvation guard let a lower-urgency event through"
                    );
                    state.heap.push(next);
                    next = other;
                }
            }
        }

        state.streak = match state.streak {
            Some((priority, count)) if priority == next.priority() => Some((priority, count + 1)),
            _ => Some((next.priority(), 1)),
        };
        Some(next.0)
    }

    async fn dispatch(self: &Arc<Self>, event: Event) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        if listeners.is_empty() {
            debug!(event_type = %event.event_type, "No listeners for event");
            return;
        }

        let event = Arc::new(event);
        let mut pending = Vec::new();

        for listener in listeners {
            match listener {
                Listener::Sync(handler) => {
                    match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&*event))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => self.listener_failed(&event, e.to_string()),
                        Err(panic) => self.listener_failed(&event, panic_message(panic.as_ref())),
                    }
                }
                Listener::Async(handler) => {
                    let event = Arc::clone(&event);
                    pending.push(tokio::spawn(async move { handler(event).await }));
                }
            }
        }

        for outcome in futures::future::join_all(pending).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.listener_failed(&event, e.to_string()),
                Err(e) if e.is_panic() => {
                    self.listener_failed(&event, panic_message(e.into_panic().as_ref()))
                }
                Err(e) => self.listener_failed(&event, e.to_string()),
            }
        }
    }

    fn listener_failed(&self, event: &Event, reason: String) {
        error!(event_type = %event.event_type, error = %reason, "Event listener failed");

        let is_diagnostic = event
            .event_type
            .split('.')
            .next()
            .is_some_and(|category| category == topics::DIAGNOSTIC_CATEGORY);
        if self.options.report_listener_errors && !is_diagnostic {
            self.publish(
                topics::LISTENER_FAILED.to_string(),
                Payload::new()
                    .kwarg("event_type", event.event_type.clone())
                    .kwarg("error", reason),
            );
        }
    }
}

/// Pop the best queued event whose priority differs from `priority`,
/// leaving everything else in the heap.
fn take_other_priority(heap: &mut BinaryHeap<QueuedEvent>, priority: i64) -> Option<QueuedEvent> {
    let mut held = Vec::new();
    let mut found = None;
    while let Some(candidate) = heap.pop() {
        if candidate.priority() != priority {
            found = Some(candidate);
            break;
        }
        held.push(candidate);
    }
    heap.extend(held);
    found
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("listener panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("listener panicked: {msg}")
    } else {
        "listener panicked".to_string()
    }
}
