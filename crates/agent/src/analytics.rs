//! Error analytics: spot errors that keep coming back.
//!
//! Error events on the bus (`API_FAILURE`, `PLUGIN_CRASH`, `LISTENER_FAILED`)
//! are grouped into patterns by event type and origin (the plugin, backend
//! or event that failed). When one pattern occurs `threshold_count` times
//! within `threshold_timespan_secs`, a `DIAGNOSTIC_EVENT.RECURRING_ERROR`
//! report is published. A reported pattern stays quiet for
//! `report_cooldown_secs`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use tracing::{debug, warn};
use traymind_config::ConfigStore;
use traymind_core::event::{Event, EventDispatcher, Listener, Payload, topics};

/// Error event types the analytics watch.
pub const WATCHED_TOPICS: [&str; 3] = [
    topics::API_FAILURE,
    topics::PLUGIN_CRASH,
    topics::LISTENER_FAILED,
];

/// A recurring error, as published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub pattern: String,
    pub event_type: String,
    pub origin: String,
    /// Message of the first occurrence.
    pub error: String,
    pub count_in_window: usize,
    pub window_secs: u64,
}

impl ErrorReport {
    fn to_payload(&self) -> Payload {
        Payload::new()
            .kwarg("pattern", self.pattern.as_str())
            .kwarg("event_type", self.event_type.as_str())
            .kwarg("origin", self.origin.as_str())
            .kwarg("error", self.error.as_str())
            .kwarg("count", self.count_in_window)
            .kwarg("window_secs", self.window_secs)
    }
}

struct PatternState {
    seen: VecDeque<Instant>,
    last_reported: Option<Instant>,
    first_error: String,
}

pub struct ErrorAnalytics {
    patterns: Mutex<HashMap<String, PatternState>>,
    config: Arc<ConfigStore>,
    events: Arc<EventDispatcher>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ErrorAnalytics {
    /// Build the analyzer and subscribe it to the watched error events.
    pub fn new(events: Arc<EventDispatcher>, config: Arc<ConfigStore>) -> Arc<Self> {
        let analytics = Arc::new(Self {
            patterns: Mutex::new(HashMap::new()),
            config,
            events: Arc::clone(&events),
        });

        for topic in WATCHED_TOPICS {
            let weak: Weak<Self> = Arc::downgrade(&analytics);
            events.subscribe(
                topic,
                Listener::sync(move |event| {
                    if let Some(analytics) = weak.upgrade() {
                        analytics.analyze(event);
                    }
                    Ok(())
                }),
            );
        }
        analytics
    }

    /// Record one error event, publishing a report if it is now recurring.
    pub fn analyze(&self, event: &Event) -> Option<ErrorReport> {
        let origin = ["plugin_name", "backend", "event_type"]
            .into_iter()
            .find_map(|key| event.payload.str(key))
            .unwrap_or("unknown");
        let error = event.payload.str("error").unwrap_or_default();

        let report = self.record(&event.event_type, origin, error, Instant::now())?;
        warn!(
            pattern = %report.pattern,
            count = report.count_in_window,
            window_secs = report.window_secs,
            "Recurring error pattern detected"
        );
        self.events.publish(topics::RECURRING_ERROR, report.to_payload());
        Some(report)
    }

    fn record(&self, event_type: &str, origin: &str, error: &str, now: Instant) -> Option<ErrorReport> {
        let settings = self.config.get().analytics;
        let pattern = format!("{event_type}:{origin}");

        let mut patterns = lock(&self.patterns);
        let state = patterns.entry(pattern.clone()).or_insert_with(|| PatternState {
            seen: VecDeque::new(),
            last_reported: None,
            first_error: error.to_string(),
        });

        state.seen.push_back(now);
        let window = settings.window();
        while state
            .seen
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= window)
        {
            state.seen.pop_front();
        }

        let count = state.seen.len();
        let cooling = state
            .last_reported
            .is_some_and(|at| now.saturating_duration_since(at) < settings.cooldown());
        debug!(pattern = %pattern, count, cooling, "Error occurrence recorded");
        if count < settings.threshold_count || cooling {
            return None;
        }

        state.last_reported = Some(now);
        Some(ErrorReport {
            pattern,
            event_type: event_type.to_string(),
            origin: origin.to_string(),
            error: state.first_error.clone(),
            count_in_window: count,
            window_secs: settings.threshold_timespan_secs,
        })
    }

    /// Occurrences of `pattern` currently inside the window.
    pub fn occurrences(&self, pattern: &str) -> usize {
        lock(&self.patterns).get(pattern).map_or(0, |s| s.seen.len())
    }
}
