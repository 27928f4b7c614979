//! Health and failure ledger.
//!
//! Two stores keyed by tool id: rolling [`ToolHealthRecord`]s with
//! reliability scores and offline flags, and windows of recent
//! [`ErrorEvent`]s (one global, count-capped; one per tool, also
//! count-capped, with failure *counting* evicted by timestamp).
//!
//! The ledger is the only writer of health state.  Dispatcher, executor, and
//! recovery observe it read-only.  Records are backed by [`DashMap`] so
//! concurrent updates from independent calls never lose increments.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{ErrorEvent, FailureSignature};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Rolling health state for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHealthRecord {
    /// Total successful calls.
    pub successes: u64,

    /// Total failed calls.
    pub failures: u64,

    /// Failures since the last success.
    pub consecutive_failures: u32,

    /// When the tool last succeeded.
    pub last_success: Option<DateTime<Utc>>,

    /// When the tool last failed.
    pub last_failure: Option<DateTime<Utc>>,

    /// The tool is excluded from selection until this instant.
    pub offline_until: Option<DateTime<Utc>>,

    /// Learned reliability score in `[0, 1]`.
    pub reliability: f64,

    /// Sum of successful call durations, for average-latency tie-breaks.
    pub total_duration_ms: u64,

    /// Timestamps of failures inside the rolling window (time-evicted).
    #[serde(default)]
    pub failure_times: VecDeque<DateTime<Utc>>,
}

impl Default for ToolHealthRecord {
    fn default() -> Self {
        Self {
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
            offline_until: None,
            reliability: 1.0,
            total_duration_ms: 0,
            failure_times: VecDeque::new(),
        }
    }
}

impl ToolHealthRecord {
    /// Average duration of successful calls in milliseconds.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.successes == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.successes as f64
        }
    }

    /// Success rate over all recorded calls (1.0 when nothing recorded).
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }
}

/// Serializable compact ledger state for shutdown persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    /// Per-tool health records, without the event windows.
    pub records: HashMap<String, ToolHealthRecord>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for the ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Capacity of the global event window.
    pub global_window: usize,

    /// Capacity of each per-tool event window.
    pub per_tool_window: usize,

    /// Age bound for counted per-tool failures.
    pub failure_window: Duration,

    /// Window inside which consecutive failures gate availability.
    pub availability_window: Duration,

    /// Consecutive failures at which a tool stops being available.
    pub consecutive_failure_threshold: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            global_window: 1000,
            per_tool_window: 100,
            failure_window: Duration::from_secs(24 * 3600),
            availability_window: Duration::from_secs(3600),
            consecutive_failure_threshold: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The health/failure ledger.
pub struct HealthLedger {
    config: LedgerConfig,
    records: DashMap<String, ToolHealthRecord>,
    global_events: Mutex<GlobalWindow>,
    per_tool_events: DashMap<String, VecDeque<ErrorEvent>>,
}

struct GlobalWindow {
    events: VecDeque<ErrorEvent>,
    seen_ids: HashSet<Uuid>,
}

impl HealthLedger {
    /// Create a ledger with the given tunables.
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
            global_events: Mutex::new(GlobalWindow {
                events: VecDeque::new(),
                seen_ids: HashSet::new(),
            }),
            per_tool_events: DashMap::new(),
        }
    }

    // -- Write API ----------------------------------------------------------

    /// Record a successful call.
    pub fn record_success(&self, tool_id: &str, duration: Duration) {
        let mut record = self.records.entry(tool_id.to_owned()).or_default();
        record.successes += 1;
        record.consecutive_failures = 0;
        record.last_success = Some(Utc::now());
        record.total_duration_ms += duration.as_millis() as u64;
        record.reliability = (record.reliability + 0.01).min(1.0);

        tracing::trace!(
            tool_id = %tool_id,
            reliability = record.reliability,
            "success recorded"
        );
    }

    /// Record a failure attributed to a tool.
    ///
    /// Idempotent with respect to `event.error_id`: re-recording the same
    /// event neither double-counts nor duplicates it in the windows.
    pub fn record_failure(&self, tool_id: &str, event: &ErrorEvent) {
        if !self.append_event(event) {
            return;
        }

        let now = Utc::now();
        let mut record = self.records.entry(tool_id.to_owned()).or_default();
        record.failures += 1;
        record.consecutive_failures += 1;
        record.last_failure = Some(now);
        record.reliability *= 0.9;
        record.failure_times.push_back(now);
        Self::evict_failure_times(&mut record, self.config.failure_window, now);

        let mut window = self.per_tool_events.entry(tool_id.to_owned()).or_default();
        window.push_back(event.clone());
        while window.len() > self.config.per_tool_window {
            window.pop_front();
        }

        tracing::debug!(
            tool_id = %tool_id,
            consecutive = record.consecutive_failures,
            reliability = record.reliability,
            error_type = %event.error_type,
            "failure recorded"
        );
    }

    /// Record an event that has no owning tool (component-level failure).
    pub fn record_event(&self, event: &ErrorEvent) {
        if let Some(tool_id) = event.tool_id.clone() {
            self.record_failure(&tool_id, event);
        } else {
            self.append_event(event);
        }
    }

    /// Mark a tool offline until the given instant.
    pub fn mark_offline(&self, tool_id: &str, until: DateTime<Utc>) {
        let mut record = self.records.entry(tool_id.to_owned()).or_default();
        record.offline_until = Some(until);
        tracing::warn!(tool_id = %tool_id, until = %until, "tool marked offline");
    }

    /// Clear the offline flag (e.g. when a probe succeeds after the window).
    ///
    /// Does not reset reliability: the tool earns that back per success.
    pub fn clear_offline(&self, tool_id: &str) {
        if let Some(mut record) = self.records.get_mut(tool_id) {
            if record.offline_until.take().is_some() {
                tracing::info!(tool_id = %tool_id, "tool offline flag cleared");
            }
        }
    }

    /// Prune expired failure timestamps and offline flags.
    ///
    /// Driven by a low-priority periodic task.
    pub fn decay(&self) {
        let now = Utc::now();
        for mut entry in self.records.iter_mut() {
            Self::evict_failure_times(&mut entry, self.config.failure_window, now);
            if entry.offline_until.is_some_and(|until| until <= now) {
                entry.offline_until = None;
            }
        }
    }

    fn evict_failure_times(record: &mut ToolHealthRecord, window: Duration, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(24));
        while record.failure_times.front().is_some_and(|t| *t < cutoff) {
            record.failure_times.pop_front();
        }
    }

    /// Append to the global window; returns false on a duplicate id.
    fn append_event(&self, event: &ErrorEvent) -> bool {
        let mut window = self.global_events.lock().expect("ledger lock poisoned");
        if !window.seen_ids.insert(event.error_id) {
            return false;
        }
        window.events.push_back(event.clone());
        while window.events.len() > self.config.global_window {
            if let Some(evicted) = window.events.pop_front() {
                window.seen_ids.remove(&evicted.error_id);
            }
        }
        true
    }

    // -- Read API -----------------------------------------------------------

    /// Whether a tool may be selected: not offline, and not over the
    /// consecutive-failure threshold within the availability window.
    pub fn is_available(&self, tool_id: &str) -> bool {
        let Some(record) = self.records.get(tool_id) else {
            return true;
        };
        let now = Utc::now();

        if record.offline_until.is_some_and(|until| until > now) {
            return false;
        }

        if record.consecutive_failures >= self.config.consecutive_failure_threshold {
            let window = chrono::Duration::from_std(self.config.availability_window)
                .unwrap_or(chrono::Duration::hours(1));
            if record.last_failure.is_some_and(|t| now - t < window) {
                return false;
            }
        }

        true
    }

    /// Learned reliability score (1.0 for unknown tools).
    pub fn reliability(&self, tool_id: &str) -> f64 {
        self.records.get(tool_id).map_or(1.0, |r| r.reliability)
    }

    /// Consecutive failures since the last success.
    pub fn consecutive_failures(&self, tool_id: &str) -> u32 {
        self.records.get(tool_id).map_or(0, |r| r.consecutive_failures)
    }

    /// Number of failures for a tool within `window`, by timestamp.
    pub fn recent_failures(&self, tool_id: &str, window: Duration) -> usize {
        let Some(record) = self.records.get(tool_id) else {
            return 0;
        };
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(1));
        record.failure_times.iter().filter(|t| **t >= cutoff).count()
    }

    /// A copy of the health record for a tool.
    pub fn record(&self, tool_id: &str) -> Option<ToolHealthRecord> {
        self.records.get(tool_id).map(|r| r.clone())
    }

    /// The most recent `limit` events from the global window, newest last.
    pub fn recent_events(&self, limit: usize) -> Vec<ErrorEvent> {
        let window = self.global_events.lock().expect("ledger lock poisoned");
        window
            .events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }

    /// Recent events attributed to one tool, newest last.
    pub fn recent_events_for_tool(&self, tool_id: &str, limit: usize) -> Vec<ErrorEvent> {
        self.per_tool_events.get(tool_id).map_or_else(Vec::new, |window| {
            window
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect()
        })
    }

    /// How many events in the global window share a signature.
    pub fn signature_count(&self, signature: &FailureSignature) -> usize {
        let window = self.global_events.lock().expect("ledger lock poisoned");
        window
            .events
            .iter()
            .filter(|e| e.signature() == *signature)
            .count()
    }

    /// Failures in the global window for one component within `window`.
    pub fn component_failures(&self, component: &str, window: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(1));
        let global = self.global_events.lock().expect("ledger lock poisoned");
        global
            .events
            .iter()
            .filter(|e| e.component == component && e.timestamp >= cutoff)
            .count()
    }

    /// Tool ids with any recorded state.
    pub fn tracked_tools(&self) -> Vec<String> {
        self.records.iter().map(|e| e.key().clone()).collect()
    }

    /// Fraction of events in the global window younger than `window`.
    pub fn recent_error_rate(&self, window: Duration) -> f64 {
        let global = self.global_events.lock().expect("ledger lock poisoned");
        if global.events.is_empty() {
            return 0.0;
        }
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(1));
        let recent = global.events.iter().filter(|e| e.timestamp >= cutoff).count();
        recent as f64 / self.config.global_window as f64
    }

    // -- Persistence --------------------------------------------------------

    /// Export compact state for shutdown persistence.
    pub fn export_state(&self) -> LedgerState {
        LedgerState {
            records: self
                .records
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    /// Restore compact state saved by a previous run.
    pub fn restore(&self, state: LedgerState) {
        for (tool_id, record) in state.records {
            self.records.insert(tool_id, record);
        }
    }
}

impl Default for HealthLedger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ErrorCategory, ErrorSeverity};

    fn failure_event(tool_id: &str) -> ErrorEvent {
        ErrorEvent::new(
            "executor",
            "ToolError",
            "tool returned failure",
            ErrorSeverity::Medium,
            ErrorCategory::Tool,
        )
        .with_call(tool_id, "run", None)
    }

    #[test]
    fn reliability_decays_and_recovers() {
        let ledger = HealthLedger::default();

        ledger.record_failure("alpha", &failure_event("alpha"));
        let after_failure = ledger.reliability("alpha");
        assert!((after_failure - 0.9).abs() < 1e-9);

        ledger.record_success("alpha", Duration::from_millis(100));
        let after_success = ledger.reliability("alpha");
        assert!((after_success - 0.91).abs() < 1e-9);
    }

    #[test]
    fn reliability_is_capped_at_one() {
        let ledger = HealthLedger::default();
        for _ in 0..200 {
            ledger.record_success("alpha", Duration::from_millis(1));
        }
        assert!((ledger.reliability("alpha") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn consecutive_failures_gate_availability() {
        let ledger = HealthLedger::default();
        assert!(ledger.is_available("alpha"));

        for _ in 0..3 {
            ledger.record_failure("alpha", &failure_event("alpha"));
        }
        assert!(!ledger.is_available("alpha"));

        // A success resets the streak.
        ledger.record_success("alpha", Duration::from_millis(5));
        assert!(ledger.is_available("alpha"));
    }

    #[test]
    fn offline_flag_blocks_availability_until_expiry() {
        let ledger = HealthLedger::default();

        ledger.mark_offline("alpha", Utc::now() + chrono::Duration::minutes(5));
        assert!(!ledger.is_available("alpha"));

        // An expired flag no longer blocks.
        ledger.mark_offline("beta", Utc::now() - chrono::Duration::seconds(1));
        assert!(ledger.is_available("beta"));

        ledger.clear_offline("alpha");
        assert!(ledger.is_available("alpha"));
    }

    #[test]
    fn recording_is_idempotent_per_error_id() {
        let ledger = HealthLedger::default();
        let event = failure_event("alpha");

        ledger.record_failure("alpha", &event);
        ledger.record_failure("alpha", &event);

        let record = ledger.record("alpha").unwrap();
        assert_eq!(record.failures, 1);
        assert_eq!(ledger.recent_events(10).len(), 1);
    }

    #[test]
    fn global_window_is_count_capped() {
        let ledger = HealthLedger::new(LedgerConfig {
            global_window: 5,
            ..LedgerConfig::default()
        });

        for _ in 0..10 {
            ledger.record_failure("alpha", &failure_event("alpha"));
        }
        assert_eq!(ledger.recent_events(100).len(), 5);
    }

    #[test]
    fn per_tool_window_is_capped() {
        let ledger = HealthLedger::new(LedgerConfig {
            per_tool_window: 3,
            ..LedgerConfig::default()
        });

        for _ in 0..6 {
            ledger.record_failure("alpha", &failure_event("alpha"));
        }
        assert_eq!(ledger.recent_events_for_tool("alpha", 100).len(), 3);
    }

    #[test]
    fn signature_counting() {
        let ledger = HealthLedger::default();
        for _ in 0..3 {
            ledger.record_failure("alpha", &failure_event("alpha"));
        }
        ledger.record_failure("beta", &failure_event("beta"));

        let sig = failure_event("alpha").signature();
        assert_eq!(ledger.signature_count(&sig), 3);
    }

    #[test]
    fn component_failures_counted_in_window() {
        let ledger = HealthLedger::default();
        for _ in 0..4 {
            ledger.record_event(&ErrorEvent::new(
                "listener",
                "NetworkError",
                "socket closed",
                ErrorSeverity::Medium,
                ErrorCategory::Network,
            ));
        }

        assert_eq!(ledger.component_failures("listener", Duration::from_secs(3600)), 4);
        assert_eq!(ledger.component_failures("executor", Duration::from_secs(3600)), 0);
    }

    #[test]
    fn state_roundtrip() {
        let ledger = HealthLedger::default();
        ledger.record_failure("alpha", &failure_event("alpha"));
        ledger.record_success("alpha", Duration::from_millis(20));

        let state = ledger.export_state();
        let json = serde_json::to_string(&state).unwrap();
        let parsed: LedgerState = serde_json::from_str(&json).unwrap();

        let restored = HealthLedger::default();
        restored.restore(parsed);
        assert_eq!(restored.record("alpha").unwrap().successes, 1);
        assert!((restored.reliability("alpha") - ledger.reliability("alpha")).abs() < 1e-9);
    }

    #[test]
    fn avg_duration_tracks_successes() {
        let ledger = HealthLedger::default();
        ledger.record_success("alpha", Duration::from_millis(100));
        ledger.record_success("alpha", Duration::from_millis(300));

        let record = ledger.record("alpha").unwrap();
        assert!((record.avg_duration_ms() - 200.0).abs() < 1e-9);
    }
}
