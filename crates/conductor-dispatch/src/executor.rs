//! Tiered fallback executor.
//!
//! Per capability, holds an ordered strategy list spanning four tiers:
//! primary (specialist tool), secondary (composition of basic tools),
//! fallback (offline/cached synthesis), and emergency (user-assistance or
//! skeleton answer).  Strategies are tried in tier order, sub-sorted by
//! current success rate and consecutive failures, each attempt bounded by
//! the strategy's timeout.  The first success short-circuits the chain and
//! the result carries the full attempt log.
//!
//! A strategy auto-disables after repeated consecutive failures and
//! re-enables after a cooldown, except that the last enabled
//! fallback-or-emergency strategy of a capability is never disabled: the
//! system always keeps a line of defense.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use conductor_health::{ErrorClassifier, HealthLedger};
use conductor_registry::{CallOutcome, Tier};

use crate::error::{DispatchError, Result};

// ---------------------------------------------------------------------------
// Request and runner
// ---------------------------------------------------------------------------

/// The input handed to every strategy of a capability.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    /// The capability tag being served.
    pub capability: String,

    /// The primary textual input (question, code, task description).
    pub query: String,

    /// The full parameter map of the originating call.
    pub input: serde_json::Map<String, Value>,
}

impl CapabilityRequest {
    /// Create a request with an empty parameter map.
    pub fn new(capability: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            query: query.into(),
            input: serde_json::Map::new(),
        }
    }

    /// Attach the originating call's parameters (builder style).
    #[must_use]
    pub fn with_input(mut self, input: serde_json::Map<String, Value>) -> Self {
        self.input = input;
        self
    }
}

/// One way of serving a capability.
#[async_trait]
pub trait StrategyRunner: Send + Sync {
    /// Attempt the capability.  `Err` carries the failure reason; timeouts
    /// are enforced by the executor, not the runner.
    async fn run(&self, request: &CapabilityRequest) -> std::result::Result<Value, String>;
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Mutable per-strategy statistics.
#[derive(Debug, Clone)]
pub struct StrategyStats {
    pub executions: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub enabled: bool,
    disabled_until: Option<Instant>,
}

impl Default for StrategyStats {
    fn default() -> Self {
        Self {
            executions: 0,
            successes: 0,
            success_rate: 1.0,
            consecutive_failures: 0,
            enabled: true,
            disabled_until: None,
        }
    }
}

/// A registered strategy.
pub struct Strategy {
    /// Unique id (e.g. "web_search_primary").
    pub id: String,

    /// Human-readable name for logs and reports.
    pub name: String,

    /// Position in the fallback ordering.
    pub tier: Tier,

    /// Per-attempt timeout budget.
    pub timeout: Duration,

    /// Extra attempts after the first, within this strategy.
    pub max_retries: u32,

    /// The tool this strategy is backed by, for health attribution.
    pub tool_id: Option<String>,

    runner: Arc<dyn StrategyRunner>,
    stats: Mutex<StrategyStats>,
}

impl Strategy {
    /// Create a strategy with no retries and no tool attribution.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tier: Tier,
        timeout: Duration,
        runner: Arc<dyn StrategyRunner>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tier,
            timeout,
            max_retries: 0,
            tool_id: None,
            runner,
            stats: Mutex::new(StrategyStats::default()),
        }
    }

    /// Attribute this strategy to a tool (builder style).
    #[must_use]
    pub fn with_tool(mut self, tool_id: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self
    }

    /// Allow retries within this strategy (builder style).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Snapshot of the strategy's statistics.
    pub fn stats(&self) -> StrategyStats {
        self.stats.lock().expect("strategy lock poisoned").clone()
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One attempt in the execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub strategy: String,
    pub tier: Tier,
    pub outcome: CallOutcome,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The result of executing a capability through the tier chain.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub capability: String,
    pub outcome: CallOutcome,
    pub payload: Option<Value>,
    pub error: Option<String>,
    pub strategy_used: Option<String>,
    pub tier: Option<Tier>,
    /// Every attempt made, including the winning one, in order.
    pub attempts: Vec<AttemptRecord>,
}

/// Serializable strategy statistics for shutdown persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorState {
    /// Strategy id -> persisted statistics.
    pub strategies: HashMap<String, PersistedStrategyStats>,
}

/// The subset of [`StrategyStats`] worth carrying across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStrategyStats {
    pub executions: u64,
    pub successes: u64,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Tunables for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Consecutive failures at which a strategy auto-disables.
    pub auto_disable_threshold: u32,

    /// How long a disabled strategy stays out before re-enabling.
    pub cooldown: Duration,

    /// Floor applied to the success rate of a strategy that cannot be
    /// disabled (last line of defense).
    pub success_rate_floor: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            auto_disable_threshold: 5,
            cooldown: Duration::from_secs(300),
            success_rate_floor: 0.05,
        }
    }
}

/// The tiered fallback executor.
pub struct TieredExecutor {
    strategies: RwLock<HashMap<String, Vec<Arc<Strategy>>>>,
    config: ExecutorConfig,
    ledger: Arc<HealthLedger>,
    classifier: ErrorClassifier,
}

impl TieredExecutor {
    /// Create an executor recording outcomes into the given ledger.
    pub fn new(ledger: Arc<HealthLedger>, config: ExecutorConfig) -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            config,
            ledger,
            classifier: ErrorClassifier::new(),
        }
    }

    /// Register the strategy list for a capability.
    ///
    /// Rejects lists without at least one fallback-or-emergency strategy:
    /// every advertised capability must keep a last line of defense.
    pub fn register(&self, capability: impl Into<String>, strategies: Vec<Strategy>) -> Result<()> {
        let capability = capability.into();
        let has_last_line = strategies
            .iter()
            .any(|s| matches!(s.tier, Tier::Fallback | Tier::Emergency));
        if !has_last_line {
            return Err(DispatchError::NoLastLineOfDefense { capability });
        }

        tracing::info!(
            capability = %capability,
            count = strategies.len(),
            "strategy list registered"
        );

        self.strategies
            .write()
            .expect("executor lock poisoned")
            .insert(capability, strategies.into_iter().map(Arc::new).collect());
        Ok(())
    }

    /// Capabilities with a registered strategy list.
    pub fn capabilities(&self) -> Vec<String> {
        self.strategies
            .read()
            .expect("executor lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Execute a capability through its tier chain.
    pub async fn execute(&self, request: &CapabilityRequest) -> Result<ExecutionReport> {
        let all = {
            let strategies = self.strategies.read().expect("executor lock poisoned");
            strategies
                .get(&request.capability)
                .cloned()
                .ok_or_else(|| DispatchError::UnknownCapability {
                    capability: request.capability.clone(),
                })?
        };

        let mut eligible: Vec<Arc<Strategy>> = all
            .iter()
            .filter(|s| self.refresh_enabled(s))
            .cloned()
            .collect();

        // Tier order first, then the healthiest strategy within each tier.
        eligible.sort_by(|a, b| {
            a.tier.cmp(&b.tier).then_with(|| {
                let sa = a.stats();
                let sb = b.stats();
                sb.success_rate
                    .partial_cmp(&sa.success_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(sa.consecutive_failures.cmp(&sb.consecutive_failures))
            })
        });

        let mut attempts = Vec::new();

        for strategy in &eligible {
            for attempt in 0..=strategy.max_retries {
                let started = Instant::now();
                let outcome =
                    tokio::time::timeout(strategy.timeout, strategy.runner.run(request)).await;
                let duration = started.elapsed();

                match outcome {
                    Ok(Ok(payload)) => {
                        attempts.push(AttemptRecord {
                            strategy: strategy.id.clone(),
                            tier: strategy.tier,
                            outcome: CallOutcome::Success,
                            duration_ms: duration.as_millis() as u64,
                            error: None,
                        });
                        self.record_outcome(strategy, &all, true);
                        if let Some(tool_id) = &strategy.tool_id {
                            self.ledger.record_success(tool_id, duration);
                        }

                        tracing::info!(
                            capability = %request.capability,
                            strategy = %strategy.id,
                            tier = strategy.tier.label(),
                            "capability served"
                        );

                        return Ok(ExecutionReport {
                            capability: request.capability.clone(),
                            outcome: CallOutcome::Success,
                            payload: Some(payload),
                            error: None,
                            strategy_used: Some(strategy.id.clone()),
                            tier: Some(strategy.tier),
                            attempts,
                        });
                    }
                    Ok(Err(reason)) => {
                        tracing::warn!(
                            strategy = %strategy.id,
                            attempt,
                            error = %reason,
                            "strategy attempt failed"
                        );
                        attempts.push(AttemptRecord {
                            strategy: strategy.id.clone(),
                            tier: strategy.tier,
                            outcome: CallOutcome::Failure,
                            duration_ms: duration.as_millis() as u64,
                            error: Some(reason.clone()),
                        });
                        self.record_outcome(strategy, &all, false);
                        self.record_ledger_failure(strategy, "StrategyFailure", &reason);
                    }
                    Err(_elapsed) => {
                        tracing::warn!(
                            strategy = %strategy.id,
                            attempt,
                            timeout = ?strategy.timeout,
                            "strategy attempt timed out"
                        );
                        let reason = format!("timed out after {:?}", strategy.timeout);
                        attempts.push(AttemptRecord {
                            strategy: strategy.id.clone(),
                            tier: strategy.tier,
                            outcome: CallOutcome::Timeout,
                            duration_ms: duration.as_millis() as u64,
                            error: Some(reason.clone()),
                        });
                        self.record_outcome(strategy, &all, false);
                        self.record_ledger_failure(strategy, "TimeoutError", &reason);
                    }
                }
            }
        }

        Ok(ExecutionReport {
            capability: request.capability.clone(),
            outcome: CallOutcome::Failure,
            payload: None,
            error: Some(format!(
                "all strategies exhausted for capability {}",
                request.capability
            )),
            strategy_used: None,
            tier: None,
            attempts,
        })
    }

    /// Export strategy statistics for shutdown persistence.
    pub fn export_state(&self) -> ExecutorState {
        let strategies = self.strategies.read().expect("executor lock poisoned");
        let mut out = HashMap::new();
        for list in strategies.values() {
            for strategy in list {
                let stats = strategy.stats();
                out.insert(
                    strategy.id.clone(),
                    PersistedStrategyStats {
                        executions: stats.executions,
                        successes: stats.successes,
                        success_rate: stats.success_rate,
                        consecutive_failures: stats.consecutive_failures,
                        enabled: stats.enabled,
                    },
                );
            }
        }
        ExecutorState { strategies: out }
    }

    /// Restore statistics saved by a previous run, matched by strategy id.
    pub fn restore(&self, state: ExecutorState) {
        let strategies = self.strategies.read().expect("executor lock poisoned");
        for list in strategies.values() {
            for strategy in list {
                if let Some(saved) = state.strategies.get(&strategy.id) {
                    let mut stats = strategy.stats.lock().expect("strategy lock poisoned");
                    stats.executions = saved.executions;
                    stats.successes = saved.successes;
                    stats.success_rate = saved.success_rate;
                    stats.consecutive_failures = saved.consecutive_failures;
                    stats.enabled = saved.enabled;
                    stats.disabled_until = None;
                }
            }
        }
    }

    // -- Private helpers ----------------------------------------------------

    /// Re-enable strategies whose cooldown has elapsed; return whether the
    /// strategy is currently usable.
    fn refresh_enabled(&self, strategy: &Strategy) -> bool {
        let mut stats = strategy.stats.lock().expect("strategy lock poisoned");
        if !stats.enabled {
            if stats.disabled_until.is_some_and(|until| Instant::now() >= until) {
                stats.enabled = true;
                stats.consecutive_failures = 0;
                stats.disabled_until = None;
                tracing::info!(strategy = %strategy.id, "strategy re-enabled after cooldown");
            }
        }
        stats.enabled
    }

    fn record_outcome(&self, strategy: &Strategy, siblings: &[Arc<Strategy>], success: bool) {
        // Check the invariant before taking this strategy's lock: sibling
        // stats are locked one at a time, never nested.
        let last_line = !success && self.is_last_line(strategy, siblings);

        let mut stats = strategy.stats.lock().expect("strategy lock poisoned");
        stats.executions += 1;
        if success {
            stats.successes += 1;
            stats.consecutive_failures = 0;
        } else {
            stats.consecutive_failures += 1;
        }
        stats.success_rate = stats.successes as f64 / stats.executions as f64;

        if !success && stats.consecutive_failures >= self.config.auto_disable_threshold {
            if last_line {
                // Refused: the last fallback/emergency strategy stays
                // enabled with a floored success rate.
                stats.success_rate = stats.success_rate.max(self.config.success_rate_floor);
                tracing::warn!(
                    strategy = %strategy.id,
                    "disable refused, strategy is the last line of defense"
                );
            } else {
                stats.enabled = false;
                stats.disabled_until = Some(Instant::now() + self.config.cooldown);
                tracing::warn!(
                    strategy = %strategy.id,
                    consecutive = stats.consecutive_failures,
                    cooldown = ?self.config.cooldown,
                    "strategy auto-disabled"
                );
            }
        }
    }

    /// Whether disabling this strategy would leave the capability with no
    /// enabled fallback-or-emergency strategy.
    fn is_last_line(&self, strategy: &Strategy, siblings: &[Arc<Strategy>]) -> bool {
        if !matches!(strategy.tier, Tier::Fallback | Tier::Emergency) {
            return false;
        }
        !siblings.iter().any(|other| {
            other.id != strategy.id
                && matches!(other.tier, Tier::Fallback | Tier::Emergency)
                && other.stats().enabled
        })
    }

    fn record_ledger_failure(&self, strategy: &Strategy, error_type: &str, reason: &str) {
        let recent = self
            .ledger
            .component_failures("executor", Duration::from_secs(3600));
        let event = self.classifier.event(
            "executor",
            error_type,
            reason,
            strategy.tool_id.as_deref(),
            strategy.tool_id.as_ref().map(|_| strategy.id.as_str()),
            None,
            recent,
        );
        self.ledger.record_event(&event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_health::LedgerConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct OkRunner(Value);

    #[async_trait]
    impl StrategyRunner for OkRunner {
        async fn run(&self, _request: &CapabilityRequest) -> std::result::Result<Value, String> {
            Ok(self.0.clone())
        }
    }

    struct FailRunner;

    #[async_trait]
    impl StrategyRunner for FailRunner {
        async fn run(&self, _request: &CapabilityRequest) -> std::result::Result<Value, String> {
            Err("simulated failure".to_owned())
        }
    }

    struct HangRunner;

    #[async_trait]
    impl StrategyRunner for HangRunner {
        async fn run(&self, _request: &CapabilityRequest) -> std::result::Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(json!({}))
        }
    }

    /// Fails a fixed number of times, then succeeds.
    struct FlakyRunner {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl StrategyRunner for FlakyRunner {
        async fn run(&self, _request: &CapabilityRequest) -> std::result::Result<Value, String> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                Err("flaky".to_owned())
            } else {
                Ok(json!({"ok": true}))
            }
        }
    }

    fn executor() -> TieredExecutor {
        TieredExecutor::new(
            Arc::new(HealthLedger::new(LedgerConfig::default())),
            ExecutorConfig::default(),
        )
    }

    fn strategy(id: &str, tier: Tier, runner: Arc<dyn StrategyRunner>) -> Strategy {
        Strategy::new(id, id, tier, Duration::from_millis(200), runner)
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let exec = executor();
        exec.register(
            "web_search",
            vec![
                strategy("primary", Tier::Primary, Arc::new(OkRunner(json!({"hit": 1})))),
                strategy("fallback", Tier::Fallback, Arc::new(OkRunner(json!({"hit": 2})))),
            ],
        )
        .unwrap();

        let report = exec
            .execute(&CapabilityRequest::new("web_search", "rust"))
            .await
            .unwrap();

        assert_eq!(report.outcome, CallOutcome::Success);
        assert_eq!(report.tier, Some(Tier::Primary));
        assert_eq!(report.strategy_used.as_deref(), Some("primary"));
        assert_eq!(report.attempts.len(), 1);
    }

    // Scenario S4: primary timeout escalates to the secondary tier.
    #[tokio::test]
    async fn timeout_escalates_to_secondary_tier() {
        let exec = executor();
        exec.register(
            "web_search",
            vec![
                strategy("primary", Tier::Primary, Arc::new(HangRunner))
                    .with_max_retries(1)
                    .with_tool("mcp-deepsearch"),
                strategy("secondary", Tier::Secondary, Arc::new(OkRunner(json!({"via": "sandbox"})))),
                strategy("fallback", Tier::Fallback, Arc::new(OkRunner(json!({"cached": true})))),
            ],
        )
        .unwrap();

        let report = exec
            .execute(&CapabilityRequest::new("web_search", "rust news"))
            .await
            .unwrap();

        assert_eq!(report.outcome, CallOutcome::Success);
        assert_eq!(report.tier, Some(Tier::Secondary));
        // Two primary timeouts (first try + one retry), then the secondary.
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.attempts[0].outcome, CallOutcome::Timeout);
        assert_eq!(report.attempts[1].outcome, CallOutcome::Timeout);
    }

    #[tokio::test]
    async fn all_strategies_failing_reports_failure_with_log() {
        let exec = executor();
        exec.register(
            "deep_research",
            vec![
                strategy("primary", Tier::Primary, Arc::new(FailRunner)),
                strategy("fallback", Tier::Fallback, Arc::new(FailRunner)),
            ],
        )
        .unwrap();

        let report = exec
            .execute(&CapabilityRequest::new("deep_research", "anything"))
            .await
            .unwrap();

        assert_eq!(report.outcome, CallOutcome::Failure);
        assert!(report.payload.is_none());
        assert!(report.error.is_some());
        assert_eq!(report.attempts.len(), 2);
    }

    #[tokio::test]
    async fn strategy_auto_disables_after_consecutive_failures() {
        let exec = executor();
        exec.register(
            "web_search",
            vec![
                strategy("primary", Tier::Primary, Arc::new(FailRunner)),
                strategy("fallback", Tier::Fallback, Arc::new(OkRunner(json!({})))),
            ],
        )
        .unwrap();

        for _ in 0..5 {
            exec.execute(&CapabilityRequest::new("web_search", "x"))
                .await
                .unwrap();
        }

        // After 5 consecutive failures the primary is out of rotation.
        let report = exec
            .execute(&CapabilityRequest::new("web_search", "x"))
            .await
            .unwrap();
        assert!(report.attempts.iter().all(|a| a.strategy != "primary"));
    }

    #[tokio::test]
    async fn last_line_of_defense_is_never_disabled() {
        let exec = executor();
        exec.register(
            "web_search",
            vec![strategy("emergency", Tier::Emergency, Arc::new(FailRunner))],
        )
        .unwrap();

        // Far past the disable threshold.
        for _ in 0..10 {
            exec.execute(&CapabilityRequest::new("web_search", "x"))
                .await
                .unwrap();
        }

        // Still runs on the next request.
        let report = exec
            .execute(&CapabilityRequest::new("web_search", "x"))
            .await
            .unwrap();
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].strategy, "emergency");

        let state = exec.export_state();
        let stats = &state.strategies["emergency"];
        assert!(stats.enabled);
        assert!(stats.success_rate >= ExecutorConfig::default().success_rate_floor);
    }

    #[tokio::test]
    async fn registration_without_last_line_is_rejected() {
        let exec = executor();
        let result = exec.register(
            "web_search",
            vec![
                strategy("primary", Tier::Primary, Arc::new(FailRunner)),
                strategy("secondary", Tier::Secondary, Arc::new(FailRunner)),
            ],
        );
        assert!(matches!(result, Err(DispatchError::NoLastLineOfDefense { .. })));
    }

    #[tokio::test]
    async fn flaky_strategy_recovers_with_retries() {
        let exec = executor();
        exec.register(
            "code_execution",
            vec![
                strategy(
                    "primary",
                    Tier::Primary,
                    Arc::new(FlakyRunner {
                        failures_left: AtomicU32::new(1),
                    }),
                )
                .with_max_retries(2),
                strategy("fallback", Tier::Fallback, Arc::new(OkRunner(json!({})))),
            ],
        )
        .unwrap();

        let report = exec
            .execute(&CapabilityRequest::new("code_execution", "print(1)"))
            .await
            .unwrap();

        assert_eq!(report.outcome, CallOutcome::Success);
        assert_eq!(report.tier, Some(Tier::Primary));
        assert_eq!(report.attempts.len(), 2);
    }

    #[tokio::test]
    async fn unknown_capability_is_an_error() {
        let exec = executor();
        let result = exec
            .execute(&CapabilityRequest::new("not_registered", "x"))
            .await;
        assert!(matches!(result, Err(DispatchError::UnknownCapability { .. })));
    }

    #[tokio::test]
    async fn failures_are_recorded_against_the_backing_tool() {
        let ledger = Arc::new(HealthLedger::new(LedgerConfig::default()));
        let exec = TieredExecutor::new(Arc::clone(&ledger), ExecutorConfig::default());
        exec.register(
            "web_search",
            vec![
                strategy("primary", Tier::Primary, Arc::new(FailRunner)).with_tool("mcp-deepsearch"),
                strategy("fallback", Tier::Fallback, Arc::new(OkRunner(json!({})))),
            ],
        )
        .unwrap();

        exec.execute(&CapabilityRequest::new("web_search", "x"))
            .await
            .unwrap();

        assert_eq!(ledger.consecutive_failures("mcp-deepsearch"), 1);
    }

    #[tokio::test]
    async fn state_roundtrip() {
        let exec = executor();
        exec.register(
            "web_search",
            vec![
                strategy("primary", Tier::Primary, Arc::new(OkRunner(json!({})))),
                strategy("fallback", Tier::Fallback, Arc::new(OkRunner(json!({})))),
            ],
        )
        .unwrap();
        exec.execute(&CapabilityRequest::new("web_search", "x"))
            .await
            .unwrap();

        let json_state = serde_json::to_string(&exec.export_state()).unwrap();
        let parsed: ExecutorState = serde_json::from_str(&json_state).unwrap();

        let fresh = executor();
        fresh
            .register(
                "web_search",
                vec![
                    strategy("primary", Tier::Primary, Arc::new(OkRunner(json!({})))),
                    strategy("fallback", Tier::Fallback, Arc::new(OkRunner(json!({})))),
                ],
            )
            .unwrap();
        fresh.restore(parsed);

        let state = fresh.export_state();
        assert_eq!(state.strategies["primary"].executions, 1);
        assert_eq!(state.strategies["primary"].successes, 1);
    }
}
