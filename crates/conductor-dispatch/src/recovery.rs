//! Recovery engine.
//!
//! Given a classified [`ErrorEvent`], assembles a recovery plan: an ordered
//! list of actions drawn from the failing category's pool, sorted by learned
//! success rate, with an emergency action prepended for critical events.
//! Actions execute sequentially under their own timeouts; the first success
//! ends the plan.  Action success rates learn multiplicatively from every
//! outcome, so plans drift toward what has actually been fixing things.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use conductor_health::{ErrorCategory, ErrorEvent, ErrorSeverity, HealthLedger};

use crate::caller::{MaintenanceHooks, ToolCaller};
use crate::executor::{CapabilityRequest, TieredExecutor};

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// The repertoire of recovery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryActionKind {
    /// Re-issue the original tool call.
    Retry,
    /// Re-issue the original tool call with a doubled timeout.
    RetryExtendedTimeout,
    /// Route around the failing transport via the tiered executor.
    TransportFallback,
    /// Reconnect to the tool server.
    Restart,
    /// Delegate the capability to the tiered executor.
    Fallback,
    /// Mark the tool offline for a cool-down window.
    Isolate,
    /// Swap to a faster strategy via the tiered executor.
    Compensate,
    /// Release caches and idle connections.
    Cleanup,
    /// Rebalance or shed load.
    Optimize,
    /// Reset configuration to defaults.
    ResetConfig,
    /// Repair configuration by re-reading and injecting missing settings.
    RepairConfig,
    /// Critical-path restart: reconnect plus cleanup.
    EmergencyRestart,
    /// Critical-path cleanup: cleanup plus optimize.
    EmergencyCleanup,
}

impl RecoveryActionKind {
    /// Stable label used in reports and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::RetryExtendedTimeout => "retry_extended_timeout",
            Self::TransportFallback => "transport_fallback",
            Self::Restart => "restart",
            Self::Fallback => "fallback",
            Self::Isolate => "isolate",
            Self::Compensate => "compensate",
            Self::Cleanup => "cleanup",
            Self::Optimize => "optimize",
            Self::ResetConfig => "reset_config",
            Self::RepairConfig => "repair_config",
            Self::EmergencyRestart => "emergency_restart",
            Self::EmergencyCleanup => "emergency_cleanup",
        }
    }
}

#[derive(Debug, Clone)]
struct ActionStats {
    attempts: u64,
    successes: u64,
    success_rate: f64,
}

impl Default for ActionStats {
    fn default() -> Self {
        Self {
            attempts: 0,
            successes: 0,
            success_rate: 1.0,
        }
    }
}

/// One recovery action with its learned statistics.
pub struct RecoveryAction {
    pub kind: RecoveryActionKind,
    pub description: &'static str,
    pub timeout: Duration,
    pub max_attempts: u32,
    stats: Mutex<ActionStats>,
}

impl RecoveryAction {
    fn new(
        kind: RecoveryActionKind,
        description: &'static str,
        timeout: Duration,
        max_attempts: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            description,
            timeout,
            max_attempts,
            stats: Mutex::new(ActionStats::default()),
        })
    }

    /// Current learned success rate.
    pub fn success_rate(&self) -> f64 {
        self.stats.lock().expect("action lock poisoned").success_rate
    }

    fn record(&self, success: bool) {
        let mut stats = self.stats.lock().expect("action lock poisoned");
        stats.attempts += 1;
        if success {
            stats.successes += 1;
            stats.success_rate = (stats.success_rate * 1.1).min(1.0);
        } else {
            stats.success_rate = (stats.success_rate * 0.9).max(0.1);
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One executed recovery attempt.
#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
    pub action: &'static str,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// The outcome of running a recovery plan.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Whether any action succeeded.
    pub recovered: bool,

    /// Every attempt, in plan order.
    pub attempts: Vec<RecoveryAttempt>,

    /// A replacement payload, when the winning action produced one
    /// (retry or fallback execution).
    pub payload: Option<Value>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Tunables for the recovery engine.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How long an isolated tool stays offline.
    pub isolate_duration: Duration,

    /// Pause before re-issuing a retried call.
    pub retry_delay: Duration,

    /// Deadline for retried tool calls; the extended variant doubles it.
    pub call_timeout: Duration,

    /// Maximum actions in one plan.
    pub max_plan_len: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            isolate_duration: Duration::from_secs(300),
            retry_delay: Duration::from_millis(500),
            call_timeout: Duration::from_secs(30),
            max_plan_len: 5,
        }
    }
}

/// The recovery engine.
pub struct RecoveryEngine {
    pools: HashMap<ErrorCategory, Vec<Arc<RecoveryAction>>>,
    emergency_restart: Arc<RecoveryAction>,
    emergency_cleanup: Arc<RecoveryAction>,
    ledger: Arc<HealthLedger>,
    executor: Arc<TieredExecutor>,
    caller: Arc<dyn ToolCaller>,
    maintenance: Arc<dyn MaintenanceHooks>,
    config: RecoveryConfig,
}

impl RecoveryEngine {
    /// Create an engine with the built-in category pools.
    pub fn new(
        ledger: Arc<HealthLedger>,
        executor: Arc<TieredExecutor>,
        caller: Arc<dyn ToolCaller>,
        maintenance: Arc<dyn MaintenanceHooks>,
        config: RecoveryConfig,
    ) -> Self {
        use RecoveryActionKind as K;

        let secs = Duration::from_secs;
        let mut pools: HashMap<ErrorCategory, Vec<Arc<RecoveryAction>>> = HashMap::new();
        pools.insert(
            ErrorCategory::Network,
            vec![
                RecoveryAction::new(K::Retry, "re-issue the call", secs(45), 3),
                RecoveryAction::new(K::TransportFallback, "route around the transport", secs(120), 1),
            ],
        );
        pools.insert(
            ErrorCategory::Tool,
            vec![
                RecoveryAction::new(K::Restart, "reconnect to the tool server", secs(30), 1),
                RecoveryAction::new(K::Fallback, "delegate to the tier chain", secs(180), 1),
                RecoveryAction::new(K::Isolate, "take the tool offline", secs(5), 1),
            ],
        );
        pools.insert(
            ErrorCategory::Timeout,
            vec![
                RecoveryAction::new(K::RetryExtendedTimeout, "retry with doubled timeout", secs(90), 1),
                RecoveryAction::new(K::Compensate, "swap to a faster strategy", secs(120), 1),
            ],
        );
        pools.insert(
            ErrorCategory::Resource,
            vec![
                RecoveryAction::new(K::Cleanup, "release caches and connections", secs(20), 1),
                RecoveryAction::new(K::Optimize, "rebalance load", secs(20), 1),
            ],
        );
        pools.insert(
            ErrorCategory::Configuration,
            vec![
                RecoveryAction::new(K::ResetConfig, "reset configuration to defaults", secs(15), 1),
                RecoveryAction::new(K::RepairConfig, "repair configuration", secs(15), 1),
            ],
        );

        Self {
            pools,
            emergency_restart: RecoveryAction::new(
                K::EmergencyRestart,
                "emergency restart",
                secs(30),
                1,
            ),
            emergency_cleanup: RecoveryAction::new(
                K::EmergencyCleanup,
                "emergency cleanup",
                secs(20),
                1,
            ),
            ledger,
            executor,
            caller,
            maintenance,
            config,
        }
    }

    /// Assemble and run the recovery plan for an event.
    ///
    /// `request` carries the capability context for fallback-shaped actions;
    /// without it those actions fail fast and the plan moves on.
    pub async fn recover(
        &self,
        event: &ErrorEvent,
        request: Option<&CapabilityRequest>,
    ) -> RecoveryReport {
        let plan = self.build_plan(event);

        if plan.is_empty() {
            tracing::warn!(
                category = event.category.label(),
                "no recovery actions applicable"
            );
            return RecoveryReport {
                recovered: false,
                attempts: Vec::new(),
                payload: None,
            };
        }

        tracing::info!(
            error_id = %event.error_id,
            category = event.category.label(),
            actions = plan.len(),
            "executing recovery plan"
        );

        let mut attempts = Vec::new();

        for action in &plan {
            for _ in 0..action.max_attempts.max(1) {
                let started = std::time::Instant::now();
                let outcome = tokio::time::timeout(
                    action.timeout,
                    self.perform(action.kind, event, request),
                )
                .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                let (success, payload, error) = match outcome {
                    Ok(Ok(payload)) => (true, payload, None),
                    Ok(Err(reason)) => (false, None, Some(reason)),
                    Err(_) => (false, None, Some(format!("action timed out after {:?}", action.timeout))),
                };

                action.record(success);
                attempts.push(RecoveryAttempt {
                    action: action.kind.label(),
                    success,
                    duration_ms,
                    error: error.clone(),
                });

                if success {
                    tracing::info!(action = action.kind.label(), "recovery succeeded");
                    return RecoveryReport {
                        recovered: true,
                        attempts,
                        payload,
                    };
                }
                tracing::warn!(
                    action = action.kind.label(),
                    error = error.as_deref().unwrap_or("unknown"),
                    "recovery action failed"
                );
            }
        }

        RecoveryReport {
            recovered: false,
            attempts,
            payload: None,
        }
    }

    /// Self-healing entry: isolate a tool, with bookkeeping.
    pub async fn isolate_tool(&self, tool_id: &str) -> bool {
        let event = healing_event(tool_id, "RepeatedFailures", "failure threshold exceeded");
        self.run_single(ErrorCategory::Tool, RecoveryActionKind::Isolate, &event)
            .await
    }

    /// Self-healing entry: request a tool restart, with bookkeeping.
    pub async fn restart_tool(&self, tool_id: &str) -> bool {
        let event = healing_event(tool_id, "ConsecutiveFailures", "consecutive failure threshold exceeded");
        self.run_single(ErrorCategory::Tool, RecoveryActionKind::Restart, &event)
            .await
    }

    /// Self-healing entry: trigger the optimize action, with bookkeeping.
    pub async fn optimize(&self) -> bool {
        let event = ErrorEvent::new(
            "self_healing",
            "SystemLoad",
            "system load over threshold",
            ErrorSeverity::Medium,
            ErrorCategory::Resource,
        );
        self.run_single(ErrorCategory::Resource, RecoveryActionKind::Optimize, &event)
            .await
    }

    // -- Private helpers ----------------------------------------------------

    fn build_plan(&self, event: &ErrorEvent) -> Vec<Arc<RecoveryAction>> {
        let mut plan: Vec<Arc<RecoveryAction>> = self
            .pools
            .get(&event.category)
            .cloned()
            .unwrap_or_default();

        plan.sort_by(|a, b| {
            b.success_rate()
                .partial_cmp(&a.success_rate())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if event.severity == ErrorSeverity::Critical {
            let emergency = if event.category == ErrorCategory::Resource {
                Arc::clone(&self.emergency_cleanup)
            } else {
                Arc::clone(&self.emergency_restart)
            };
            plan.insert(0, emergency);
        }

        plan.truncate(self.config.max_plan_len);
        plan
    }

    async fn run_single(
        &self,
        category: ErrorCategory,
        kind: RecoveryActionKind,
        event: &ErrorEvent,
    ) -> bool {
        let Some(action) = self
            .pools
            .get(&category)
            .and_then(|pool| pool.iter().find(|a| a.kind == kind))
            .cloned()
        else {
            return false;
        };

        let outcome = tokio::time::timeout(action.timeout, self.perform(kind, event, None)).await;
        let success = matches!(outcome, Ok(Ok(_)));
        action.record(success);
        success
    }

    async fn perform(
        &self,
        kind: RecoveryActionKind,
        event: &ErrorEvent,
        request: Option<&CapabilityRequest>,
    ) -> std::result::Result<Option<Value>, String> {
        use RecoveryActionKind as K;

        match kind {
            K::Retry => {
                tokio::time::sleep(self.config.retry_delay).await;
                self.reissue_call(event, self.config.call_timeout).await
            }
            K::RetryExtendedTimeout => {
                self.reissue_call(event, self.config.call_timeout * 2).await
            }
            K::TransportFallback | K::Fallback | K::Compensate => {
                let request = request.ok_or("no capability context for fallback")?;
                let report = self
                    .executor
                    .execute(request)
                    .await
                    .map_err(|e| e.to_string())?;
                if report.outcome.is_success() {
                    Ok(report.payload)
                } else {
                    Err(report.error.unwrap_or_else(|| "fallback failed".to_owned()))
                }
            }
            K::Restart => {
                let target = event.tool_id.as_deref().unwrap_or(&event.component);
                self.caller.reconnect(target).await?;
                Ok(None)
            }
            K::Isolate => {
                let target = event.tool_id.as_deref().unwrap_or(&event.component);
                let until = Utc::now()
                    + chrono::Duration::from_std(self.config.isolate_duration)
                        .unwrap_or(chrono::Duration::minutes(5));
                self.ledger.mark_offline(target, until);
                Ok(None)
            }
            K::Cleanup => {
                self.maintenance.cleanup().await?;
                Ok(None)
            }
            K::Optimize => {
                self.maintenance.optimize().await?;
                Ok(None)
            }
            K::ResetConfig => {
                self.maintenance.reset_config().await?;
                Ok(None)
            }
            K::RepairConfig => {
                self.maintenance.repair_config().await?;
                Ok(None)
            }
            K::EmergencyRestart => {
                let target = event.tool_id.as_deref().unwrap_or(&event.component);
                self.caller.reconnect(target).await?;
                self.maintenance.cleanup().await?;
                Ok(None)
            }
            K::EmergencyCleanup => {
                self.maintenance.cleanup().await?;
                self.maintenance.optimize().await?;
                Ok(None)
            }
        }
    }

    async fn reissue_call(
        &self,
        event: &ErrorEvent,
        deadline: Duration,
    ) -> std::result::Result<Option<Value>, String> {
        let (Some(tool_id), Some(action)) = (&event.tool_id, &event.action) else {
            return Err("no original call to retry".to_owned());
        };
        let parameters = event.parameters.clone().unwrap_or_default();
        let payload = self.caller.call(tool_id, action, &parameters, deadline).await?;
        Ok(Some(payload))
    }
}

fn healing_event(tool_id: &str, error_type: &str, message: &str) -> ErrorEvent {
    ErrorEvent::new(
        "self_healing",
        error_type,
        message,
        ErrorSeverity::High,
        ErrorCategory::Tool,
    )
    .with_call(tool_id, "", None)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::NoopMaintenance;
    use crate::executor::{ExecutorConfig, Strategy, StrategyRunner};
    use async_trait::async_trait;
    use conductor_health::LedgerConfig;
    use conductor_registry::Tier;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Caller whose calls fail a configurable number of times.
    struct ScriptedCaller {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl ToolCaller for ScriptedCaller {
        async fn call(
            &self,
            _tool_id: &str,
            _action: &str,
            _parameters: &serde_json::Map<String, Value>,
            _deadline: Duration,
        ) -> std::result::Result<Value, String> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err("still failing".to_owned())
            } else {
                Ok(json!({"retried": true}))
            }
        }
    }

    struct OkRunner;

    #[async_trait]
    impl StrategyRunner for OkRunner {
        async fn run(&self, _request: &CapabilityRequest) -> std::result::Result<Value, String> {
            Ok(json!({"fallback": true}))
        }
    }

    fn engine_with(failures: u32) -> (RecoveryEngine, Arc<HealthLedger>) {
        let ledger = Arc::new(HealthLedger::new(LedgerConfig::default()));
        let executor = Arc::new(TieredExecutor::new(
            Arc::clone(&ledger),
            ExecutorConfig::default(),
        ));
        executor
            .register(
                "web_search",
                vec![Strategy::new(
                    "fallback",
                    "fallback",
                    Tier::Fallback,
                    Duration::from_millis(200),
                    Arc::new(OkRunner),
                )],
            )
            .unwrap();

        let engine = RecoveryEngine::new(
            Arc::clone(&ledger),
            executor,
            Arc::new(ScriptedCaller {
                failures_left: AtomicU32::new(failures),
            }),
            Arc::new(NoopMaintenance),
            RecoveryConfig {
                retry_delay: Duration::from_millis(1),
                ..RecoveryConfig::default()
            },
        );
        (engine, ledger)
    }

    fn event(category: ErrorCategory, severity: ErrorSeverity) -> ErrorEvent {
        ErrorEvent::new("executor", "ToolError", "boom", severity, category)
            .with_call("mcp-deepsearch", "research", None)
    }

    #[tokio::test]
    async fn network_error_recovers_by_retry() {
        let (engine, _) = engine_with(1);
        let report = engine
            .recover(&event(ErrorCategory::Network, ErrorSeverity::Medium), None)
            .await;

        assert!(report.recovered);
        assert_eq!(report.payload, Some(json!({"retried": true})));
        // First retry failed, second succeeded.
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].action, "retry");
    }

    #[tokio::test]
    async fn timeout_error_uses_extended_retry() {
        let (engine, _) = engine_with(0);
        let report = engine
            .recover(&event(ErrorCategory::Timeout, ErrorSeverity::Low), None)
            .await;

        assert!(report.recovered);
        assert_eq!(report.attempts[0].action, "retry_extended_timeout");
    }

    #[tokio::test]
    async fn tool_error_plan_starts_with_restart() {
        let (engine, _) = engine_with(u32::MAX);
        let request = CapabilityRequest::new("web_search", "rust");
        let report = engine
            .recover(
                &event(ErrorCategory::Tool, ErrorSeverity::Medium),
                Some(&request),
            )
            .await;

        // The reconnect is a default-Ok no-op here, so the plan recovers on
        // its first action.
        assert!(report.recovered);
        assert_eq!(report.attempts.last().unwrap().action, "restart");
    }

    #[tokio::test]
    async fn critical_event_prepends_emergency_action() {
        let (engine, _) = engine_with(u32::MAX);
        let report = engine
            .recover(&event(ErrorCategory::Tool, ErrorSeverity::Critical), None)
            .await;

        assert_eq!(report.attempts[0].action, "emergency_restart");
    }

    #[tokio::test]
    async fn critical_resource_event_uses_emergency_cleanup() {
        let (engine, _) = engine_with(u32::MAX);
        let report = engine
            .recover(&event(ErrorCategory::Resource, ErrorSeverity::Critical), None)
            .await;

        assert_eq!(report.attempts[0].action, "emergency_cleanup");
        assert!(report.recovered);
    }

    #[tokio::test]
    async fn dependency_errors_have_no_plan() {
        let (engine, _) = engine_with(0);
        let report = engine
            .recover(&event(ErrorCategory::Dependency, ErrorSeverity::Critical), None)
            .await;

        // Critical prepends an emergency action even without a pool.
        assert!(report.attempts.len() <= 1);
    }

    #[tokio::test]
    async fn isolate_marks_tool_offline() {
        let (engine, ledger) = engine_with(0);
        assert!(ledger.is_available("browser_use"));

        let isolated = engine.isolate_tool("browser_use").await;
        assert!(isolated);
        assert!(!ledger.is_available("browser_use"));
    }

    #[tokio::test]
    async fn action_success_rates_learn() {
        let (engine, _) = engine_with(u32::MAX);

        let retry_rate_before = engine.pools[&ErrorCategory::Network][0].success_rate();
        engine
            .recover(&event(ErrorCategory::Network, ErrorSeverity::Medium), None)
            .await;
        let retry_rate_after = engine.pools[&ErrorCategory::Network]
            .iter()
            .find(|a| a.kind == RecoveryActionKind::Retry)
            .unwrap()
            .success_rate();

        assert!(retry_rate_after < retry_rate_before);
    }

    #[tokio::test]
    async fn fallback_without_context_moves_on() {
        let (engine, _) = engine_with(u32::MAX);
        // Network plan: retry (fails), transport fallback (no context).
        let report = engine
            .recover(&event(ErrorCategory::Network, ErrorSeverity::Medium), None)
            .await;

        assert!(!report.recovered);
        assert!(report
            .attempts
            .iter()
            .any(|a| a.action == "transport_fallback" && !a.success));
    }
}
