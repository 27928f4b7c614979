//! Self-healing rules.
//!
//! A background loop evaluates a fixed rule list against the health ledger:
//! noisy tools are isolated, tools stuck in consecutive failures get a
//! restart request, and high system load triggers the optimize action.
//! Rules only read ledger state; every write goes through the recovery
//! engine so its bookkeeping stays authoritative.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use conductor_health::HealthLedger;

use crate::recovery::RecoveryEngine;

/// A coarse system-load signal in `[0, 1]`.
///
/// The composition root derives it from in-flight call counts.
pub trait LoadProbe: Send + Sync {
    fn load(&self) -> f64;
}

/// A probe that always reports an idle system.
pub struct IdleLoadProbe;

impl LoadProbe for IdleLoadProbe {
    fn load(&self) -> f64 {
        0.0
    }
}

/// Tunables for the self-healing loop.
#[derive(Debug, Clone)]
pub struct HealingConfig {
    /// Evaluation cadence.
    pub interval: Duration,

    /// Failures per hour at which a tool is isolated.
    pub hourly_failure_threshold: usize,

    /// Consecutive failures at which a restart is requested.
    pub consecutive_failure_threshold: u32,

    /// Load above which the optimize action fires.
    pub load_threshold: f64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            hourly_failure_threshold: 10,
            consecutive_failure_threshold: 5,
            load_threshold: 0.9,
        }
    }
}

/// What one evaluation pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealingAction {
    Isolated { tool_id: String },
    RestartRequested { tool_id: String },
    Optimized,
}

/// The self-healing rule loop.
pub struct SelfHealer {
    ledger: Arc<HealthLedger>,
    recovery: Arc<RecoveryEngine>,
    load: Arc<dyn LoadProbe>,
    config: HealingConfig,
}

impl SelfHealer {
    pub fn new(
        ledger: Arc<HealthLedger>,
        recovery: Arc<RecoveryEngine>,
        load: Arc<dyn LoadProbe>,
        config: HealingConfig,
    ) -> Self {
        Self {
            ledger,
            recovery,
            load,
            config,
        }
    }

    /// Run one evaluation pass over all rules.
    pub async fn evaluate(&self) -> Vec<HealingAction> {
        let mut actions = Vec::new();
        let hour = Duration::from_secs(3600);

        for tool_id in self.ledger.tracked_tools() {
            let hourly = self.ledger.recent_failures(&tool_id, hour);
            if hourly > self.config.hourly_failure_threshold
                && self.recovery.isolate_tool(&tool_id).await
            {
                tracing::warn!(tool_id = %tool_id, failures = hourly, "self-healing isolated tool");
                actions.push(HealingAction::Isolated { tool_id: tool_id.clone() });
                continue;
            }

            let consecutive = self.ledger.consecutive_failures(&tool_id);
            if consecutive >= self.config.consecutive_failure_threshold
                && self.recovery.restart_tool(&tool_id).await
            {
                tracing::warn!(
                    tool_id = %tool_id,
                    consecutive,
                    "self-healing requested tool restart"
                );
                actions.push(HealingAction::RestartRequested { tool_id });
            }
        }

        let load = self.load.load();
        if load > self.config.load_threshold && self.recovery.optimize().await {
            tracing::warn!(load, "self-healing triggered optimize");
            actions.push(HealingAction::Optimized);
        }

        actions
    }

    /// Drive the rule loop until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(interval = ?self.config.interval, "self-healing loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let actions = self.evaluate().await;
                    if !actions.is_empty() {
                        tracing::info!(count = actions.len(), "self-healing actions applied");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("self-healing loop stopping");
                        break;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::{NoopMaintenance, ToolCaller};
    use crate::executor::{ExecutorConfig, TieredExecutor};
    use crate::recovery::RecoveryConfig;
    use async_trait::async_trait;
    use conductor_health::{ErrorCategory, ErrorEvent, ErrorSeverity, LedgerConfig};
    use serde_json::Value;

    struct NoopCaller;

    #[async_trait]
    impl ToolCaller for NoopCaller {
        async fn call(
            &self,
            _tool_id: &str,
            _action: &str,
            _parameters: &serde_json::Map<String, Value>,
            _deadline: Duration,
        ) -> std::result::Result<Value, String> {
            Err("not wired".to_owned())
        }
    }

    struct FixedLoad(f64);

    impl LoadProbe for FixedLoad {
        fn load(&self) -> f64 {
            self.0
        }
    }

    fn failure(tool_id: &str) -> ErrorEvent {
        ErrorEvent::new(
            "executor",
            "ToolError",
            "failed",
            ErrorSeverity::Medium,
            ErrorCategory::Tool,
        )
        .with_call(tool_id, "run", None)
    }

    fn healer(load: f64) -> (SelfHealer, Arc<HealthLedger>) {
        let ledger = Arc::new(HealthLedger::new(LedgerConfig::default()));
        let executor = Arc::new(TieredExecutor::new(
            Arc::clone(&ledger),
            ExecutorConfig::default(),
        ));
        let recovery = Arc::new(RecoveryEngine::new(
            Arc::clone(&ledger),
            executor,
            Arc::new(NoopCaller),
            Arc::new(NoopMaintenance),
            RecoveryConfig::default(),
        ));

        let healer = SelfHealer::new(
            Arc::clone(&ledger),
            recovery,
            Arc::new(FixedLoad(load)),
            HealingConfig::default(),
        );
        (healer, ledger)
    }

    // Scenario S5: repeated failures drive the tool offline.
    #[tokio::test]
    async fn noisy_tool_is_isolated() {
        let (healer, ledger) = healer(0.0);

        for _ in 0..11 {
            ledger.record_failure("browser_use", &failure("browser_use"));
        }

        let actions = healer.evaluate().await;
        assert!(actions.contains(&HealingAction::Isolated {
            tool_id: "browser_use".to_owned()
        }));
        assert!(!ledger.is_available("browser_use"));
    }

    #[tokio::test]
    async fn consecutive_failures_request_restart() {
        let (healer, ledger) = healer(0.0);

        // Five consecutive failures, but below the hourly isolation bar.
        for _ in 0..5 {
            ledger.record_failure("microsandbox", &failure("microsandbox"));
        }

        let actions = healer.evaluate().await;
        assert!(actions.iter().any(|a| matches!(
            a,
            HealingAction::RestartRequested { tool_id } if tool_id == "microsandbox"
        )));
    }

    #[tokio::test]
    async fn high_load_triggers_optimize() {
        let (healer, _ledger) = healer(0.95);
        let actions = healer.evaluate().await;
        assert!(actions.contains(&HealingAction::Optimized));
    }

    #[tokio::test]
    async fn quiet_system_takes_no_action() {
        let (healer, ledger) = healer(0.2);
        ledger.record_success("browser_use", Duration::from_millis(10));

        let actions = healer.evaluate().await;
        assert!(actions.is_empty());
    }
}
