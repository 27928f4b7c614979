//! Live tool connectivity prober.
//!
//! Performs a lightweight TCP reachability check per tool (plus an HTTP
//! `/health` call where the tool exposes one) on a fixed cadence.  Probe
//! failures land in the health ledger as network-category error events;
//! recovery after an offline window clears the offline flag but leaves
//! reliability to be earned back per success.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use conductor_health::{ErrorClassifier, HealthLedger};

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// One probe target.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    /// Host and port for the TCP reachability check, e.g. "localhost:8101".
    pub addr: String,

    /// Optional HTTP health URL checked after the TCP connect succeeds.
    pub health_url: Option<String>,
}

/// The result of probing one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    TcpFailed(String),
    HealthFailed(String),
}

// ---------------------------------------------------------------------------
// Prober
// ---------------------------------------------------------------------------

/// Tunables for the prober.
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Probe cadence.
    pub interval: Duration,

    /// Per-connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// The connectivity prober.
pub struct Prober {
    targets: RwLock<HashMap<String, ProbeTarget>>,
    ledger: Arc<HealthLedger>,
    classifier: ErrorClassifier,
    http: reqwest::Client,
    config: ProberConfig,
}

impl Prober {
    /// Create a prober feeding the given ledger.
    pub fn new(ledger: Arc<HealthLedger>, config: ProberConfig) -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            ledger,
            classifier: ErrorClassifier::new(),
            http: reqwest::Client::builder()
                .user_agent("conductor/0.1")
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    /// Register or replace a probe target.
    pub fn watch(&self, tool_id: impl Into<String>, target: ProbeTarget) {
        self.targets
            .write()
            .expect("prober lock poisoned")
            .insert(tool_id.into(), target);
    }

    /// Stop probing a tool (on uninstall events).
    pub fn unwatch(&self, tool_id: &str) {
        self.targets
            .write()
            .expect("prober lock poisoned")
            .remove(tool_id);
    }

    /// Probe every registered target once, recording outcomes.
    pub async fn probe_all(&self) -> HashMap<String, ProbeOutcome> {
        let targets: Vec<(String, ProbeTarget)> = {
            let targets = self.targets.read().expect("prober lock poisoned");
            targets.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut outcomes = HashMap::new();
        for (tool_id, target) in targets {
            let outcome = self.probe_one(&target).await;
            self.record(&tool_id, &outcome);
            outcomes.insert(tool_id, outcome);
        }
        outcomes
    }

    async fn probe_one(&self, target: &ProbeTarget) -> ProbeOutcome {
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            tokio::net::TcpStream::connect(&target.addr),
        )
        .await;

        match connect {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => return ProbeOutcome::TcpFailed(e.to_string()),
            Err(_) => {
                return ProbeOutcome::TcpFailed(format!(
                    "connect timed out after {:?}",
                    self.config.connect_timeout
                ));
            }
        }

        if let Some(url) = &target.health_url {
            let response = self
                .http
                .get(url)
                .timeout(self.config.connect_timeout)
                .send()
                .await;
            match response {
                Ok(r) if r.status().is_success() => {}
                Ok(r) => return ProbeOutcome::HealthFailed(format!("HTTP {}", r.status())),
                Err(e) => return ProbeOutcome::HealthFailed(e.to_string()),
            }
        }

        ProbeOutcome::Reachable
    }

    fn record(&self, tool_id: &str, outcome: &ProbeOutcome) {
        match outcome {
            ProbeOutcome::Reachable => {
                // Reachability restores availability; reliability is only
                // earned back through real call successes.
                self.ledger.clear_offline(tool_id);
                tracing::trace!(tool_id = %tool_id, "probe ok");
            }
            ProbeOutcome::TcpFailed(reason) | ProbeOutcome::HealthFailed(reason) => {
                let recent = self
                    .ledger
                    .component_failures("prober", Duration::from_secs(3600));
                let event = self.classifier.event(
                    "prober",
                    "NetworkError",
                    &format!("probe failed: {reason}"),
                    Some(tool_id),
                    Some("probe"),
                    None,
                    recent,
                );
                self.ledger.record_failure(tool_id, &event);
                tracing::warn!(tool_id = %tool_id, reason = %reason, "probe failed");
            }
        }
    }

    /// Drive the probe loop until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(interval = ?self.config.interval, "connectivity prober started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("connectivity prober stopping");
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
    use conductor_health::LedgerConfig;

    fn prober() -> (Arc<Prober>, Arc<HealthLedger>) {
        let ledger = Arc::new(HealthLedger::new(LedgerConfig::default()));
        let prober = Arc::new(Prober::new(
            Arc::clone(&ledger),
            ProberConfig {
                interval: Duration::from_secs(30),
                connect_timeout: Duration::from_millis(500),
            },
        ));
        (prober, ledger)
    }

    #[tokio::test]
    async fn unreachable_target_records_failure() {
        let (prober, ledger) = prober();
        // Port 1 on localhost is essentially never listening.
        prober.watch(
            "browser_use",
            ProbeTarget {
                addr: "127.0.0.1:1".to_owned(),
                health_url: None,
            },
        );

        let outcomes = prober.probe_all().await;
        assert!(matches!(
            outcomes.get("browser_use"),
            Some(ProbeOutcome::TcpFailed(_))
        ));
        assert_eq!(ledger.consecutive_failures("browser_use"), 1);

        let events = ledger.recent_events_for_tool("browser_use", 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, conductor_health::ErrorCategory::Network);
    }

    #[tokio::test]
    async fn reachable_target_clears_offline_flag() {
        let (prober, ledger) = prober();

        // A live local listener.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        ledger.mark_offline("microsandbox", chrono::Utc::now() + chrono::Duration::minutes(5));
        assert!(!ledger.is_available("microsandbox"));

        prober.watch(
            "microsandbox",
            ProbeTarget {
                addr: addr.to_string(),
                health_url: None,
            },
        );

        let outcomes = prober.probe_all().await;
        assert_eq!(outcomes.get("microsandbox"), Some(&ProbeOutcome::Reachable));
        assert!(ledger.is_available("microsandbox"));
    }

    #[tokio::test]
    async fn unwatch_stops_probing() {
        let (prober, _ledger) = prober();
        prober.watch(
            "x",
            ProbeTarget {
                addr: "127.0.0.1:1".to_owned(),
                health_url: None,
            },
        );
        prober.unwatch("x");

        let outcomes = prober.probe_all().await;
        assert!(outcomes.is_empty());
    }
}
