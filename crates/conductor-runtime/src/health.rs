//! Operational health endpoint.
//!
//! `GET /health` reports the registry snapshot age, tool count, degraded
//! flag, per-tool availability, and the recent error rate.  Operators (and
//! liveness probes) read this; nothing in the core depends on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};
use crate::root::Runtime;

/// The health report served to operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeHealth {
    /// Age of the current registry snapshot in seconds.
    pub snapshot_age_secs: i64,

    /// Number of tools in the snapshot.
    pub tool_count: usize,

    /// Whether the last refresh attempt failed.
    pub degraded: bool,

    /// Current whitelist hash (schema-drift guard).
    pub whitelist_hash: String,

    /// Per-tool availability as seen by the dispatcher.
    pub tools: HashMap<String, bool>,

    /// Fraction of the global event window filled within the last hour.
    pub recent_error_rate: f64,

    /// Capabilities with registered strategy lists.
    pub capabilities: Vec<String>,

    /// Entries held by the fallback tier's synthesis cache.
    pub cached_synthesis_entries: u64,
}

impl Runtime {
    /// Build the current health report.
    pub fn health_report(&self) -> RuntimeHealth {
        let snapshot = self.registry.snapshot();
        let tools = snapshot
            .tool_ids()
            .into_iter()
            .map(|tool_id| {
                let available = self.ledger.is_available(&tool_id);
                (tool_id, available)
            })
            .collect();

        let mut capabilities = self.executor.capabilities();
        capabilities.sort();

        RuntimeHealth {
            snapshot_age_secs: self.registry.snapshot_age_secs(),
            tool_count: snapshot.tool_count(),
            degraded: self.registry.is_degraded(),
            whitelist_hash: snapshot.whitelist_hash().to_owned(),
            tools,
            recent_error_rate: self.ledger.recent_error_rate(Duration::from_secs(3600)),
            capabilities,
            cached_synthesis_entries: self.synthesis.len(),
        }
    }
}

/// Build the Axum router serving the health endpoint.
pub fn health_router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(runtime)
}

async fn health_handler(State(runtime): State<Arc<Runtime>>) -> Json<RuntimeHealth> {
    Json(runtime.health_report())
}

/// Bind and serve the health endpoint until the process exits.
pub async fn serve_health(runtime: Arc<Runtime>, addr: &str) -> Result<()> {
    let router = health_router(runtime);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| RuntimeError::Health(format!("bind {addr}: {e}")))?;

    tracing::info!(addr = %addr, "health endpoint listening");
    axum::serve(listener, router)
        .await
        .map_err(|e| RuntimeError::Health(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use async_trait::async_trait;
    use conductor_dispatch::ToolCaller;
    use conductor_registry::{StaticSource, builtin_catalog};
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
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn health_report_reflects_registry_state() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new(
            RuntimeConfig {
                alias_config_path: dir.path().join("missing.toml"),
                manifest_roots: Vec::new(),
                state_path: dir.path().join("learning.json"),
                trajectory_path: dir.path().join("trajectories.jsonl"),
                ..RuntimeConfig::default()
            },
            Arc::new(StaticSource::with_tools(builtin_catalog())),
            Arc::new(NoopCaller),
            None,
        )
        .unwrap();
        runtime.init().await.unwrap();

        let report = runtime.health_report();
        assert_eq!(report.tool_count, 4);
        assert!(!report.degraded);
        assert_eq!(report.tools.len(), 4);
        assert!(report.tools.values().all(|available| *available));
        assert!(report.capabilities.contains(&"web_search".to_owned()));
        assert_eq!(report.whitelist_hash.len(), 8);

        // The report serializes for the wire.
        let json = serde_json::to_string(&report).unwrap();
        let parsed: RuntimeHealth = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tool_count, 4);
    }
}
