//! Tool invocation seam.
//!
//! Strategies and recovery actions reach MCP tool servers exclusively through
//! [`ToolCaller`], so the dispatch layer never depends on a concrete
//! transport.  The production implementation lives in `conductor-net`; tests
//! plug in scripted callers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// Invokes actions on tool servers.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    /// Call `tool_id.action` with the given parameters, bounded by
    /// `deadline`.  The payload is opaque to the dispatch layer.
    async fn call(
        &self,
        tool_id: &str,
        action: &str,
        parameters: &serde_json::Map<String, Value>,
        deadline: Duration,
    ) -> std::result::Result<Value, String>;

    /// Re-establish the connection to a tool server.
    ///
    /// Used by the recovery engine's restart action.  Transports without a
    /// persistent connection treat this as a no-op.
    async fn reconnect(&self, _tool_id: &str) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Hooks the recovery engine uses for resource and configuration repair.
///
/// The composition root implements these against its own caches and config
/// files; the defaults make every hook a successful no-op so the engine can
/// run without them.
#[async_trait]
pub trait MaintenanceHooks: Send + Sync {
    /// Release caches and idle connections.
    async fn cleanup(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Rebalance or shed load.
    async fn optimize(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Reset configuration to built-in defaults.
    async fn reset_config(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Re-read configuration, injecting missing required settings.
    async fn repair_config(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Maintenance hooks that do nothing.
pub struct NoopMaintenance;

#[async_trait]
impl MaintenanceHooks for NoopMaintenance {}
