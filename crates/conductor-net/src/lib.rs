//! Conductor network layer.
//!
//! Everything that crosses the process boundary to the MCP tool fleet:
//!
//! - **[`mcp`]** -- HTTP transport to tool servers behind the
//!   [`conductor_dispatch::ToolCaller`] seam.
//! - **[`schema_source`]** -- HTTP schema source for the registry's
//!   incremental refresh.
//! - **[`prober`]** -- TCP/HTTP connectivity probing feeding the health
//!   ledger.
//! - **[`listener`]** -- WebSocket tool-update stream with capped
//!   exponential backoff.
//! - **[`error`]** -- Unified network error types via [`thiserror`].

pub mod error;
pub mod listener;
pub mod mcp;
pub mod prober;
pub mod schema_source;

// Re-export the most commonly used types at the crate root for convenience.
pub use error::{NetError, Result};
pub use listener::{ListenerConfig, ToolHostEvent, UpdateListener};
pub use mcp::HttpMcpClient;
pub use prober::{ProbeOutcome, ProbeTarget, Prober, ProberConfig};
pub use schema_source::HttpSchemaSource;
