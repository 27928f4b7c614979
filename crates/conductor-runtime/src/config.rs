//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the composition root.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to the alias/mapping TOML file.  Missing file falls back to
    /// built-in defaults.
    pub alias_config_path: PathBuf,

    /// Search roots for `service.json` tool descriptors.
    pub manifest_roots: Vec<PathBuf>,

    /// Tool-host WebSocket update endpoint (C12).  `None` disables the
    /// listener; the registry then relies on its poll cadence.
    pub update_stream_url: Option<String>,

    /// Where learning state is saved on shutdown and restored on startup.
    pub state_path: PathBuf,

    /// Where trajectory records are appended (JSONL).
    pub trajectory_path: PathBuf,

    /// Step budget per task.
    pub max_steps: u32,

    /// Deadline for LLM reasoning calls.
    pub llm_deadline: Duration,

    /// Default deadline for direct tool calls outside the tier chain.
    pub call_timeout: Duration,

    /// Registry refresh interval.
    pub refresh_interval: Duration,

    /// Bind address for the operational health endpoint.
    pub health_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            alias_config_path: PathBuf::from("config/tool_mappings.toml"),
            manifest_roots: vec![
                PathBuf::from("mcp_servers"),
                PathBuf::from("configs/tools"),
            ],
            update_stream_url: None,
            state_path: PathBuf::from("state/learning.json"),
            trajectory_path: PathBuf::from("state/trajectories.jsonl"),
            max_steps: 20,
            llm_deadline: Duration::from_secs(120),
            call_timeout: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(60),
            health_addr: "127.0.0.1:8070".to_owned(),
        }
    }
}
