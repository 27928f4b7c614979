//! Learning-state persistence.
//!
//! On shutdown the runtime serializes the adaptive dispatcher weights,
//! per-capability strategy statistics, and compacted health ledger state to
//! a JSON file; on startup it restores them.  A corrupt or missing file
//! means a cold start with defaults, never a failure.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conductor_dispatch::{DispatcherState, ExecutorState};
use conductor_health::LedgerState;

use crate::error::{Result, RuntimeError};

/// Everything worth carrying across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningState {
    #[serde(default)]
    pub dispatcher: DispatcherState,

    #[serde(default)]
    pub executor: ExecutorState,

    #[serde(default)]
    pub ledger: LedgerState,

    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Write the learning state to disk, creating parent directories.
pub fn save(path: &Path, mut state: LearningState) -> Result<()> {
    state.saved_at = Some(Utc::now());

    let body = serde_json::to_string_pretty(&state).map_err(|e| RuntimeError::Persistence {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RuntimeError::Persistence {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    }

    std::fs::write(path, body).map_err(|e| RuntimeError::Persistence {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    tracing::info!(path = %path.display(), "learning state saved");
    Ok(())
}

/// Load persisted learning state.
///
/// Missing or corrupt state yields `None`: the caller cold-starts with
/// defaults.
pub fn load(path: &Path) -> Option<LearningState> {
    let body = match std::fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no learning state, cold start");
            return None;
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "learning state unreadable, cold start");
            return None;
        }
    };

    match serde_json::from_str::<LearningState>(&body) {
        Ok(state) => {
            tracing::info!(
                path = %path.display(),
                saved_at = ?state.saved_at,
                "learning state restored"
            );
            Some(state)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "learning state corrupt, cold start");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
