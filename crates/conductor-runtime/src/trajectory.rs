//! Trajectory output.
//!
//! Per task, an append-only sequence of step records: the normalized call,
//! its result, and any error events or critic patches involved.  Records go
//! to a JSONL file; downstream consumers (the offline task-synthesis
//! pipeline) rely on the structure but not on field ordering.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use conductor_critic::CorrectionPatch;
use conductor_health::ErrorEvent;
use conductor_registry::{TaskSpec, ToolCall, ToolCallResult};

use crate::error::{Result, RuntimeError};

/// One step of a task's trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryStep {
    /// Step index within the task, from 0.
    pub index: u32,

    /// The normalized call that was executed (absent when the step failed
    /// before producing a valid call).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<ToolCall>,

    /// The call's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolCallResult>,

    /// Error events raised during the step, recovered or not.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ErrorEvent>,

    /// Critic patches applied during the step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<CorrectionPatch>,

    /// Summary of the recovery path, when recovery ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_summary: Option<String>,
}

/// The full trajectory of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub task_id: Uuid,
    pub task: TaskSpec,
    pub steps: Vec<TrajectoryStep>,

    /// The final answer text, when the task completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,

    /// Whether the task reached a final answer within its step budget.
    pub completed: bool,
}

impl Trajectory {
    /// Start an empty trajectory for a task.
    pub fn new(task: TaskSpec) -> Self {
        Self {
            task_id: task.task_id,
            task,
            steps: Vec::new(),
            final_answer: None,
            completed: false,
        }
    }

    /// Append a step.
    pub fn push(&mut self, step: TrajectoryStep) {
        self.steps.push(step);
    }
}

/// Appends trajectory records to a JSONL file.
pub struct TrajectoryWriter {
    path: PathBuf,
    // Serializes appends from concurrent tasks.
    write_lock: Mutex<()>,
}

impl TrajectoryWriter {
    /// Create a writer; the parent directory is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one finished trajectory as a single JSONL line.
    pub fn append(&self, trajectory: &Trajectory) -> Result<()> {
        let line = serde_json::to_string(trajectory).map_err(|e| RuntimeError::Trajectory {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let _guard = self.write_lock.lock().expect("trajectory lock poisoned");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RuntimeError::Trajectory {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RuntimeError::Trajectory {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })?;

        writeln!(file, "{line}").map_err(|e| RuntimeError::Trajectory {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            task_id = %trajectory.task_id,
            steps = trajectory.steps.len(),
            "trajectory appended"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
