//! Conductor runtime.
//!
//! The composition root and reasoning loop tying the registry, dispatch,
//! recovery, and critic layers into one adaptive tool-dispatch runtime:
//!
//! - **[`root`]** -- [`Runtime`], the single composition root: explicit
//!   construction, owned background tasks, ordered shutdown.
//! - **[`reasoning`]** -- The per-task loop: prompt, extract, validate,
//!   dispatch, record; recovery and critic escalation on failure.
//! - **[`trajectory`]** -- Append-only JSONL trajectory output.
//! - **[`persist`]** -- Learning-state save/restore with cold-start on
//!   corruption.
//! - **[`health`]** -- The Axum health endpoint for operators.
//! - **[`config`]** -- Runtime configuration.
//! - **[`error`]** -- Unified runtime error types via [`thiserror`].

pub mod config;
pub mod error;
pub mod health;
pub mod persist;
pub mod reasoning;
pub mod root;
pub mod trajectory;

// Re-export the most commonly used types at the crate root for convenience.
pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use health::{RuntimeHealth, health_router, serve_health};
pub use persist::LearningState;
pub use root::{InFlightLoadProbe, Runtime};
pub use trajectory::{Trajectory, TrajectoryStep, TrajectoryWriter};
