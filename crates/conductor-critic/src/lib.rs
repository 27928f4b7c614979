//! Conductor validation critic.
//!
//! When the same failure signature keeps recurring, or recovery has run out
//! of options, the critic analyzes the recent error stream and proposes
//! executable correction patches:
//!
//! - **[`critic`]** -- Failure-pattern tracking, the six correction
//!   strategies, patch validation through the structured-call validator,
//!   and outcome-driven strategy ranking.
//! - **[`llm`]** -- The single-operation [`LlmClient`] seam the critic uses
//!   for deadline-bounded parameter repair.
//! - **[`error`]** -- Unified critic error types via [`thiserror`].

pub mod critic;
pub mod error;
pub mod llm;

// Re-export the most commonly used types at the crate root for convenience.
pub use critic::{
    CorrectionPatch, CriticAnalysis, CriticConfig, CriticStrategy, PatchKind, ValidationCritic,
};
pub use error::{CriticError, Result};
pub use llm::{LlmClient, LlmMessage, Role, ScriptedLlm};
