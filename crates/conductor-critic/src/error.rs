//! Critic error types.

/// Unified error type for the Conductor critic.
#[derive(Debug, thiserror::Error)]
pub enum CriticError {
    /// The LLM client failed or exceeded its deadline.
    #[error("llm client error: {0}")]
    Llm(String),

    /// Catch-all for unexpected internal errors.
    #[error("internal critic error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the critic crate.
pub type Result<T> = std::result::Result<T, CriticError>;
