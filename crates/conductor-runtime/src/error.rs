//! Runtime error types.

use conductor_critic::CriticError;
use conductor_dispatch::DispatchError;
use conductor_registry::RegistryError;

/// Unified error type for the Conductor runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A dispatch operation failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The critic or its LLM client failed.
    #[error(transparent)]
    Critic(#[from] CriticError),

    /// The runtime is missing a required collaborator.
    #[error("runtime not configured: {0}")]
    NotConfigured(String),

    /// Reading or writing persisted state failed.
    #[error("persistence error at {path}: {reason}")]
    Persistence { path: String, reason: String },

    /// Writing a trajectory record failed.
    #[error("trajectory write failed at {path}: {reason}")]
    Trajectory { path: String, reason: String },

    /// The health endpoint could not be served.
    #[error("health endpoint error: {0}")]
    Health(String),
}

/// Convenience alias used throughout the runtime crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
