//! Dispatch error types.
//!
//! Strategy and recovery *outcomes* are data ([`crate::executor::ExecutionReport`],
//! [`crate::recovery::RecoveryReport`]); this type covers structural failures
//! in the dispatch layer itself.

/// Unified error type for the Conductor dispatch layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The capability tag is not registered with the executor.
    #[error("unknown capability: {capability}")]
    UnknownCapability { capability: String },

    /// No live candidate tools serve the capability.
    #[error("no available candidates for capability: {capability}")]
    NoCandidates { capability: String },

    /// A strategy list would violate the last-line-of-defense invariant.
    #[error("capability {capability} has no fallback or emergency strategy")]
    NoLastLineOfDefense { capability: String },

    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal dispatch error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the dispatch crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
