//! Registry error types.
//!
//! All registry subsystems surface errors through [`RegistryError`], which is
//! the single error type returned by every public API in this crate.  Each
//! variant carries enough context for callers to decide how to handle the
//! failure without inspecting opaque strings.
//!
//! Validation *outcomes* (rejected calls, missing parameters) are not errors:
//! they are reported as data through
//! [`ValidationReport`](crate::validator::ValidationReport).  This type covers
//! infrastructure failures only.

/// Unified error type for the Conductor schema registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The upstream tool host could not be reached or returned garbage.
    #[error("schema source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    /// A fetched schema failed structural validation beyond auto-fix.
    #[error("invalid schema for `{tool_id}`: {reason}")]
    InvalidSchema { tool_id: String, reason: String },

    /// The alias/mapping configuration file could not be read or parsed.
    #[error("alias config error at {path}: {reason}")]
    AliasConfig { path: String, reason: String },

    /// A tool-host manifest (`service.json`) could not be parsed.
    #[error("manifest error at {path}: {reason}")]
    Manifest { path: String, reason: String },

    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.  Prefer a typed variant whenever possible.
    #[error("internal registry error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the registry crate.
pub type Result<T> = std::result::Result<T, RegistryError>;
