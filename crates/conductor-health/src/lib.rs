//! Conductor health tracking.
//!
//! This crate owns failure bookkeeping for the Conductor runtime:
//!
//! - **[`event`]** -- Immutable [`ErrorEvent`] records and the
//!   [`FailureSignature`] triples trigger logic counts.
//! - **[`classifier`]** -- Keyword-driven mapping of raw failures into
//!   `(category, severity)` pairs.
//! - **[`ledger`]** -- Per-tool rolling health records, reliability scores,
//!   offline flags, and the global/per-tool event windows.
//!
//! The ledger is the single writer of health state; every other component
//! holds a read-only handle.

pub mod classifier;
pub mod event;
pub mod ledger;

// Re-export the most commonly used types at the crate root for convenience.
pub use classifier::ErrorClassifier;
pub use event::{ErrorCategory, ErrorEvent, ErrorSeverity, FailureSignature};
pub use ledger::{HealthLedger, LedgerConfig, LedgerState, ToolHealthRecord};
