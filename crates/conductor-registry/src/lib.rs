//! Conductor tool-schema registry.
//!
//! This crate is the contract layer of the Conductor runtime:
//!
//! - **[`registry`]** -- Live tool-schema registry with atomic snapshots,
//!   serialized incremental refresh, and last-known-good rollback.
//! - **[`alias`]** -- Alias and mapping layer normalizing LLM-emitted tool
//!   ids, action names, and parameter names to canonical form.
//! - **[`validator`]** -- Structured-call validator with auto-coercion,
//!   auto-completion from task context, and cross-parameter rules.
//! - **[`manifest`]** -- Discovery of local `service.json` tool descriptors
//!   and schema/manifest consistency checking.
//! - **[`repair`]** -- JSON extraction and repair for raw LLM output.
//! - **[`call`]** -- The core call data model shared across the runtime.
//! - **[`error`]** -- Unified registry error types via [`thiserror`].
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod alias;
pub mod call;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod repair;
pub mod schema;
pub mod validator;

// Re-export the most commonly used types at the crate root for convenience.
pub use alias::{AliasConfig, AliasMapper, builtin_defaults};
pub use call::{
    CallIdGenerator, CallOutcome, Correction, TaskSpec, TaskType, Tier, ToolCall, ToolCallResult,
};
pub use error::{RegistryError, Result};
pub use registry::{
    RefreshOutcome, RegistryConfig, RegistrySnapshot, SchemaRegistry, SchemaSource, StaticSource,
    stable_hash,
};
pub use repair::extract_json;
pub use schema::{ActionSpec, ParamSpec, ParamType, ToolSchema, builtin_catalog};
pub use validator::{ValidationFailure, ValidationReport, Validator};
