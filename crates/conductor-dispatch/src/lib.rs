//! Conductor dispatch layer.
//!
//! Everything that turns a validated call into an executed one and keeps the
//! loop making progress under faults:
//!
//! - **[`dispatcher`]** -- Adaptive ranking of redundant `(tool, action)`
//!   candidates per capability, with learned score weights.
//! - **[`executor`]** -- Tiered fallback execution
//!   (primary/secondary/fallback/emergency) with per-strategy timeouts and
//!   auto-disable.
//! - **[`strategies`]** -- Built-in strategy runners and the synthesis cache
//!   behind the fallback tier.
//! - **[`recovery`]** -- Category-driven recovery plans with learned action
//!   success rates.
//! - **[`healing`]** -- The background self-healing rule loop.
//! - **[`caller`]** -- The [`ToolCaller`] seam to MCP transports.
//! - **[`error`]** -- Unified dispatch error types via [`thiserror`].

pub mod caller;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod healing;
pub mod recovery;
pub mod strategies;

// Re-export the most commonly used types at the crate root for convenience.
pub use caller::{MaintenanceHooks, NoopMaintenance, ToolCaller};
pub use dispatcher::{
    AdaptiveDispatcher, Candidate, DispatcherConfig, DispatcherState, ScoreWeights,
};
pub use error::{DispatchError, Result};
pub use executor::{
    AttemptRecord, CapabilityRequest, ExecutionReport, ExecutorConfig, ExecutorState, Strategy,
    StrategyRunner, TieredExecutor,
};
pub use healing::{HealingAction, HealingConfig, IdleLoadProbe, LoadProbe, SelfHealer};
pub use recovery::{RecoveryConfig, RecoveryEngine, RecoveryReport};
pub use strategies::{SynthesisCache, default_strategy_lists};
