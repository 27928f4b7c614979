//! Core call data model.
//!
//! A [`ToolCall`] is the normalized request flowing from the LLM through the
//! validator to the dispatcher; a [`ToolCallResult`] is what comes back.
//! [`Correction`] records every repair applied on the way in, so trajectories
//! can show exactly how a raw LLM proposal became an executed call.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Task input
// ---------------------------------------------------------------------------

/// Coarse task category, used by the dispatcher's context hashing.
///
/// The set is open: task types outside the well-known five are preserved
/// verbatim in [`TaskType::Other`], and the wire shape stays a plain string
/// either way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskType {
    Research,
    Search,
    Execute,
    Analyze,
    Install,
    /// Any other task type, carried through unchanged.
    Other(String),
}

impl TaskType {
    /// Stable label used in hashes and logs.
    pub fn label(&self) -> &str {
        match self {
            Self::Research => "research",
            Self::Search => "search",
            Self::Execute => "execute",
            Self::Analyze => "analyze",
            Self::Install => "install",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for TaskType {
    fn from(raw: String) -> Self {
        match raw.to_lowercase().as_str() {
            "research" => Self::Research,
            "search" => Self::Search,
            "execute" => Self::Execute,
            "analyze" => Self::Analyze,
            "install" => Self::Install,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for TaskType {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_owned())
    }
}

impl From<TaskType> for String {
    fn from(task_type: TaskType) -> Self {
        task_type.label().to_owned()
    }
}

/// The task record driving one reasoning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique task identifier.
    pub task_id: Uuid,

    /// Free-form task description.  Auto-completion heuristics draw from it.
    pub description: String,

    /// Coarse task category.
    #[serde(default = "default_task_type")]
    pub task_type: TaskType,

    /// Caller-supplied constraints (opaque to the core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,

    /// Caller-supplied preferences (opaque to the core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Value>,
}

fn default_task_type() -> TaskType {
    TaskType::Other("other".to_owned())
}

impl TaskSpec {
    /// Create a task with the given type and description.
    pub fn new(task_type: TaskType, description: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            description: description.into(),
            task_type,
            constraints: None,
            preferences: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool call
// ---------------------------------------------------------------------------

/// Process-local generator for monotonically increasing call ids.
#[derive(Debug, Default)]
pub struct CallIdGenerator {
    next: AtomicU64,
}

impl CallIdGenerator {
    /// Create a generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hand out the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// A normalized tool invocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Monotonically assigned within the process.
    pub call_id: u64,

    /// The task this call belongs to.
    pub task_id: Uuid,

    /// Canonical tool identifier (after alias normalization).
    pub tool_id: String,

    /// Action to invoke on the tool.
    pub action: String,

    /// Parameter name to value.
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,

    /// The LLM's reasoning text that produced this call.
    #[serde(default)]
    pub thinking: String,
}

impl ToolCall {
    /// Build a call from a parsed LLM proposal object.
    ///
    /// Expects the `{"thinking", "tool_id", "action", "parameters"}` shape;
    /// missing fields default to empty values so validation can report them.
    pub fn from_proposal(value: &Value, call_id: u64, task_id: Uuid) -> Self {
        let str_field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };

        let parameters = value
            .get("parameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Self {
            call_id,
            task_id,
            tool_id: str_field("tool_id"),
            action: str_field("action"),
            parameters,
            thinking: str_field("thinking"),
        }
    }
}

// ---------------------------------------------------------------------------
// Corrections
// ---------------------------------------------------------------------------

/// A repair applied to a call on its way through normalization/validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correction {
    /// A tool id alias was mapped to its canonical form.
    ToolIdAlias { from: String, to: String },

    /// An action alias was mapped to its canonical form.
    ActionAlias { from: String, to: String },

    /// A parameter name alias was mapped to its canonical form.
    ParameterAlias { from: String, to: String },

    /// A deprecated (tool, action) combination was remapped to its
    /// replacement.
    DeprecatedAction { from: String, to: String },

    /// A missing required parameter was filled by a heuristic.
    AutoCompleted { param: String },

    /// A parameter value was coerced to the declared type.
    Coerced { param: String, to: String },

    /// A correction patch from the critic was applied before re-validation.
    PatchApplied { patch_id: Uuid },
}

impl Correction {
    /// Stable tag for log lines and trajectory records.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ToolIdAlias { .. } => "tool_id_alias",
            Self::ActionAlias { .. } => "action_alias",
            Self::ParameterAlias { .. } => "parameter_alias",
            Self::DeprecatedAction { .. } => "deprecated_action",
            Self::AutoCompleted { .. } => "auto_completed",
            Self::Coerced { .. } => "coerced",
            Self::PatchApplied { .. } => "patch_applied",
        }
    }
}

// ---------------------------------------------------------------------------
// Call result
// ---------------------------------------------------------------------------

/// Terminal outcome of an executed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    /// The tool returned a payload.
    Success,
    /// The tool reported failure.
    Failure,
    /// The deadline expired before the tool answered.
    Timeout,
    /// Transport or internal error.
    Error,
}

impl CallOutcome {
    /// Whether this outcome counts as a success for health bookkeeping.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// The fallback tier that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Specialist tool for the capability.
    Primary,
    /// Composition of more basic tools.
    Secondary,
    /// Offline / cached synthesis.
    Fallback,
    /// User-assistance request or skeleton answer.
    Emergency,
}

impl Tier {
    /// Stable label used in results and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Fallback => "fallback",
            Self::Emergency => "emergency",
        }
    }
}

/// The result of executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The call this result answers.
    pub call_id: u64,

    /// Terminal outcome.
    pub outcome: CallOutcome,

    /// Opaque payload.  Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Error cause.  Present on any non-success outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock duration of the winning attempt, in milliseconds.
    pub duration_ms: u64,

    /// Which tier produced the result, when the tiered executor ran it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,

    /// Name of the strategy that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<String>,

    /// Corrections applied to the call before execution.
    #[serde(default)]
    pub corrections: Vec<Correction>,
}

impl ToolCallResult {
    /// Build a success result.
    pub fn success(call_id: u64, payload: Value, duration_ms: u64) -> Self {
        Self {
            call_id,
            outcome: CallOutcome::Success,
            payload: Some(payload),
            error: None,
            duration_ms,
            tier: None,
            strategy_used: None,
            corrections: Vec::new(),
        }
    }

    /// Build a non-success result with an error cause.
    pub fn failed(call_id: u64, outcome: CallOutcome, error: impl Into<String>, duration_ms: u64) -> Self {
        debug_assert!(!outcome.is_success());
        Self {
            call_id,
            outcome,
            payload: None,
            error: Some(error.into()),
            duration_ms,
            tier: None,
            strategy_used: None,
            corrections: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_ids_are_monotonic() {
        let ids = CallIdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        let c = ids.next_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn from_proposal_extracts_fields() {
        let proposal = json!({
            "thinking": "use search",
            "tool_id": "deepsearch",
            "action": "search",
            "parameters": {"query": "python asyncio tutorial"}
        });

        let call = ToolCall::from_proposal(&proposal, 7, Uuid::now_v7());
        assert_eq!(call.call_id, 7);
        assert_eq!(call.tool_id, "deepsearch");
        assert_eq!(call.action, "search");
        assert_eq!(call.thinking, "use search");
        assert_eq!(
            call.parameters.get("query").and_then(Value::as_str),
            Some("python asyncio tutorial")
        );
    }

    #[test]
    fn from_proposal_tolerates_missing_fields() {
        let call = ToolCall::from_proposal(&json!({}), 1, Uuid::now_v7());
        assert!(call.tool_id.is_empty());
        assert!(call.action.is_empty());
        assert!(call.parameters.is_empty());
    }

    #[test]
    fn task_type_preserves_custom_values() {
        assert_eq!(TaskType::from("research"), TaskType::Research);
        assert_eq!(TaskType::from("Execute"), TaskType::Execute);
        assert_eq!(
            TaskType::from("summarize"),
            TaskType::Other("summarize".to_owned())
        );
        assert_eq!(TaskType::from("summarize").label(), "summarize");
    }

    #[test]
    fn task_type_wire_shape_is_a_plain_string() {
        let task = TaskSpec::new(TaskType::from("summarize"), "sum up the report");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["task_type"], "summarize");

        let parsed: TaskSpec = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.task_type, TaskType::Other("summarize".to_owned()));

        let known: TaskType = serde_json::from_value(json!("install")).unwrap();
        assert_eq!(known, TaskType::Install);
    }

    #[test]
    fn correction_tags_are_stable() {
        let c = Correction::ToolIdAlias {
            from: "deepsearch".into(),
            to: "mcp-deepsearch".into(),
        };
        assert_eq!(c.tag(), "tool_id_alias");

        let c = Correction::AutoCompleted { param: "code".into() };
        assert_eq!(c.tag(), "auto_completed");
    }

    #[test]
    fn result_invariants() {
        let ok = ToolCallResult::success(1, json!({"answer": 42}), 10);
        assert!(ok.payload.is_some());
        assert!(ok.error.is_none());

        let bad = ToolCallResult::failed(2, CallOutcome::Timeout, "deadline exceeded", 5000);
        assert!(bad.payload.is_none());
        assert!(bad.error.is_some());
    }
}
