//! Error event model.
//!
//! An [`ErrorEvent`] is the immutable record of one failure anywhere in the
//! runtime.  Events are appended to the health ledger, never mutated, and
//! evicted by age or capacity.  The [`FailureSignature`] derived from an
//! event is what trigger logic counts: two events with the same signature
//! may be coalesced for decisions but remain distinct records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How bad an error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// One level more severe (saturating at `Critical`).
    pub fn step_up(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    /// Stable label used in logs and serialized records.
    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Coarse failure category driving recovery selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Tool,
    Resource,
    Configuration,
    Dependency,
    Data,
    System,
}

impl ErrorCategory {
    /// Stable label used in logs and serialized records.
    pub fn label(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Tool => "tool",
            Self::Resource => "resource",
            Self::Configuration => "configuration",
            Self::Dependency => "dependency",
            Self::Data => "data",
            Self::System => "system",
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Unique event id; ledger recording is idempotent with respect to it.
    pub error_id: Uuid,

    /// When the failure happened.
    pub timestamp: DateTime<Utc>,

    /// The component that raised it (e.g. "executor", "mcp-deepsearch").
    pub component: String,

    /// Short error type label (e.g. "TimeoutError", "unsupported_action").
    pub error_type: String,

    /// Human-readable message.
    pub message: String,

    /// Assessed severity.
    pub severity: ErrorSeverity,

    /// Assessed category.
    pub category: ErrorCategory,

    /// The tool involved, when the failure came from a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,

    /// The action involved, when the failure came from a tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Snapshot of the call parameters at failure time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Map<String, Value>>,
}

impl ErrorEvent {
    /// Create an event stamped with a fresh id and the current time.
    pub fn new(
        component: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
        severity: ErrorSeverity,
        category: ErrorCategory,
    ) -> Self {
        Self {
            error_id: Uuid::now_v7(),
            timestamp: Utc::now(),
            component: component.into(),
            error_type: error_type.into(),
            message: message.into(),
            severity,
            category,
            tool_id: None,
            action: None,
            parameters: None,
        }
    }

    /// Attach the failing call's coordinates (builder style).
    #[must_use]
    pub fn with_call(
        mut self,
        tool_id: impl Into<String>,
        action: impl Into<String>,
        parameters: Option<serde_json::Map<String, Value>>,
    ) -> Self {
        self.tool_id = Some(tool_id.into());
        self.action = Some(action.into());
        self.parameters = parameters;
        self
    }

    /// Derive the counting signature for this event.
    pub fn signature(&self) -> FailureSignature {
        FailureSignature {
            tool_id: self.tool_id.clone().unwrap_or_else(|| self.component.clone()),
            action: self.action.clone().unwrap_or_default(),
            error_type: self.error_type.clone(),
        }
    }
}

/// The `(tool_id, action, error_type)` triple used to count repeated
/// failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureSignature {
    pub tool_id: String,
    pub action: String,
    pub error_type: String,
}

impl fmt::Display for FailureSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.tool_id, self.action, self.error_type)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_step_up_saturates() {
        assert_eq!(ErrorSeverity::Low.step_up(), ErrorSeverity::Medium);
        assert_eq!(ErrorSeverity::High.step_up(), ErrorSeverity::Critical);
        assert_eq!(ErrorSeverity::Critical.step_up(), ErrorSeverity::Critical);
    }

    #[test]
    fn signature_uses_call_coordinates() {
        let event = ErrorEvent::new(
            "executor",
            "ToolError",
            "boom",
            ErrorSeverity::Medium,
            ErrorCategory::Tool,
        )
        .with_call("mcp-deepsearch", "research", None);

        let sig = event.signature();
        assert_eq!(sig.to_string(), "mcp-deepsearch::research::ToolError");
    }

    #[test]
    fn signature_falls_back_to_component() {
        let event = ErrorEvent::new(
            "listener",
            "NetworkError",
            "socket closed",
            ErrorSeverity::Medium,
            ErrorCategory::Network,
        );
        assert_eq!(event.signature().tool_id, "listener");
    }

    #[test]
    fn same_signature_distinct_events() {
        let a = ErrorEvent::new("e", "T", "m", ErrorSeverity::Low, ErrorCategory::Tool)
            .with_call("t", "a", None);
        let b = ErrorEvent::new("e", "T", "m", ErrorSeverity::Low, ErrorCategory::Tool)
            .with_call("t", "a", None);

        assert_eq!(a.signature(), b.signature());
        assert_ne!(a.error_id, b.error_id);
    }
}
