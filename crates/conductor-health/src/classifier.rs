//! Error classification.
//!
//! Maps a raw failure (type label + message + originating component) to an
//! [`ErrorCategory`] and [`ErrorSeverity`].  Category matching runs keyword
//! automatons over the lowercased message; severity starts from a per-category
//! baseline and is bumped for core components and for components that have
//! been failing repeatedly.

use aho_corasick::AhoCorasick;

use crate::event::{ErrorCategory, ErrorEvent, ErrorSeverity};

/// Components whose failures are always treated more seriously.
const CORE_COMPONENTS: &[&str] = &["registry", "dispatcher", "recovery"];

/// Failures per hour above which a component's severity is bumped.
const REPEAT_FAILURE_BUMP: usize = 5;

/// Keyword-driven error classifier.
pub struct ErrorClassifier {
    network: AhoCorasick,
    timeout: AhoCorasick,
    resource: AhoCorasick,
    configuration: AhoCorasick,
    dependency: AhoCorasick,
    data: AhoCorasick,
}

impl ErrorClassifier {
    /// Build the classifier with its built-in keyword tables.
    pub fn new() -> Self {
        let build = |patterns: &[&str]| {
            AhoCorasick::new(patterns).expect("static keyword patterns")
        };

        Self {
            network: build(&["connect", "connection", "socket", "dns", "http", "network", "unreachable"]),
            timeout: build(&["timeout", "timed out", "deadline"]),
            resource: build(&["memory", "disk", "space", "quota", "resource", "limit exceeded"]),
            configuration: build(&["config", "setting", "missing required setting", "env var"]),
            dependency: build(&["import", "module", "dependency", "missing binding"]),
            data: build(&["json", "parse", "format", "decode", "malformed"]),
        }
    }

    /// Classify a failure into `(category, severity)`.
    ///
    /// `recent_component_failures` is the component's failure count over the
    /// last hour, read from the ledger by the caller.
    pub fn classify(
        &self,
        error_type: &str,
        message: &str,
        component: &str,
        tool_involved: bool,
        recent_component_failures: usize,
    ) -> (ErrorCategory, ErrorSeverity) {
        let haystack = format!("{} {}", error_type.to_lowercase(), message.to_lowercase());

        let category = if self.timeout.is_match(&haystack) {
            ErrorCategory::Timeout
        } else if self.network.is_match(&haystack) {
            ErrorCategory::Network
        } else if tool_involved || component.starts_with("mcp-") || component.contains("tool") {
            ErrorCategory::Tool
        } else if self.resource.is_match(&haystack) {
            ErrorCategory::Resource
        } else if self.configuration.is_match(&haystack) {
            ErrorCategory::Configuration
        } else if self.dependency.is_match(&haystack) {
            ErrorCategory::Dependency
        } else if self.data.is_match(&haystack) {
            ErrorCategory::Data
        } else {
            ErrorCategory::System
        };

        let mut severity = baseline_severity(category);

        let is_core = CORE_COMPONENTS.iter().any(|core| component.contains(core));
        if is_core {
            severity = severity.step_up();
        }
        if recent_component_failures > REPEAT_FAILURE_BUMP {
            severity = severity.step_up();
        }
        if is_core && severity < ErrorSeverity::Medium {
            severity = ErrorSeverity::Medium;
        }

        (category, severity)
    }

    /// Build a fully classified [`ErrorEvent`] in one step.
    #[allow(clippy::too_many_arguments)]
    pub fn event(
        &self,
        component: &str,
        error_type: &str,
        message: &str,
        tool_id: Option<&str>,
        action: Option<&str>,
        parameters: Option<serde_json::Map<String, serde_json::Value>>,
        recent_component_failures: usize,
    ) -> ErrorEvent {
        let (category, severity) = self.classify(
            error_type,
            message,
            component,
            tool_id.is_some(),
            recent_component_failures,
        );

        let mut event = ErrorEvent::new(component, error_type, message, severity, category);
        if let (Some(tool_id), Some(action)) = (tool_id, action) {
            event = event.with_call(tool_id, action, parameters);
        }

        tracing::debug!(
            component = %component,
            category = category.label(),
            severity = severity.label(),
            "error classified"
        );

        event
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Baseline severity per category.
fn baseline_severity(category: ErrorCategory) -> ErrorSeverity {
    match category {
        ErrorCategory::Dependency => ErrorSeverity::Critical,
        ErrorCategory::Resource | ErrorCategory::Configuration | ErrorCategory::System => {
            ErrorSeverity::High
        }
        ErrorCategory::Network | ErrorCategory::Tool | ErrorCategory::Data => ErrorSeverity::Medium,
        ErrorCategory::Timeout => ErrorSeverity::Low,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(error_type: &str, message: &str) -> (ErrorCategory, ErrorSeverity) {
        ErrorClassifier::new().classify(error_type, message, "executor", false, 0)
    }

    #[test]
    fn category_keyword_table() {
        assert_eq!(classify("Error", "connection refused by host").0, ErrorCategory::Network);
        assert_eq!(classify("TimeoutError", "deadline exceeded").0, ErrorCategory::Timeout);
        assert_eq!(classify("Error", "out of memory").0, ErrorCategory::Resource);
        assert_eq!(classify("Error", "missing config key").0, ErrorCategory::Configuration);
        assert_eq!(classify("Error", "cannot import module foo").0, ErrorCategory::Dependency);
        assert_eq!(classify("Error", "failed to parse json body").0, ErrorCategory::Data);
        assert_eq!(classify("Error", "something odd happened").0, ErrorCategory::System);
    }

    #[test]
    fn tool_component_classifies_as_tool_error() {
        let classifier = ErrorClassifier::new();
        let (category, severity) =
            classifier.classify("ToolError", "execution failed", "mcp-deepsearch", true, 0);
        assert_eq!(category, ErrorCategory::Tool);
        assert_eq!(severity, ErrorSeverity::Medium);
    }

    #[test]
    fn severity_baselines() {
        assert_eq!(classify("Error", "cannot import module x").1, ErrorSeverity::Critical);
        assert_eq!(classify("Error", "disk full").1, ErrorSeverity::High);
        assert_eq!(classify("TimeoutError", "timed out").1, ErrorSeverity::Low);
        assert_eq!(classify("Error", "connection reset").1, ErrorSeverity::Medium);
    }

    #[test]
    fn core_component_bumps_severity() {
        let classifier = ErrorClassifier::new();
        let (_, severity) = classifier.classify("TimeoutError", "timed out", "registry", false, 0);
        // Timeout baseline is low; core components step up one level.
        assert_eq!(severity, ErrorSeverity::Medium);
    }

    #[test]
    fn repeated_failures_bump_severity() {
        let classifier = ErrorClassifier::new();
        let (_, quiet) = classifier.classify("Error", "connection reset", "executor", false, 0);
        let (_, noisy) = classifier.classify("Error", "connection reset", "executor", false, 10);
        assert_eq!(quiet, ErrorSeverity::Medium);
        assert_eq!(noisy, ErrorSeverity::High);
    }

    #[test]
    fn event_builder_attaches_call_context() {
        let classifier = ErrorClassifier::new();
        let event = classifier.event(
            "executor",
            "ToolError",
            "tool returned failure",
            Some("browser_use"),
            Some("browser_navigate"),
            None,
            0,
        );

        assert_eq!(event.tool_id.as_deref(), Some("browser_use"));
        assert_eq!(event.category, ErrorCategory::Tool);
    }
}
