//! Structured-call validator and auto-corrector.
//!
//! Validation runs a fixed pipeline over every LLM-proposed call: alias
//! normalization, tool and action resolution against the live registry
//! snapshot, required-parameter and type checks with auto-coercion,
//! auto-completion of missing required parameters from the task context, and
//! tool-specific cross-parameter rules.  A schema-violating call never
//! reaches the dispatcher; every repair applied on the way is recorded as a
//! [`Correction`].

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::alias::AliasMapper;
use crate::call::{Correction, TaskSpec, ToolCall};
use crate::registry::{RegistrySnapshot, SchemaRegistry};
use crate::schema::{ActionSpec, ParamSpec, ParamType};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Why a call was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// The tool id does not resolve in the current snapshot, even after a
    /// one-shot discovery refresh.
    UnknownTool {
        tool_id: String,
        suggestions: Vec<String>,
    },

    /// The action does not resolve in the tool's schema.
    UnsupportedAction {
        tool_id: String,
        action: String,
        suggestion: Option<String>,
        available: Vec<String>,
    },

    /// Required parameters are missing and auto-completion could not fill
    /// them.
    MissingParameters { missing: Vec<String> },

    /// Parameter values are incompatible with the declared types and could
    /// not be coerced.
    InvalidParameters { errors: Vec<String> },
}

impl ValidationFailure {
    /// Stable failure kind label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "unknown_tool",
            Self::UnsupportedAction { .. } => "unsupported_action",
            Self::MissingParameters { .. } => "missing_parameters",
            Self::InvalidParameters { .. } => "invalid_parameters",
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTool {
                tool_id,
                suggestions,
            } => {
                write!(f, "unknown tool `{tool_id}`")?;
                if !suggestions.is_empty() {
                    write!(f, "; similar tools: {}", suggestions.join(", "))?;
                }
                Ok(())
            }
            Self::UnsupportedAction {
                tool_id,
                action,
                suggestion,
                available,
            } => {
                write!(f, "tool `{tool_id}` does not support action `{action}`")?;
                if let Some(s) = suggestion {
                    write!(f, "; did you mean `{s}`?")?;
                }
                if !available.is_empty() {
                    write!(f, " available: {}", available.join(", "))?;
                }
                Ok(())
            }
            Self::MissingParameters { missing } => {
                write!(f, "missing required parameters: {}", missing.join(", "))
            }
            Self::InvalidParameters { errors } => {
                write!(f, "invalid parameters: {}", errors.join("; "))
            }
        }
    }
}

/// The outcome of validating one call.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Whether the call may proceed to the dispatcher.
    pub is_valid: bool,

    /// Required parameters that were missing before auto-completion.
    pub missing_required: Vec<String>,

    /// Undeclared parameters that were dropped from the call.
    pub invalid_params: Vec<String>,

    /// Type incompatibilities that auto-coercion could not resolve.
    pub type_errors: Vec<String>,

    /// Every repair applied, in order.
    pub corrections: Vec<Correction>,

    /// The normalized (and possibly auto-completed) call.
    pub call: ToolCall,

    /// The rejection reason, when `is_valid` is false.
    pub failure: Option<ValidationFailure>,
}

impl ValidationReport {
    /// Human-readable error message for the failure, if any.
    pub fn error_message(&self) -> Option<String> {
        self.failure.as_ref().map(ToString::to_string)
    }

    /// Whether a given correction tag was applied.
    pub fn has_correction(&self, tag: &str) -> bool {
        self.corrections.iter().any(|c| c.tag() == tag)
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Validates and repairs LLM-proposed tool calls against the live registry.
pub struct Validator {
    registry: Arc<SchemaRegistry>,
    aliases: Arc<AliasMapper>,
}

impl Validator {
    /// Create a validator over the given registry and alias tables.
    pub fn new(registry: Arc<SchemaRegistry>, aliases: Arc<AliasMapper>) -> Self {
        Self { registry, aliases }
    }

    /// The alias mapper this validator normalizes with.
    pub fn aliases(&self) -> &Arc<AliasMapper> {
        &self.aliases
    }

    /// Run the full validation pipeline over a call.
    pub async fn validate(&self, call: &ToolCall, task: &TaskSpec) -> ValidationReport {
        // Stage 1: alias normalization.
        let (mut call, mut corrections) = self.aliases.normalize(call);

        // Stage 2: resolve the tool, with a one-shot discovery refresh.
        let mut snapshot = self.registry.snapshot();
        let schema = match snapshot.lookup(&call.tool_id) {
            Some(schema) => schema,
            None => {
                tracing::debug!(tool_id = %call.tool_id, "unknown tool, attempting discovery refresh");
                if let Err(e) = self.registry.refresh(true).await {
                    tracing::debug!(error = %e, "discovery refresh failed");
                }
                snapshot = self.registry.snapshot();
                match snapshot.lookup(&call.tool_id) {
                    Some(schema) => schema,
                    None => {
                        let suggestions = suggest_tools(&call.tool_id, &snapshot);
                        return self.reject(
                            call,
                            corrections,
                            ValidationFailure::UnknownTool {
                                tool_id: String::new(),
                                suggestions,
                            },
                        );
                    }
                }
            }
        };

        // Stage 3: resolve the action.  The alias layer has already applied
        // action aliases and deprecated remaps; anything left unresolved gets
        // an edit-distance suggestion but does not execute.
        let Some(action) = schema.action(&call.action).cloned() else {
            let available: Vec<String> =
                schema.action_names().iter().map(|s| (*s).to_owned()).collect();
            let failure = ValidationFailure::UnsupportedAction {
                tool_id: call.tool_id.clone(),
                action: call.action.clone(),
                suggestion: nearest_match(&call.action, &available),
                available,
            };
            return self.reject(call, corrections, failure);
        };

        // Stage 4: parameter presence and type checks with coercion.
        let mut invalid_params = Vec::new();
        let mut type_errors = Vec::new();

        let declared: Vec<String> = action.params.iter().map(|p| p.name.clone()).collect();
        let undeclared: Vec<String> = call
            .parameters
            .keys()
            .filter(|k| !declared.contains(k))
            .cloned()
            .collect();
        for name in &undeclared {
            tracing::debug!(param = %name, "dropping undeclared parameter");
            call.parameters.remove(name);
            invalid_params.push(name.clone());
        }

        for spec in &action.params {
            let Some(value) = call.parameters.get(&spec.name) else {
                continue;
            };
            match coerce(value, spec.param_type) {
                Ok((coerced, changed)) => {
                    if changed {
                        corrections.push(Correction::Coerced {
                            param: spec.name.clone(),
                            to: spec.param_type.name().to_owned(),
                        });
                        call.parameters.insert(spec.name.clone(), coerced);
                    }
                }
                Err(reason) => {
                    type_errors.push(format!("{}: {reason}", spec.name));
                }
            }
        }

        // Required set: schema contract plus configured overrides.
        let mut required: Vec<String> = action
            .required_params()
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        if let Some(extra) = self
            .aliases
            .required_params_override(&call.tool_id, &call.action)
        {
            for name in extra {
                if !required.contains(&name) {
                    required.push(name);
                }
            }
        }

        let mut missing: Vec<String> = required
            .iter()
            .filter(|name| {
                call.parameters
                    .get(*name)
                    .is_none_or(is_empty_value)
            })
            .cloned()
            .collect();
        let missing_before = missing.clone();

        // Stage 5: auto-complete missing required parameters.
        missing.retain(|name| {
            let completed = complete_param(name, action.param(name), &action, task);
            match completed {
                Some(value) => {
                    tracing::info!(
                        call_id = call.call_id,
                        param = %name,
                        "auto-completed missing required parameter"
                    );
                    call.parameters.insert(name.clone(), value);
                    corrections.push(Correction::AutoCompleted {
                        param: name.clone(),
                    });
                    false
                }
                None => true,
            }
        });

        if !missing.is_empty() {
            let mut report = self.reject(
                call,
                corrections,
                ValidationFailure::MissingParameters {
                    missing: missing.clone(),
                },
            );
            report.missing_required = missing_before;
            report.invalid_params = invalid_params;
            report.type_errors = type_errors;
            return report;
        }

        if !type_errors.is_empty() {
            let mut report = self.reject(
                call,
                corrections,
                ValidationFailure::InvalidParameters {
                    errors: type_errors.clone(),
                },
            );
            report.missing_required = missing_before;
            report.invalid_params = invalid_params;
            report.type_errors = type_errors;
            return report;
        }

        // Stage 6: cross-parameter consistency rules.
        if let Some(failure) = apply_cross_rules(&mut call, task, &mut corrections) {
            let mut report = self.reject(call, corrections, failure);
            report.missing_required = missing_before;
            report.invalid_params = invalid_params;
            return report;
        }

        ValidationReport {
            is_valid: true,
            missing_required: missing_before,
            invalid_params,
            type_errors: Vec::new(),
            corrections,
            call,
            failure: None,
        }
    }

    fn reject(
        &self,
        mut call: ToolCall,
        corrections: Vec<Correction>,
        mut failure: ValidationFailure,
    ) -> ValidationReport {
        if let ValidationFailure::UnknownTool { tool_id, .. } = &mut failure {
            *tool_id = call.tool_id.clone();
        }
        call.parameters.retain(|_, v| !v.is_null());

        tracing::warn!(
            call_id = call.call_id,
            tool_id = %call.tool_id,
            action = %call.action,
            kind = failure.kind(),
            "call rejected by validator"
        );

        ValidationReport {
            is_valid: false,
            missing_required: Vec::new(),
            invalid_params: Vec::new(),
            type_errors: Vec::new(),
            corrections,
            call,
            failure: Some(failure),
        }
    }
}

// ---------------------------------------------------------------------------
// Value checks and coercion
// ---------------------------------------------------------------------------

/// Empty string / collection counts as missing for required parameters.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Coerce a value to the declared type.
///
/// Returns the (possibly rewritten) value and whether a rewrite happened, or
/// an error string when the value is incompatible.
pub fn coerce(value: &Value, target: ParamType) -> std::result::Result<(Value, bool), String> {
    match target {
        ParamType::String => match value {
            Value::String(_) => Ok((value.clone(), false)),
            Value::Number(n) => Ok((Value::String(n.to_string()), true)),
            Value::Bool(b) => Ok((Value::String(b.to_string()), true)),
            other => Err(format!("expected string, got {}", type_name(other))),
        },
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok((value.clone(), false)),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok((Value::from(f as i64), true)),
                _ => Err("expected integer, got fractional number".to_owned()),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| (Value::from(i), true))
                .map_err(|_| format!("expected integer, got string `{s}`")),
            other => Err(format!("expected integer, got {}", type_name(other))),
        },
        ParamType::Number => match value {
            Value::Number(_) => Ok((value.clone(), false)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(|f| (Value::from(f), true))
                .map_err(|_| format!("expected number, got string `{s}`")),
            other => Err(format!("expected number, got {}", type_name(other))),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok((value.clone(), false)),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok((Value::Bool(true), true)),
                "false" | "0" | "no" | "off" => Ok((Value::Bool(false), true)),
                _ => Err(format!("expected boolean, got string `{s}`")),
            },
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok((Value::Bool(false), true)),
                Some(1) => Ok((Value::Bool(true), true)),
                _ => Err("expected boolean, got number".to_owned()),
            },
            other => Err(format!("expected boolean, got {}", type_name(other))),
        },
        ParamType::List => match value {
            Value::Array(_) => Ok((value.clone(), false)),
            other => Err(format!("expected list, got {}", type_name(other))),
        },
        ParamType::Map => match value {
            Value::Object(_) => Ok((value.clone(), false)),
            other => Err(format!("expected map, got {}", type_name(other))),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

// ---------------------------------------------------------------------------
// Auto-completion heuristics
// ---------------------------------------------------------------------------

fn complete_param(
    name: &str,
    spec: Option<&ParamSpec>,
    action: &ActionSpec,
    task: &TaskSpec,
) -> Option<Value> {
    let desc = task.description.trim();

    let heuristic = match name {
        "question" | "query" | "task" | "task_description" => {
            (!desc.is_empty()).then(|| Value::String(desc.to_owned()))
        }
        "code" => (!desc.is_empty()).then(|| Value::String(code_stub(desc))),
        "url" => complete_url(desc),
        "index" => complete_index(desc),
        "text" => complete_text(desc),
        _ => None,
    };

    heuristic
        .or_else(|| spec.and_then(|s| s.default.clone()))
        .or_else(|| action.example_value(name).cloned())
}

/// Minimal runnable stub carrying the task description as a comment.
fn code_stub(description: &str) -> String {
    let first_line = description.lines().next().unwrap_or(description);
    format!("# {first_line}\nresult = None\nprint(result)")
}

fn complete_url(description: &str) -> Option<Value> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"https?://[^\s"')\]]+"#).expect("static regex"));

    if let Some(m) = re.find(description) {
        let candidate = m.as_str().trim_end_matches(['.', ',']);
        if url::Url::parse(candidate).is_ok() {
            return Some(Value::String(candidate.to_owned()));
        }
    }

    let lowered = description.to_lowercase();
    let known = [
        ("google", "https://www.google.com"),
        ("github", "https://github.com"),
        ("python", "https://www.python.org"),
        ("wikipedia", "https://www.wikipedia.org"),
    ];
    known
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, url)| Value::String((*url).to_owned()))
}

fn complete_index(description: &str) -> Option<Value> {
    let lowered = description.to_lowercase();
    if lowered.contains("first") {
        Some(Value::from(0))
    } else if lowered.contains("second") {
        Some(Value::from(1))
    } else if lowered.contains("button") {
        Some(Value::from(1))
    } else {
        None
    }
}

fn complete_text(description: &str) -> Option<Value> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"["']([^"']+)["']"#).expect("static regex"));

    if let Some(caps) = re.captures(description) {
        return Some(Value::String(caps[1].to_owned()));
    }
    if description.is_empty() {
        return None;
    }
    let truncated: String = description.chars().take(50).collect();
    Some(Value::String(truncated))
}

// ---------------------------------------------------------------------------
// Cross-parameter rules
// ---------------------------------------------------------------------------

fn apply_cross_rules(
    call: &mut ToolCall,
    task: &TaskSpec,
    corrections: &mut Vec<Correction>,
) -> Option<ValidationFailure> {
    match (call.tool_id.as_str(), call.action.as_str()) {
        ("browser_use", "browser_input_text") => {
            let index_ok = call
                .parameters
                .get("index")
                .map(|v| coerce(v, ParamType::Integer))
                .is_some_and(|r| r.is_ok());
            if !index_ok {
                return Some(ValidationFailure::InvalidParameters {
                    errors: vec!["index: expected integer".to_owned()],
                });
            }
            let text_empty = call.parameters.get("text").is_none_or(is_empty_value);
            if text_empty {
                return Some(ValidationFailure::InvalidParameters {
                    errors: vec!["text: must be a non-empty string".to_owned()],
                });
            }
            None
        }
        ("mcp-deepsearch", "research" | "quick_research" | "comprehensive_research") => {
            let too_short = call
                .parameters
                .get("question")
                .and_then(Value::as_str)
                .is_some_and(|q| q.trim().len() < 3);
            if too_short && !task.description.trim().is_empty() {
                call.parameters.insert(
                    "question".to_owned(),
                    Value::String(task.description.trim().to_owned()),
                );
                corrections.push(Correction::AutoCompleted {
                    param: "question".to_owned(),
                });
            }
            None
        }
        ("microsandbox", "microsandbox_execute") => {
            let needs_stub = call
                .parameters
                .get("code")
                .and_then(Value::as_str)
                .is_some_and(|code| {
                    !["print", "import", "=", "def ", "class ", "("]
                        .iter()
                        .any(|marker| code.contains(marker))
                });
            if needs_stub {
                let original = call
                    .parameters
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                call.parameters.insert(
                    "code".to_owned(),
                    Value::String(format!("# {original}\n{}", code_stub(&task.description))),
                );
                corrections.push(Correction::AutoCompleted {
                    param: "code".to_owned(),
                });
            }
            None
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

/// Levenshtein edit distance.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let insert = previous[j + 1] + 1;
            let delete = current[j] + 1;
            let substitute = previous[j] + usize::from(ca != cb);
            current.push(insert.min(delete).min(substitute));
        }
        previous = current;
    }
    previous[b.len()]
}

/// The candidate nearest to `target`, if it is close enough to be a
/// plausible typo (distance at most half the longer length).
pub fn nearest_match(target: &str, candidates: &[String]) -> Option<String> {
    let target_lower = target.to_lowercase();
    let best = candidates
        .iter()
        .map(|c| (edit_distance(&target_lower, &c.to_lowercase()), c))
        .min_by_key(|(d, _)| *d)?;

    let max_allowed = target.chars().count().max(best.1.chars().count()) / 2;
    (best.0 <= max_allowed).then(|| best.1.clone())
}

/// Suggest alternative tool ids for an unknown tool: keyword classes first,
/// then edit distance against the live catalog.
pub fn suggest_tools(tool_id: &str, snapshot: &RegistrySnapshot) -> Vec<String> {
    let lowered = tool_id.to_lowercase();
    let mut suggestions = Vec::new();

    let mut push_if_live = |candidate: &str| {
        if snapshot.lookup(candidate).is_some()
            && !suggestions.iter().any(|s: &String| s == candidate)
        {
            suggestions.push(candidate.to_owned());
        }
    };

    if ["browser", "web", "navigate"].iter().any(|k| lowered.contains(k)) {
        push_if_live("browser_use");
    }
    if ["code", "python", "sandbox", "execute"].iter().any(|k| lowered.contains(k)) {
        push_if_live("microsandbox");
    }
    if ["search", "research"].iter().any(|k| lowered.contains(k)) {
        if lowered.contains("file") || lowered.contains("code") {
            push_if_live("mcp-search-tool");
        } else {
            push_if_live("mcp-deepsearch");
        }
    }

    let live_ids = snapshot.tool_ids();
    if let Some(nearest) = nearest_match(tool_id, &live_ids) {
        if !suggestions.contains(&nearest) {
            suggestions.push(nearest);
        }
    }

    suggestions
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
