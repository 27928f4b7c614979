//! Tool schema definitions.
//!
//! A [`ToolSchema`] describes one MCP tool server: its identity, category,
//! version, and the set of actions it exposes.  Each [`ActionSpec`] declares
//! an ordered parameter contract.  These records are the single source of
//! truth for what the LLM is allowed to call; the registry distributes them
//! to readers as immutable snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Parameter model
// ---------------------------------------------------------------------------

/// The semantic type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// UTF-8 text.
    String,
    /// Whole number.
    Integer,
    /// Floating-point number.
    Number,
    /// True/false flag.
    Boolean,
    /// Ordered sequence of values.
    List,
    /// String-keyed mapping.
    Map,
}

impl ParamType {
    /// Human-readable name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Map => "map",
        }
    }
}

/// Contract for a single parameter of an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name as it appears in the call's parameter map.
    pub name: String,

    /// Semantic type the value must be compatible with.
    pub param_type: ParamType,

    /// Whether the parameter must be present and non-empty.
    pub required: bool,

    /// Human description shown to the LLM.
    pub description: String,

    /// Default value for optional parameters.  A required parameter never
    /// carries a default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamSpec {
    /// Create a required parameter.
    pub fn required(name: impl Into<String>, param_type: ParamType, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: desc.into(),
            default: None,
        }
    }

    /// Create an optional parameter.
    pub fn optional(name: impl Into<String>, param_type: ParamType, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: desc.into(),
            default: None,
        }
    }

    /// Attach a default value (builder style).
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

// ---------------------------------------------------------------------------
// Action model
// ---------------------------------------------------------------------------

/// Contract for a single action exposed by a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action name (unique within its tool).
    pub name: String,

    /// Human description shown to the LLM.
    pub description: String,

    /// Declared parameters, in declaration order.
    #[serde(default)]
    pub params: Vec<ParamSpec>,

    /// Optional example invocation that satisfies the contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Map<String, Value>>,
}

impl ActionSpec {
    /// Create an action with no parameters.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            example: None,
        }
    }

    /// Add a parameter (builder style).
    #[must_use]
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Attach an example invocation (builder style).
    #[must_use]
    pub fn with_example(mut self, example: serde_json::Map<String, Value>) -> Self {
        self.example = Some(example);
        self
    }

    /// Look up a parameter spec by name.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Names of all required parameters.
    pub fn required_params(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// The example value for a parameter, if an example invocation carries it.
    pub fn example_value(&self, name: &str) -> Option<&Value> {
        self.example.as_ref().and_then(|ex| ex.get(name))
    }
}

// ---------------------------------------------------------------------------
// Tool schema
// ---------------------------------------------------------------------------

/// Full contract for one tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Canonical tool identifier, unique within the registry.
    pub tool_id: String,

    /// Human-readable name.
    pub name: String,

    /// What this tool does.
    pub description: String,

    /// Coarse category used for catalog grouping (e.g. "research").
    #[serde(default = "default_category")]
    pub category: String,

    /// Semantic version of the schema.  Monotonically increases across
    /// upstream updates.
    #[serde(default = "default_version")]
    pub version: String,

    /// Actions exposed by the tool, in declaration order.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,

    /// When this record was last replaced.
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

fn default_category() -> String {
    "general".to_owned()
}

fn default_version() -> String {
    "1.0.0".to_owned()
}

impl ToolSchema {
    /// Create a schema with no actions.
    pub fn new(
        tool_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            name: name.into(),
            description: description.into(),
            category: category.into(),
            version: default_version(),
            actions: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Add an action (builder style).
    #[must_use]
    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// Look up an action spec by name.
    pub fn action(&self, name: &str) -> Option<&ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }

    /// Names of all actions, in declaration order.
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name.as_str()).collect()
    }

    /// Render this tool for inclusion in the LLM-facing catalog.
    ///
    /// At most five actions are listed; required parameters are called out
    /// explicitly so the model can fill them.
    pub fn to_llm_description(&self) -> String {
        let mut lines = vec![format!(
            "- **{}** ({}): {}",
            self.tool_id, self.name, self.description
        )];

        if !self.actions.is_empty() {
            lines.push("  Available actions:".to_owned());
            for action in self.actions.iter().take(5) {
                lines.push(format!("    * {}: {}", action.name, action.description));
                let required = action.required_params();
                if !required.is_empty() {
                    lines.push(format!("      required: {}", required.join(", ")));
                }
            }
        }

        lines.join("\n")
    }

    /// Structural validation per the registry contract: non-empty identity
    /// fields, described actions, described required parameters.
    pub fn validate_structure(&self) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();

        if self.tool_id.trim().is_empty() {
            issues.push(SchemaIssue::MissingField { field: "tool_id" });
        }
        if self.name.trim().is_empty() {
            issues.push(SchemaIssue::MissingField { field: "name" });
        }
        if self.description.trim().is_empty() {
            issues.push(SchemaIssue::MissingField { field: "description" });
        }
        if self.actions.is_empty() {
            issues.push(SchemaIssue::NoActions);
        }

        for action in &self.actions {
            if action.description.trim().is_empty() {
                issues.push(SchemaIssue::UndescribedAction {
                    action: action.name.clone(),
                });
            }
            for param in &action.params {
                if param.required && param.description.trim().is_empty() {
                    issues.push(SchemaIssue::UndescribedRequiredParam {
                        action: action.name.clone(),
                        param: param.name.clone(),
                    });
                }
                if param.required && param.default.is_some() {
                    issues.push(SchemaIssue::RequiredWithDefault {
                        action: action.name.clone(),
                        param: param.name.clone(),
                    });
                }
            }
        }

        issues
    }

    /// Apply the minor auto-fix pass: inject generic descriptions and drop
    /// defaults from required parameters instead of rejecting the schema.
    ///
    /// Returns the fixes applied.  Issues that cannot be fixed (empty
    /// `tool_id`, zero actions) are left for the caller to reject.
    pub fn auto_fix(&mut self) -> Vec<SchemaFix> {
        let mut fixes = Vec::new();

        if self.name.trim().is_empty() {
            self.name = self.tool_id.replace(['-', '_'], " ");
            fixes.push(SchemaFix::InjectedName);
        }
        if self.description.trim().is_empty() {
            self.description = format!("Tool for {} operations", self.tool_id);
            fixes.push(SchemaFix::InjectedDescription);
        }

        for action in &mut self.actions {
            if action.description.trim().is_empty() {
                action.description = format!("Action {}", action.name);
                fixes.push(SchemaFix::InjectedActionDescription {
                    action: action.name.clone(),
                });
            }
            for param in &mut action.params {
                if param.required && param.description.trim().is_empty() {
                    param.description = format!("{} parameter", param.name);
                    fixes.push(SchemaFix::InjectedParamDescription {
                        action: action.name.clone(),
                        param: param.name.clone(),
                    });
                }
                if param.required && param.default.is_some() {
                    param.default = None;
                    fixes.push(SchemaFix::DroppedRequiredDefault {
                        action: action.name.clone(),
                        param: param.name.clone(),
                    });
                }
            }
        }

        fixes
    }
}

/// A structural problem found in a [`ToolSchema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    /// A required identity field is empty.
    MissingField { field: &'static str },
    /// The schema declares no actions at all.
    NoActions,
    /// An action carries no description.
    UndescribedAction { action: String },
    /// A required parameter carries no description.
    UndescribedRequiredParam { action: String, param: String },
    /// A required parameter illegally carries a default.
    RequiredWithDefault { action: String, param: String },
}

/// A fix applied by the auto-fix pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaFix {
    InjectedName,
    InjectedDescription,
    InjectedActionDescription { action: String },
    InjectedParamDescription { action: String, param: String },
    DroppedRequiredDefault { action: String, param: String },
}

// ---------------------------------------------------------------------------
// Built-in catalog
// ---------------------------------------------------------------------------

/// The four well-known tool servers Conductor ships contracts for.
///
/// Used to seed the registry when the tool host has never been reachable, so
/// the reasoning loop is never tool-blind on a cold start.
pub fn builtin_catalog() -> Vec<ToolSchema> {
    use serde_json::json;

    let deepsearch = ToolSchema::new(
        "mcp-deepsearch",
        "Deep search service",
        "Online information research and knowledge synthesis",
        "research",
    )
    .with_action(
        ActionSpec::new("research", "Run a comprehensive research query")
            .with_param(ParamSpec::required(
                "question",
                ParamType::String,
                "The research question",
            ))
            .with_param(ParamSpec::optional(
                "max_results",
                ParamType::Integer,
                "Maximum number of results",
            ))
            .with_example(example_map(json!({"question": "Python asyncio best practices"}))),
    )
    .with_action(
        ActionSpec::new("quick_research", "Run a fast, shallow research query")
            .with_param(ParamSpec::required(
                "question",
                ParamType::String,
                "The research question",
            ))
            .with_param(ParamSpec::optional(
                "max_results",
                ParamType::Integer,
                "Maximum number of results",
            )),
    )
    .with_action(
        ActionSpec::new(
            "comprehensive_research",
            "Run an in-depth, multi-source research query",
        )
        .with_param(ParamSpec::required(
            "question",
            ParamType::String,
            "The research question",
        ))
        .with_param(ParamSpec::optional(
            "depth",
            ParamType::String,
            "Research depth hint",
        )),
    );

    let sandbox = ToolSchema::new(
        "microsandbox",
        "Code sandbox",
        "Executes code inside an isolated sandbox session",
        "execution",
    )
    .with_action(
        ActionSpec::new("microsandbox_execute", "Execute code in the sandbox")
            .with_param(ParamSpec::required(
                "code",
                ParamType::String,
                "The code to execute",
            ))
            .with_param(ParamSpec::optional(
                "session_id",
                ParamType::String,
                "Sandbox session to reuse",
            ))
            .with_param(ParamSpec::optional(
                "timeout",
                ParamType::Integer,
                "Execution timeout in seconds",
            ))
            .with_example(example_map(json!({"code": "print(2 + 3)"}))),
    )
    .with_action(
        ActionSpec::new(
            "microsandbox_install_package",
            "Install a package into the sandbox",
        )
        .with_param(ParamSpec::required(
            "package_name",
            ParamType::String,
            "Name of the package to install",
        ))
        .with_param(ParamSpec::optional(
            "version",
            ParamType::String,
            "Version constraint",
        )),
    )
    .with_action(ActionSpec::new(
        "microsandbox_list_sessions",
        "List active sandbox sessions",
    ))
    .with_action(
        ActionSpec::new("microsandbox_close_session", "Close a sandbox session").with_param(
            ParamSpec::required("session_id", ParamType::String, "Session to close"),
        ),
    );

    let browser = ToolSchema::new(
        "browser_use",
        "Headless browser",
        "Automated web browsing, interaction, and content extraction",
        "web",
    )
    .with_action(
        ActionSpec::new("browser_navigate", "Navigate to a URL")
            .with_param(ParamSpec::required("url", ParamType::String, "Target URL"))
            .with_example(example_map(json!({"url": "https://example.com"}))),
    )
    .with_action(
        ActionSpec::new("browser_use_execute_task", "Run a high-level browser task")
            .with_param(ParamSpec::required(
                "task",
                ParamType::String,
                "Natural-language task description",
            ))
            .with_param(ParamSpec::optional(
                "max_steps",
                ParamType::Integer,
                "Step budget",
            )),
    )
    .with_action(
        ActionSpec::new("browser_search_google", "Run a Google search").with_param(
            ParamSpec::required("query", ParamType::String, "Search query"),
        ),
    )
    .with_action(
        ActionSpec::new("browser_click_element", "Click a page element by index").with_param(
            ParamSpec::required("index", ParamType::Integer, "Element index"),
        ),
    )
    .with_action(
        ActionSpec::new("browser_input_text", "Type text into a page element")
            .with_param(ParamSpec::required(
                "index",
                ParamType::Integer,
                "Input element index",
            ))
            .with_param(ParamSpec::required(
                "text",
                ParamType::String,
                "Text to type",
            )),
    )
    .with_action(
        ActionSpec::new("browser_extract_content", "Extract page content").with_param(
            ParamSpec::optional("selector", ParamType::String, "CSS selector filter"),
        ),
    );

    let search_tool = ToolSchema::new(
        "mcp-search-tool",
        "File search and tool manager",
        "Project file search, code analysis, and tool installation",
        "search",
    )
    .with_action(
        ActionSpec::new("search_file_content", "Search a file with a regex")
            .with_param(ParamSpec::required(
                "file_path",
                ParamType::String,
                "File to search",
            ))
            .with_param(ParamSpec::required(
                "regex_pattern",
                ParamType::String,
                "Pattern to match",
            )),
    )
    .with_action(
        ActionSpec::new("list_code_definitions", "List code definitions")
            .with_param(ParamSpec::optional(
                "file_path",
                ParamType::String,
                "Single file to scan",
            ))
            .with_param(ParamSpec::optional(
                "directory_path",
                ParamType::String,
                "Directory to scan",
            )),
    )
    .with_action(
        ActionSpec::new("analyze_tool_needs", "Analyze what tools a task needs").with_param(
            ParamSpec::required(
                "task_description",
                ParamType::String,
                "The task to analyze",
            ),
        ),
    )
    .with_action(
        ActionSpec::new(
            "search_and_install_tools",
            "Search the tool marketplace and install matches",
        )
        .with_param(ParamSpec::required(
            "task_description",
            ParamType::String,
            "Description of the needed capability",
        ))
        .with_param(ParamSpec::optional(
            "reason",
            ParamType::String,
            "Why current tools are insufficient",
        )),
    );

    vec![deepsearch, sandbox, browser, search_tool]
}

fn example_map(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_lookup_and_required_params() {
        let catalog = builtin_catalog();
        let sandbox = catalog.iter().find(|t| t.tool_id == "microsandbox").unwrap();

        let execute = sandbox.action("microsandbox_execute").unwrap();
        assert_eq!(execute.required_params(), vec!["code"]);
        assert!(execute.param("session_id").is_some());
        assert!(!execute.param("session_id").unwrap().required);

        assert!(sandbox.action("nonexistent").is_none());
    }

    #[test]
    fn builtin_catalog_is_structurally_valid() {
        for schema in builtin_catalog() {
            let issues = schema.validate_structure();
            assert!(issues.is_empty(), "{}: {issues:?}", schema.tool_id);
        }
    }

    #[test]
    fn structural_issues_detected() {
        let mut schema = ToolSchema::new("t", "", "", "general");
        schema.actions.push(ActionSpec::new("a", ""));
        let issues = schema.validate_structure();

        assert!(issues.contains(&SchemaIssue::MissingField { field: "name" }));
        assert!(issues.contains(&SchemaIssue::MissingField { field: "description" }));
        assert!(issues.contains(&SchemaIssue::UndescribedAction {
            action: "a".to_owned()
        }));
    }

    #[test]
    fn auto_fix_injects_defaults() {
        let mut schema = ToolSchema::new("pdf-tool", "", "", "general");
        schema.actions.push(
            ActionSpec::new("convert", "").with_param(ParamSpec::required(
                "path",
                ParamType::String,
                "",
            )),
        );

        let fixes = schema.auto_fix();

        assert!(!schema.name.is_empty());
        assert!(!schema.description.is_empty());
        assert_eq!(schema.action("convert").unwrap().description, "Action convert");
        assert!(fixes.len() >= 3);
        // Fixed schema passes structural validation.
        assert!(schema.validate_structure().is_empty());
    }

    #[test]
    fn required_default_is_dropped() {
        let mut schema = ToolSchema::new("t", "T", "desc", "general").with_action(
            ActionSpec::new("a", "does a").with_param(
                ParamSpec::required("x", ParamType::String, "x param")
                    .with_default(serde_json::json!("boom")),
            ),
        );

        let fixes = schema.auto_fix();
        assert!(fixes.iter().any(|f| matches!(
            f,
            SchemaFix::DroppedRequiredDefault { .. }
        )));
        assert!(schema.action("a").unwrap().param("x").unwrap().default.is_none());
    }

    #[test]
    fn llm_description_mentions_required_params() {
        let catalog = builtin_catalog();
        let deepsearch = catalog.iter().find(|t| t.tool_id == "mcp-deepsearch").unwrap();
        let text = deepsearch.to_llm_description();

        assert!(text.contains("mcp-deepsearch"));
        assert!(text.contains("research"));
        assert!(text.contains("required: question"));
    }
}
