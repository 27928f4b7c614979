//! Alias and mapping layer.
//!
//! Insulates execution from LLM stylistic drift: tool ids, action names, and
//! parameter names the model emits are normalized to canonical form before
//! validation.  The tables are loaded from a TOML configuration file on
//! startup and hot-reloadable; a missing file falls back to built-in defaults
//! covering the well-known tool servers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::call::{Correction, ToolCall};
use crate::error::{RegistryError, Result};

// ---------------------------------------------------------------------------
// Configuration schema
// ---------------------------------------------------------------------------

/// Root of the alias/mapping configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasConfig {
    /// The set of canonical tool ids.  Ids in this list are never remapped.
    #[serde(default)]
    pub canonical_tool_ids: Vec<String>,

    /// Alias string to canonical tool id.
    #[serde(default)]
    pub tool_id_aliases: HashMap<String, String>,

    /// Per canonical tool id: action aliases and deprecations.
    #[serde(default)]
    pub action_mappings: HashMap<String, ActionMapping>,

    /// Parameter aliases, common and tool-specific.
    #[serde(default)]
    pub parameter_mappings: ParameterMappings,

    /// Cross-field validation rules consumed by the validator.
    #[serde(default)]
    pub validation_rules: ValidationRules,

    /// Error-message patterns to correction hints, consumed by the critic.
    #[serde(default)]
    pub error_corrections: ErrorCorrections,
}

/// Action-level mappings for one tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionMapping {
    /// Actions considered canonical for this tool.
    #[serde(default)]
    pub canonical_actions: Vec<String>,

    /// Alias action name to canonical action name.
    #[serde(default)]
    pub action_aliases: HashMap<String, String>,

    /// Deprecated actions and their replacements.
    #[serde(default)]
    pub deprecated_combinations: Vec<DeprecatedAction>,
}

/// A deprecated action and what to call instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecatedAction {
    pub action: String,
    pub replacement: String,
}

/// Parameter alias tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterMappings {
    /// Aliases applied for every tool.
    #[serde(default)]
    pub common_aliases: HashMap<String, String>,

    /// Per canonical tool id: alias parameter name to canonical name.
    /// Tool-specific entries win over common ones.
    #[serde(default)]
    pub tool_specific: HashMap<String, HashMap<String, String>>,
}

/// Validation rules that augment the schema contracts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Required-parameter overrides for specific (tool, action) pairs.
    #[serde(default)]
    pub required_combinations: Vec<RequiredCombination>,

    /// (tool, action) pairs that are deprecated outright.
    #[serde(default)]
    pub deprecated_combinations: Vec<DeprecatedCombination>,
}

/// Required parameters for a (tool, action) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredCombination {
    pub tool_id: String,
    pub action: String,
    #[serde(default)]
    pub required_params: Vec<String>,
}

/// A deprecated (tool, action) pair with its replacement action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecatedCombination {
    pub tool_id: String,
    pub action: String,
    pub replacement: String,
}

/// Error-message patterns mapped to correction hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorCorrections {
    /// Substring pattern to hint, for action-shaped errors.
    #[serde(default)]
    pub action_errors: HashMap<String, String>,

    /// Substring pattern to hint, for parameter-shaped errors.
    #[serde(default)]
    pub parameter_errors: HashMap<String, String>,
}

/// The class of a matched error-correction hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionClass {
    Action,
    Parameter,
}

// ---------------------------------------------------------------------------
// Built-in defaults
// ---------------------------------------------------------------------------

/// Defaults covering the four well-known tool servers, used when no
/// configuration file is present.
pub fn builtin_defaults() -> AliasConfig {
    let mut config = AliasConfig::default();

    config.canonical_tool_ids = vec![
        "mcp-deepsearch".to_owned(),
        "microsandbox".to_owned(),
        "browser_use".to_owned(),
        "mcp-search-tool".to_owned(),
    ];

    for (alias, canonical) in [
        ("deepsearch", "mcp-deepsearch"),
        ("deep-search", "mcp-deepsearch"),
        ("microsandbox-mcp-server", "microsandbox"),
        ("sandbox", "microsandbox"),
        ("browser-use-mcp-server", "browser_use"),
        ("browser", "browser_use"),
        ("search-tool", "mcp-search-tool"),
    ] {
        config
            .tool_id_aliases
            .insert(alias.to_owned(), canonical.to_owned());
    }

    let mut deepsearch = ActionMapping {
        canonical_actions: vec![
            "research".to_owned(),
            "quick_research".to_owned(),
            "comprehensive_research".to_owned(),
        ],
        ..ActionMapping::default()
    };
    deepsearch
        .action_aliases
        .insert("search".to_owned(), "research".to_owned());
    deepsearch.deprecated_combinations.push(DeprecatedAction {
        action: "deep_search".to_owned(),
        replacement: "research".to_owned(),
    });
    config
        .action_mappings
        .insert("mcp-deepsearch".to_owned(), deepsearch);

    let mut browser = ActionMapping {
        canonical_actions: vec![
            "browser_navigate".to_owned(),
            "browser_use_execute_task".to_owned(),
            "browser_search_google".to_owned(),
            "browser_click_element".to_owned(),
            "browser_input_text".to_owned(),
            "browser_extract_content".to_owned(),
        ],
        ..ActionMapping::default()
    };
    browser
        .action_aliases
        .insert("navigate_to_url".to_owned(), "browser_navigate".to_owned());
    browser
        .action_aliases
        .insert("navigate".to_owned(), "browser_navigate".to_owned());
    config
        .action_mappings
        .insert("browser_use".to_owned(), browser);

    let mut sandbox = ActionMapping {
        canonical_actions: vec![
            "microsandbox_execute".to_owned(),
            "microsandbox_install_package".to_owned(),
            "microsandbox_list_sessions".to_owned(),
            "microsandbox_close_session".to_owned(),
        ],
        ..ActionMapping::default()
    };
    sandbox
        .action_aliases
        .insert("execute".to_owned(), "microsandbox_execute".to_owned());
    sandbox.action_aliases.insert(
        "install_package".to_owned(),
        "microsandbox_install_package".to_owned(),
    );
    config
        .action_mappings
        .insert("microsandbox".to_owned(), sandbox);

    config
        .parameter_mappings
        .common_aliases
        .insert("task_desc".to_owned(), "task_description".to_owned());
    config.parameter_mappings.tool_specific.insert(
        "mcp-deepsearch".to_owned(),
        HashMap::from([
            ("query".to_owned(), "question".to_owned()),
            ("q".to_owned(), "question".to_owned()),
        ]),
    );
    config.parameter_mappings.tool_specific.insert(
        "browser_use".to_owned(),
        HashMap::from([("link".to_owned(), "url".to_owned())]),
    );
    config.parameter_mappings.tool_specific.insert(
        "microsandbox".to_owned(),
        HashMap::from([("script".to_owned(), "code".to_owned())]),
    );

    config
        .validation_rules
        .required_combinations
        .push(RequiredCombination {
            tool_id: "browser_use".to_owned(),
            action: "browser_input_text".to_owned(),
            required_params: vec!["index".to_owned(), "text".to_owned()],
        });

    config.error_corrections.action_errors.insert(
        "unsupported action".to_owned(),
        "use an action from the tool's whitelist".to_owned(),
    );
    config.error_corrections.parameter_errors.insert(
        "missing required".to_owned(),
        "fill required parameters from the task description".to_owned(),
    );

    config
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

/// The live alias mapper.
///
/// Read-mostly: `normalize` takes a short read lock; `reload` swaps the whole
/// table set under the write lock.  No lock is held across await points.
pub struct AliasMapper {
    tables: RwLock<AliasConfig>,
    path: Option<PathBuf>,
}

impl AliasMapper {
    /// Build a mapper from an explicit configuration.
    pub fn from_config(config: AliasConfig) -> Self {
        Self {
            tables: RwLock::new(config),
            path: None,
        }
    }

    /// Load the mapper from a TOML file.
    ///
    /// A missing file yields the built-in defaults; a present-but-invalid
    /// file is an error (silently ignoring a broken config would let drift
    /// through unmapped).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = match std::fs::read_to_string(path) {
            Ok(text) => parse_config(&text, path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "alias config missing, using built-in defaults");
                builtin_defaults()
            }
            Err(e) => {
                return Err(RegistryError::AliasConfig {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        tracing::info!(
            path = %path.display(),
            tool_aliases = config.tool_id_aliases.len(),
            "alias config loaded"
        );

        Ok(Self {
            tables: RwLock::new(config),
            path: Some(path.to_owned()),
        })
    }

    /// Re-read the configuration file and swap the tables.
    ///
    /// Returns `Ok(false)` if the mapper was not loaded from a file.
    pub fn reload(&self) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let text = std::fs::read_to_string(path).map_err(|e| RegistryError::AliasConfig {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = parse_config(&text, path)?;

        *self.tables.write().expect("alias lock poisoned") = config;
        tracing::info!(path = %path.display(), "alias config reloaded");
        Ok(true)
    }

    /// Map a tool id to its canonical form.
    pub fn canonical_tool_id(&self, tool_id: &str) -> String {
        let tables = self.tables.read().expect("alias lock poisoned");
        if tables.canonical_tool_ids.iter().any(|c| c == tool_id) {
            return tool_id.to_owned();
        }
        tables
            .tool_id_aliases
            .get(tool_id)
            .cloned()
            .unwrap_or_else(|| tool_id.to_owned())
    }

    /// Map an action name to its canonical form for the given canonical tool.
    pub fn canonical_action(&self, canonical_tool_id: &str, action: &str) -> String {
        let tables = self.tables.read().expect("alias lock poisoned");
        let Some(mapping) = tables.action_mappings.get(canonical_tool_id) else {
            return action.to_owned();
        };
        if mapping.canonical_actions.iter().any(|a| a == action) {
            return action.to_owned();
        }
        mapping
            .action_aliases
            .get(action)
            .cloned()
            .unwrap_or_else(|| action.to_owned())
    }

    /// The replacement for a deprecated (tool, action) pair, if any.
    pub fn deprecated_replacement(&self, canonical_tool_id: &str, action: &str) -> Option<String> {
        let tables = self.tables.read().expect("alias lock poisoned");

        if let Some(mapping) = tables.action_mappings.get(canonical_tool_id) {
            if let Some(dep) = mapping
                .deprecated_combinations
                .iter()
                .find(|d| d.action == action)
            {
                return Some(dep.replacement.clone());
            }
        }

        tables
            .validation_rules
            .deprecated_combinations
            .iter()
            .find(|d| d.tool_id == canonical_tool_id && d.action == action)
            .map(|d| d.replacement.clone())
    }

    /// Required-parameter override for a (tool, action) pair, if configured.
    pub fn required_params_override(
        &self,
        canonical_tool_id: &str,
        action: &str,
    ) -> Option<Vec<String>> {
        let tables = self.tables.read().expect("alias lock poisoned");
        tables
            .validation_rules
            .required_combinations
            .iter()
            .find(|c| c.tool_id == canonical_tool_id && c.action == action)
            .map(|c| c.required_params.clone())
    }

    /// Look up a correction hint matching an error message.
    pub fn error_correction(&self, message: &str) -> Option<(CorrectionClass, String)> {
        let tables = self.tables.read().expect("alias lock poisoned");
        for (pattern, hint) in &tables.error_corrections.action_errors {
            if message.contains(pattern.as_str()) {
                return Some((CorrectionClass::Action, hint.clone()));
            }
        }
        for (pattern, hint) in &tables.error_corrections.parameter_errors {
            if message.contains(pattern.as_str()) {
                return Some((CorrectionClass::Parameter, hint.clone()));
            }
        }
        None
    }

    /// Apply all three substitution tables to a call.
    ///
    /// Returns the normalized call plus the substitutions that fired.  If a
    /// parameter alias collides with an already-present canonical name, the
    /// existing canonical value wins and the alias entry is dropped.
    pub fn normalize(&self, call: &ToolCall) -> (ToolCall, Vec<Correction>) {
        let mut corrections = Vec::new();
        let mut normalized = call.clone();

        // Tool id.
        let canonical_tool = self.canonical_tool_id(&call.tool_id);
        if canonical_tool != call.tool_id {
            corrections.push(Correction::ToolIdAlias {
                from: call.tool_id.clone(),
                to: canonical_tool.clone(),
            });
            normalized.tool_id = canonical_tool.clone();
        }

        // Action alias, then deprecated remap.
        let canonical_action = self.canonical_action(&canonical_tool, &call.action);
        if canonical_action != call.action {
            corrections.push(Correction::ActionAlias {
                from: call.action.clone(),
                to: canonical_action.clone(),
            });
            normalized.action = canonical_action.clone();
        }
        if let Some(replacement) = self.deprecated_replacement(&canonical_tool, &normalized.action)
        {
            corrections.push(Correction::DeprecatedAction {
                from: normalized.action.clone(),
                to: replacement.clone(),
            });
            normalized.action = replacement;
        }

        // Parameters: tool-specific aliases win over common ones.
        let tables = self.tables.read().expect("alias lock poisoned");
        let tool_specific = tables.parameter_mappings.tool_specific.get(&canonical_tool);

        let mut remapped = serde_json::Map::new();
        for (name, value) in &call.parameters {
            let canonical_param = tool_specific
                .and_then(|t| t.get(name))
                .or_else(|| tables.parameter_mappings.common_aliases.get(name))
                .cloned()
                .unwrap_or_else(|| name.clone());

            if canonical_param != *name {
                if call.parameters.contains_key(&canonical_param) {
                    // Canonical value already present: drop the alias entry.
                    tracing::debug!(
                        alias = %name,
                        canonical = %canonical_param,
                        "parameter alias collides with canonical, dropping alias"
                    );
                    continue;
                }
                corrections.push(Correction::ParameterAlias {
                    from: name.clone(),
                    to: canonical_param.clone(),
                });
            }
            remapped.insert(canonical_param, value.clone());
        }
        normalized.parameters = remapped;

        if !corrections.is_empty() {
            tracing::debug!(
                call_id = normalized.call_id,
                count = corrections.len(),
                "alias substitutions applied"
            );
        }

        (normalized, corrections)
    }
}

fn parse_config(text: &str, path: &Path) -> Result<AliasConfig> {
    toml::from_str(text).map_err(|e| RegistryError::AliasConfig {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn call(tool_id: &str, action: &str, params: serde_json::Value) -> ToolCall {
        ToolCall {
            call_id: 1,
            task_id: Uuid::now_v7(),
            tool_id: tool_id.to_owned(),
            action: action.to_owned(),
            parameters: params.as_object().cloned().unwrap_or_default(),
            thinking: String::new(),
        }
    }

    #[test]
    fn tool_and_parameter_aliases_fire() {
        let mapper = AliasMapper::from_config(builtin_defaults());
        let input = call("deepsearch", "search", json!({"query": "python asyncio tutorial"}));

        let (normalized, corrections) = mapper.normalize(&input);

        assert_eq!(normalized.tool_id, "mcp-deepsearch");
        assert_eq!(normalized.action, "research");
        assert!(normalized.parameters.contains_key("question"));
        assert!(!normalized.parameters.contains_key("query"));

        let tags: Vec<_> = corrections.iter().map(Correction::tag).collect();
        assert!(tags.contains(&"tool_id_alias"));
        assert!(tags.contains(&"action_alias"));
        assert!(tags.contains(&"parameter_alias"));
    }

    #[test]
    fn canonical_input_passes_through_untouched() {
        let mapper = AliasMapper::from_config(builtin_defaults());
        let input = call("mcp-deepsearch", "research", json!({"question": "x"}));

        let (normalized, corrections) = mapper.normalize(&input);

        assert_eq!(normalized.tool_id, "mcp-deepsearch");
        assert_eq!(normalized.action, "research");
        assert!(corrections.is_empty());
    }

    #[test]
    fn normalize_is_idempotent() {
        let mapper = AliasMapper::from_config(builtin_defaults());
        let input = call("sandbox", "execute", json!({"script": "print(1)"}));

        let (once, _) = mapper.normalize(&input);
        let (twice, corrections) = mapper.normalize(&once);

        assert_eq!(once.tool_id, twice.tool_id);
        assert_eq!(once.action, twice.action);
        assert_eq!(once.parameters, twice.parameters);
        assert!(corrections.is_empty());
    }

    #[test]
    fn alias_colliding_with_canonical_is_dropped() {
        let mapper = AliasMapper::from_config(builtin_defaults());
        let input = call(
            "mcp-deepsearch",
            "research",
            json!({"question": "the real one", "query": "the alias"}),
        );

        let (normalized, _) = mapper.normalize(&input);

        assert_eq!(
            normalized.parameters.get("question").and_then(|v| v.as_str()),
            Some("the real one")
        );
        assert!(!normalized.parameters.contains_key("query"));
    }

    #[test]
    fn deprecated_action_is_remapped() {
        let mapper = AliasMapper::from_config(builtin_defaults());
        let input = call("mcp-deepsearch", "deep_search", json!({"question": "x"}));

        let (normalized, corrections) = mapper.normalize(&input);

        assert_eq!(normalized.action, "research");
        assert!(corrections.iter().any(|c| c.tag() == "deprecated_action"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let mapper = AliasMapper::load("/definitely/not/a/real/path.toml").unwrap();
        assert_eq!(mapper.canonical_tool_id("deepsearch"), "mcp-deepsearch");
    }

    #[test]
    fn config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.toml");
        std::fs::write(
            &path,
            r#"
canonical_tool_ids = ["my-tool"]

[tool_id_aliases]
mytool = "my-tool"

[action_mappings."my-tool"]
canonical_actions = ["run"]

[action_mappings."my-tool".action_aliases]
go = "run"

[parameter_mappings.tool_specific."my-tool"]
input = "payload"
"#,
        )
        .unwrap();

        let mapper = AliasMapper::load(&path).unwrap();
        assert_eq!(mapper.canonical_tool_id("mytool"), "my-tool");
        assert_eq!(mapper.canonical_action("my-tool", "go"), "run");

        let input = call("mytool", "go", json!({"input": "data"}));
        let (normalized, _) = mapper.normalize(&input);
        assert!(normalized.parameters.contains_key("payload"));
    }

    #[test]
    fn invalid_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "this is [ not toml").unwrap();
        assert!(AliasMapper::load(&path).is_err());
    }

    #[test]
    fn error_correction_lookup() {
        let mapper = AliasMapper::from_config(builtin_defaults());
        let hit = mapper.error_correction("tool reported: unsupported action `foo`");
        assert!(matches!(hit, Some((CorrectionClass::Action, _))));
        assert!(mapper.error_correction("all good").is_none());
    }
}
