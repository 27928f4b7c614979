//! Tool-host manifest discovery.
//!
//! Tool servers describe themselves with a local `service.json` descriptor.
//! The registry reads these on demand from a small list of search roots and
//! uses them two ways: as a discovery source for tools the host has not
//! announced, and as a cross-check against fetched schemas during refresh.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryError, Result};
use crate::schema::{ActionSpec, ParamSpec, ParamType, ToolSchema};

// ---------------------------------------------------------------------------
// Descriptor types
// ---------------------------------------------------------------------------

/// One `service.json` descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceManifest {
    /// Identifier of the tool server.
    pub service_id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// What the service does.
    #[serde(default)]
    pub description: Option<String>,

    /// Coarse category.
    #[serde(default)]
    pub category: Option<String>,

    /// Declared capabilities (one per action).
    #[serde(default)]
    pub capabilities: Vec<ServiceCapability>,

    /// Where the descriptor was read from (not serialized).
    #[serde(skip)]
    pub source_path: PathBuf,
}

/// One capability entry in a descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCapability {
    /// Action name.
    pub name: String,

    /// Action description.
    #[serde(default)]
    pub description: String,

    /// Parameter name to `{type, description}` object.
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,

    /// Names of required parameters.
    #[serde(default)]
    pub required_params: Vec<String>,

    /// Example invocations.
    #[serde(default)]
    pub examples: Vec<serde_json::Map<String, Value>>,
}

/// A mismatch between a fetched schema and the local descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// The descriptor declares an action the schema lacks.
    MissingAction { action: String },
    /// The schema carries an action the descriptor does not declare.
    ExtraAction { action: String },
    /// A required parameter from the descriptor is absent in the schema.
    MissingRequiredParam { action: String, param: String },
    /// The schema marks a parameter optional that the descriptor requires.
    RequirementMismatch { action: String, param: String },
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Walk the search roots and collect every parseable `service.json`.
///
/// Unreadable or malformed descriptors are logged and skipped; missing roots
/// are silently ignored.
pub fn discover_manifests(roots: &[PathBuf]) -> Vec<ServiceManifest> {
    let mut manifests = Vec::new();

    for root in roots {
        if !root.exists() {
            continue;
        }
        collect_from(root, &mut manifests, 0);
    }

    tracing::debug!(count = manifests.len(), "tool-host manifests discovered");
    manifests
}

fn collect_from(dir: &Path, out: &mut Vec<ServiceManifest>, depth: usize) {
    // Descriptors live at most a few levels deep; cap the walk.
    if depth > 4 {
        return;
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_from(&path, out, depth + 1);
        } else if path.file_name().is_some_and(|n| n == "service.json") {
            match load_manifest(&path) {
                Ok(manifest) => out.push(manifest),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable manifest");
                }
            }
        }
    }
}

/// Read and parse one descriptor file.
pub fn load_manifest(path: &Path) -> Result<ServiceManifest> {
    let text = std::fs::read_to_string(path).map_err(|e| RegistryError::Manifest {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut manifest: ServiceManifest =
        serde_json::from_str(&text).map_err(|e| RegistryError::Manifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    manifest.source_path = path.to_owned();
    Ok(manifest)
}

/// Whether a descriptor's service id refers to the given tool id.
///
/// Accepts exact matches plus the loose forms tool hosts emit
/// (`mcp-` prefixes, `-mcp-server` suffixes, separator drift).
pub fn matches_tool_id(service_id: &str, tool_id: &str) -> bool {
    if service_id.is_empty() || tool_id.is_empty() {
        return false;
    }
    if service_id == tool_id {
        return true;
    }

    let strip = |s: &str| {
        s.to_lowercase()
            .replace("mcp", "")
            .replace("server", "")
            .replace(['-', '_'], "")
    };

    let a = strip(service_id);
    let b = strip(tool_id);
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

// ---------------------------------------------------------------------------
// Conversion & consistency
// ---------------------------------------------------------------------------

/// Build a [`ToolSchema`] from a descriptor.
pub fn manifest_to_schema(manifest: &ServiceManifest) -> ToolSchema {
    let mut schema = ToolSchema::new(
        &manifest.service_id,
        manifest
            .name
            .clone()
            .unwrap_or_else(|| manifest.service_id.replace(['-', '_'], " ")),
        manifest
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool for {} operations", manifest.service_id)),
        manifest.category.clone().unwrap_or_else(|| "general".to_owned()),
    );

    for cap in &manifest.capabilities {
        schema.actions.push(capability_to_action(cap));
    }

    schema
}

fn capability_to_action(cap: &ServiceCapability) -> ActionSpec {
    let mut action = ActionSpec::new(&cap.name, &cap.description);

    for (param_name, param_def) in &cap.parameters {
        let description = param_def
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or(param_name)
            .to_owned();
        let param_type = param_def
            .get("type")
            .and_then(Value::as_str)
            .map(parse_param_type)
            .unwrap_or(ParamType::String);
        let required = cap.required_params.iter().any(|r| r == param_name);

        action.params.push(ParamSpec {
            name: param_name.clone(),
            param_type,
            required,
            description,
            default: param_def.get("default").cloned(),
        });
    }

    if let Some(example) = cap.examples.first() {
        action.example = Some(example.clone());
    }

    action
}

fn parse_param_type(raw: &str) -> ParamType {
    match raw.to_lowercase().as_str() {
        "integer" | "int" => ParamType::Integer,
        "number" | "float" | "double" => ParamType::Number,
        "boolean" | "bool" => ParamType::Boolean,
        "array" | "list" => ParamType::List,
        "object" | "map" | "dict" => ParamType::Map,
        _ => ParamType::String,
    }
}

/// Compare a fetched schema against its local descriptor.
pub fn check_consistency(schema: &ToolSchema, manifest: &ServiceManifest) -> Vec<ConsistencyIssue> {
    let mut issues = Vec::new();

    for cap in &manifest.capabilities {
        match schema.action(&cap.name) {
            None => issues.push(ConsistencyIssue::MissingAction {
                action: cap.name.clone(),
            }),
            Some(action) => {
                for required in &cap.required_params {
                    match action.param(required) {
                        None => issues.push(ConsistencyIssue::MissingRequiredParam {
                            action: cap.name.clone(),
                            param: required.clone(),
                        }),
                        Some(param) if !param.required => {
                            issues.push(ConsistencyIssue::RequirementMismatch {
                                action: cap.name.clone(),
                                param: required.clone(),
                            });
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }

    for action in &schema.actions {
        if !manifest.capabilities.iter().any(|c| c.name == action.name) {
            issues.push(ConsistencyIssue::ExtraAction {
                action: action.name.clone(),
            });
        }
    }

    issues
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
        "service_id": "mcp-deepsearch",
        "name": "Deep search",
        "description": "Research service",
        "capabilities": [
            {
                "name": "research",
                "description": "Run research",
                "parameters": {
                    "question": {"type": "string", "description": "The question"},
                    "max_results": {"type": "integer", "description": "Cap"}
                },
                "required_params": ["question"],
                "examples": [{"question": "what is rust"}]
            }
        ]
    }"#;

    #[test]
    fn manifest_parses_and_converts() {
        let manifest: ServiceManifest = serde_json::from_str(SAMPLE).unwrap();
        let schema = manifest_to_schema(&manifest);

        assert_eq!(schema.tool_id, "mcp-deepsearch");
        let research = schema.action("research").unwrap();
        assert_eq!(research.required_params(), vec!["question"]);
        assert_eq!(
            research.param("max_results").unwrap().param_type,
            ParamType::Integer
        );
        assert_eq!(
            research.example_value("question"),
            Some(&json!("what is rust"))
        );
    }

    #[test]
    fn discovery_walks_nested_roots() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("servers/deepsearch");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("service.json"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("not-a-manifest.json"), "{}").unwrap();

        let manifests = discover_manifests(&[dir.path().to_owned()]);
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].service_id, "mcp-deepsearch");
    }

    #[test]
    fn malformed_manifests_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("service.json"), "not json").unwrap();
        let manifests = discover_manifests(&[dir.path().to_owned()]);
        assert!(manifests.is_empty());
    }

    #[test]
    fn fuzzy_service_id_matching() {
        assert!(matches_tool_id("mcp-deepsearch", "mcp-deepsearch"));
        assert!(matches_tool_id("deepsearch", "mcp-deepsearch"));
        assert!(matches_tool_id("microsandbox-mcp-server", "microsandbox"));
        assert!(!matches_tool_id("browser-use", "microsandbox"));
        assert!(!matches_tool_id("", "microsandbox"));
    }

    #[test]
    fn consistency_check_finds_drift() {
        let manifest: ServiceManifest = serde_json::from_str(SAMPLE).unwrap();

        // Schema missing the declared action, plus an undeclared extra.
        let schema = ToolSchema::new("mcp-deepsearch", "Deep search", "Research", "research")
            .with_action(ActionSpec::new("quick_research", "Fast research"));

        let issues = check_consistency(&schema, &manifest);
        assert!(issues.contains(&ConsistencyIssue::MissingAction {
            action: "research".to_owned()
        }));
        assert!(issues.contains(&ConsistencyIssue::ExtraAction {
            action: "quick_research".to_owned()
        }));
    }

    #[test]
    fn consistency_check_passes_for_converted_schema() {
        let manifest: ServiceManifest = serde_json::from_str(SAMPLE).unwrap();
        let schema = manifest_to_schema(&manifest);
        assert!(check_consistency(&schema, &manifest).is_empty());
    }
}
