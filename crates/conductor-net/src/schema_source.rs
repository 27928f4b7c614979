//! HTTP schema source for the registry.
//!
//! The tool host exposes version fingerprints at `/tools/versions` and full
//! schemas at `/tools/{tool_id}/schema`.  The registry diffs fingerprints to
//! decide which schemas to re-fetch, so a quiet host costs one small GET per
//! refresh interval.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use conductor_registry::{RegistryError, SchemaSource, ToolSchema};

/// Wire shape of the version listing.
#[derive(Debug, Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    versions: HashMap<String, String>,
}

/// Schema source backed by the tool host's HTTP API.
pub struct HttpSchemaSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSchemaSource {
    /// Create a source for the given tool host base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent("conductor/0.1")
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl SchemaSource for HttpSchemaSource {
    async fn fetch_versions(&self) -> conductor_registry::Result<HashMap<String, String>> {
        let url = format!("{}/tools/versions", self.base_url);

        let response = self.http.get(&url).send().await.map_err(|e| {
            RegistryError::SourceUnavailable {
                reason: format!("{url}: {e}"),
            }
        })?;

        if !response.status().is_success() {
            return Err(RegistryError::SourceUnavailable {
                reason: format!("{url}: HTTP {}", response.status()),
            });
        }

        let parsed: VersionsResponse =
            response
                .json()
                .await
                .map_err(|e| RegistryError::SourceUnavailable {
                    reason: format!("{url}: {e}"),
                })?;

        Ok(parsed.versions)
    }

    async fn fetch_schema(&self, tool_id: &str) -> conductor_registry::Result<Option<ToolSchema>> {
        let url = format!("{}/tools/{tool_id}/schema", self.base_url);

        let response = self.http.get(&url).send().await.map_err(|e| {
            RegistryError::SourceUnavailable {
                reason: format!("{url}: {e}"),
            }
        })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // The tool is gone; the registry drops it from the snapshot.
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RegistryError::SourceUnavailable {
                reason: format!("{url}: HTTP {}", response.status()),
            });
        }

        let schema: ToolSchema =
            response
                .json()
                .await
                .map_err(|e| RegistryError::InvalidSchema {
                    tool_id: tool_id.to_owned(),
                    reason: e.to_string(),
                })?;

        Ok(Some(schema))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_wire_shape() {
        let parsed: VersionsResponse = serde_json::from_str(
            r#"{"versions": {"mcp-deepsearch": "a1b2c3d4", "microsandbox": "e5f6a7b8"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.versions.len(), 2);
        assert_eq!(
            parsed.versions.get("mcp-deepsearch").map(String::as_str),
            Some("a1b2c3d4")
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let source = HttpSchemaSource::new("http://localhost:8100/");
        assert_eq!(source.base_url, "http://localhost:8100");
    }

    #[tokio::test]
    async fn unreachable_host_is_source_unavailable() {
        // Reserved port 0 never accepts connections.
        let source = HttpSchemaSource::new("http://127.0.0.1:0");
        let result = source.fetch_versions().await;
        assert!(matches!(
            result,
            Err(RegistryError::SourceUnavailable { .. })
        ));
    }
}
