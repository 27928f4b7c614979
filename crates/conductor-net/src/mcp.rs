//! HTTP client for MCP tool servers.
//!
//! Each tool server exposes a call endpoint taking
//! `{action, parameters}` and answering `{success, payload?, error?}`.
//! The payload is opaque to the core; errors surface as strings through the
//! [`ToolCaller`] seam so the dispatch layer stays transport-agnostic.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use conductor_dispatch::ToolCaller;

use crate::error::{NetError, Result};

/// Wire shape of a tool server's call response.
#[derive(Debug, Deserialize)]
struct CallResponse {
    success: bool,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP transport to a fleet of MCP tool servers.
pub struct HttpMcpClient {
    http: reqwest::Client,
    /// Tool id to base URL (e.g. `http://localhost:8101`).
    endpoints: RwLock<HashMap<String, String>>,
}

impl HttpMcpClient {
    /// Create a client with no endpoints registered.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .user_agent("conductor/0.1")
                .build()
                .unwrap_or_default(),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Create a client with the given endpoint table.
    pub fn with_endpoints(endpoints: HashMap<String, String>) -> Self {
        let client = Self::new();
        *client.endpoints.write().expect("endpoint lock poisoned") = endpoints;
        client
    }

    /// Register or replace the endpoint for a tool.
    pub fn set_endpoint(&self, tool_id: impl Into<String>, base_url: impl Into<String>) {
        self.endpoints
            .write()
            .expect("endpoint lock poisoned")
            .insert(tool_id.into(), base_url.into());
    }

    /// Drop a tool's endpoint (on uninstall events).
    pub fn remove_endpoint(&self, tool_id: &str) {
        self.endpoints
            .write()
            .expect("endpoint lock poisoned")
            .remove(tool_id);
    }

    /// The base URL registered for a tool.
    pub fn endpoint(&self, tool_id: &str) -> Option<String> {
        self.endpoints
            .read()
            .expect("endpoint lock poisoned")
            .get(tool_id)
            .cloned()
    }

    async fn post_call(
        &self,
        tool_id: &str,
        action: &str,
        parameters: &serde_json::Map<String, Value>,
        deadline: Duration,
    ) -> Result<Value> {
        let base = self
            .endpoint(tool_id)
            .ok_or_else(|| NetError::UnknownEndpoint {
                tool_id: tool_id.to_owned(),
            })?;
        let url = format!("{}/call", base.trim_end_matches('/'));

        let body = serde_json::json!({
            "action": action,
            "parameters": parameters,
        });

        let response = self
            .http
            .post(&url)
            .timeout(deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| NetError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(NetError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let parsed: CallResponse = response.json().await.map_err(|e| NetError::Decode {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        if parsed.success {
            Ok(parsed.payload.unwrap_or(Value::Null))
        } else {
            Err(NetError::Http {
                url,
                reason: parsed
                    .error
                    .unwrap_or_else(|| "tool reported failure without a cause".to_owned()),
            })
        }
    }
}

impl Default for HttpMcpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolCaller for HttpMcpClient {
    async fn call(
        &self,
        tool_id: &str,
        action: &str,
        parameters: &serde_json::Map<String, Value>,
        deadline: Duration,
    ) -> std::result::Result<Value, String> {
        tracing::debug!(tool_id = %tool_id, action = %action, "mcp call");
        self.post_call(tool_id, action, parameters, deadline)
            .await
            .map_err(|e| e.to_string())
    }

    /// Reconnect by hitting the tool's health endpoint; HTTP is
    /// connectionless, so reachability is the whole check.
    async fn reconnect(&self, tool_id: &str) -> std::result::Result<(), String> {
        let base = self
            .endpoint(tool_id)
            .ok_or_else(|| format!("no endpoint registered for tool: {tool_id}"))?;
        let url = format!("{}/health", base.trim_end_matches('/'));

        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if response.status().is_success() {
            tracing::info!(tool_id = %tool_id, "tool reconnect check passed");
            Ok(())
        } else {
            Err(format!("health check returned HTTP {}", response.status()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_table_management() {
        let client = HttpMcpClient::new();
        assert!(client.endpoint("mcp-deepsearch").is_none());

        client.set_endpoint("mcp-deepsearch", "http://localhost:8101");
        assert_eq!(
            client.endpoint("mcp-deepsearch").as_deref(),
            Some("http://localhost:8101")
        );

        client.remove_endpoint("mcp-deepsearch");
        assert!(client.endpoint("mcp-deepsearch").is_none());
    }

    #[tokio::test]
    async fn unknown_endpoint_fails_fast() {
        let client = HttpMcpClient::new();
        let result = client
            .call(
                "missing-tool",
                "run",
                &serde_json::Map::new(),
                Duration::from_secs(1),
            )
            .await;

        let error = result.unwrap_err();
        assert!(error.contains("no endpoint registered"));
    }

    #[test]
    fn call_response_wire_shapes() {
        let ok: CallResponse =
            serde_json::from_str(r#"{"success": true, "payload": {"answer": 42}}"#).unwrap();
        assert!(ok.success);
        assert!(ok.payload.is_some());

        let failed: CallResponse =
            serde_json::from_str(r#"{"success": false, "error": "session expired"}"#).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("session expired"));

        // Minimal frame: absent fields default.
        let minimal: CallResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(minimal.payload.is_none());
    }
}
