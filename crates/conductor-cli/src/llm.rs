//! OpenAI-compatible LLM client.
//!
//! Implements the runtime's [`LlmClient`] seam against any
//! `/chat/completions`-style endpoint.  Provider choice, keys, and model
//! come from the environment; the runtime itself never sees them.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use conductor_critic::{CriticError, LlmClient, LlmMessage, Role};

/// Environment variables the client reads.
pub const ENV_BASE_URL: &str = "CONDUCTOR_LLM_BASE_URL";
pub const ENV_API_KEY: &str = "CONDUCTOR_LLM_API_KEY";
pub const ENV_MODEL: &str = "CONDUCTOR_LLM_MODEL";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Client for an OpenAI-compatible chat endpoint.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    /// Build the client from the `CONDUCTOR_LLM_*` environment variables.
    ///
    /// Returns `None` when no base URL is configured; the runtime then runs
    /// without an LLM (validation, dispatch, and recovery still work; the
    /// reasoning loop and LLM-backed critic repair do not).
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var(ENV_BASE_URL).ok()?;
        let api_key = std::env::var(ENV_API_KEY).unwrap_or_default();
        let model =
            std::env::var(ENV_MODEL).unwrap_or_else(|_| "gpt-4o-mini".to_owned());

        Some(Self {
            http: reqwest::Client::builder()
                .user_agent("conductor/0.1")
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        deadline: Duration,
    ) -> conductor_critic::Result<String> {
        let wire: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect();

        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self
            .http
            .post(&url)
            .timeout(deadline)
            .json(&ChatRequest {
                model: &self.model,
                messages: wire,
                temperature: 0.0,
            });
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CriticError::Llm(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(CriticError::Llm(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CriticError::Llm(format!("{url}: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CriticError::Llm("response carried no choices".to_owned()))
    }
}
