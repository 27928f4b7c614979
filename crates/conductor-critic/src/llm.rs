//! LLM client seam.
//!
//! The critic (and the reasoning loop above it) talk to the LLM through a
//! single operation: send messages, get text back within a deadline.  The
//! core never assumes a wire format beyond "the text is expected to contain
//! JSON"; extraction and repair happen in the registry's validation layer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CriticError, Result};

/// The role of one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The single operation the core consumes from an LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for the conversation, bounded by `deadline`.
    async fn generate(&self, messages: &[LlmMessage], deadline: Duration) -> Result<String>;
}

/// Scripted LLM client for tests: pops queued responses in order, then
/// fails.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedLlm {
    /// Create a client that will answer with the given responses in order.
    pub fn with_responses(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, _messages: &[LlmMessage], _deadline: Duration) -> Result<String> {
        self.responses
            .lock()
            .expect("scripted llm lock poisoned")
            .pop_front()
            .ok_or_else(|| CriticError::Llm("no scripted responses left".to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_llm_pops_in_order() {
        let llm = ScriptedLlm::with_responses(["first", "second"]);
        let messages = [LlmMessage::user("hi")];

        assert_eq!(llm.generate(&messages, Duration::from_secs(1)).await.unwrap(), "first");
        assert_eq!(llm.generate(&messages, Duration::from_secs(1)).await.unwrap(), "second");
        assert!(llm.generate(&messages, Duration::from_secs(1)).await.is_err());
    }
}
