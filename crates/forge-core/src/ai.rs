//! `LLMClient` capability — the LLM backend is treated as an external
//! collaborator and only its contract matters here. One concrete
//! non-streaming implementation is provided: single system/user turn, JSON
//! body, text extracted from the first text content block, a single wire
//! format rather than multi-provider format routing.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{OrchestrationError, Result};

/// A capability the planner calls for plan refinement, and the
/// orchestrator calls for chat-path answers. Side-effect free from the
/// caller's perspective beyond the network request itself.
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_message: &str, max_tokens: usize) -> Result<String>;
}

pub struct HttpLLMClient {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpLLMClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }
}

fn collect_text(blocks: &[Value]) -> String {
    let mut text = String::new();
    for block in blocks {
        if block.get("type").and_then(|t| t.as_str()) != Some("text") {
            continue;
        }
        if let Some(chunk) = block.get("text").and_then(|t| t.as_str()) {
            text.push_str(chunk);
        }
    }
    text
}

#[async_trait]
impl LLMClient for HttpLLMClient {
    async fn complete(&self, system_prompt: &str, user_message: &str, max_tokens: usize) -> Result<String> {
        let body = serde_json::json!({
            "max_tokens": max_tokens,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_message}],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestrationError::Internal(format!("llm request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(OrchestrationError::Internal(format!(
                "llm endpoint returned {}",
                response.status()
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| OrchestrationError::Internal(format!("llm response not json: {e}")))?;

        let text = json
            .get("content")
            .and_then(|c| c.as_array())
            .map(|arr| collect_text(arr))
            .unwrap_or_default();

        Ok(text.trim().to_string())
    }
}

/// Deterministic stand-in used by tests and by deployments with no
/// `LLM_ENDPOINT` configured — always reports malformed output so callers
/// exercise their deterministic fallback path.
pub struct NullLLMClient;

#[async_trait]
impl LLMClient for NullLLMClient {
    async fn complete(&self, _system_prompt: &str, _user_message: &str, _max_tokens: usize) -> Result<String> {
        Err(OrchestrationError::Internal("no LLM endpoint configured".to_string()))
    }
}
