//! Chat-completion backends.
//!
//! - **[`DisabledCompletion`]**: always fails; inference then returns the
//!   fallback reply through the HTTP layer.
//! - **[`OpenAiCompletion`]**: any OpenAI-compatible
//!   `POST /v1/chat/completions` endpoint.
//!
//! Requests carry the configured timeout; a timed-out call surfaces as an
//! error to the orchestrator.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use parley_core::completion::{ChatCompletion, ChatMessage};

use crate::config::CompletionConfig;

/// Build the completion backend named by the configuration.
pub fn create_completion(config: &CompletionConfig) -> Result<Arc<dyn ChatCompletion>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "openai" => Ok(Arc::new(OpenAiCompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

pub struct DisabledCompletion;

#[async_trait]
impl ChatCompletion for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

/// OpenAI-compatible chat-completion client.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiCompletion {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenAiCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("completion.model required for OpenAI provider"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            url: config.url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChatCompletion for OpenAiCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Completion API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = parse_completion_response(&json)?;
        tracing::debug!(model = %self.model, turns = messages.len(), chars = text.len(), "completion received");
        Ok(text)
    }
}

/// Extract `choices[0].message.content`, trimmed.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_response() {
        let json = serde_json::json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "  Hello!\n"}}]
        });
        assert_eq!(parse_completion_response(&json).unwrap(), "Hello!");
        assert!(parse_completion_response(&serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn test_messages_serialize_with_lowercase_roles() {
        let body = serde_json::json!({
            "messages": [ChatMessage::system("s"), ChatMessage::user("u"), ChatMessage::assistant("a")]
        });
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][2]["role"], "assistant");
    }
}
