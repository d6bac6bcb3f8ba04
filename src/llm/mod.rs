use std::env;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::CompletionError;

const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Seam between the pipeline and the completion provider. The worker and
/// the summarizer only ever see this trait, which keeps them testable
/// against a mock backend.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    /// Build a client using environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("SUMMARY_API_KEY").context("SUMMARY_API_KEY env var is missing")?;
        let api_base =
            env::var("SUMMARY_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let model = env::var("SUMMARY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(Self {
            http: Client::new(),
            api_base,
            api_key,
            model,
        })
    }

    async fn execute(&self, prompt: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt },
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("failed to read response body")?;

        if !status.is_success() {
            bail!("completion call failed with status {status}: {response_text}");
        }

        let body: ChatCompletionPayload =
            serde_json::from_str(&response_text).with_context(|| {
                let preview: String = response_text.chars().take(500).collect();
                format!("failed to parse completion response as JSON. Response body: {preview}")
            })?;

        let text = body
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            bail!("completion response contained no assistant text");
        }

        Ok(text)
    }
}

#[async_trait]
impl Completion for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        self.execute(prompt)
            .await
            .map_err(|err| CompletionError(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPayload {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_completion_payload() {
        let raw = r#"{
            "id": "gen-1",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": "A summary." } }
            ],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
        }"#;

        let payload: ChatCompletionPayload = serde_json::from_str(raw).expect("parse payload");
        let text = payload
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        assert_eq!(text, "A summary.");
    }

    #[test]
    fn tolerates_missing_content() {
        let raw = r#"{ "choices": [ { "message": {} } ] }"#;
        let payload: ChatCompletionPayload = serde_json::from_str(raw).expect("parse payload");
        assert!(payload.choices[0].message.content.is_none());
    }
}
