//! Chat completion provider abstraction.
//!
//! Mirrors the embedding provider pattern: a [`Completion`] trait with a
//! disabled variant and an OpenAI-backed implementation. The analyzer calls
//! through this seam so tests can swap in a scripted model.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::CompletionConfig;

/// Trait for chat completion providers.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;
    /// Run one chat turn and return the assistant's text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// A no-op completion provider that always returns errors.
pub struct DisabledCompletion;

#[async_trait]
impl Completion for DisabledCompletion {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

/// Completion provider backed by the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set. Transient
/// failures (429, 5xx, network) retry with exponential backoff; other client
/// errors fail immediately, same policy as the embedder.
pub struct OpenAiCompletion {
    model: String,
    temperature: f64,
    max_retries: u32,
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiCompletion {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("completion.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl Completion for OpenAiCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return extract_completion_text(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion failed after retries")))
    }
}

/// Pull `choices[0].message.content` out of a chat completions response.
fn extract_completion_text(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Create the appropriate [`Completion`] based on configuration.
pub fn create_completion(config: &CompletionConfig) -> Result<Box<dyn Completion>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledCompletion)),
        "openai" => Ok(Box::new(OpenAiCompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_completion_text() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(extract_completion_text(&json).unwrap(), "hello");
    }

    #[test]
    fn test_extract_completion_missing_content() {
        let json = serde_json::json!({"choices": []});
        assert!(extract_completion_text(&json).is_err());
    }

    #[tokio::test]
    async fn test_disabled_completion_errors() {
        let c = DisabledCompletion;
        assert!(c.complete("s", "u").await.is_err());
    }
}
