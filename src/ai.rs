//! AI provider abstraction.
//!
//! Defines the [`AiClient`] trait and concrete implementations:
//! - **[`DisabledClient`]** — returns errors; used when no provider is configured.
//! - **[`OpenAiClient`]** — calls an OpenAI-compatible chat-completions API
//!   with retry and backoff.
//!
//! The client is constructed once per process via [`create_client`] and
//! passed explicitly into each pipeline component, so tests can substitute
//! a scripted fake.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AiConfig;

/// Chat-completion client used by the classifier, analyzer, extractors,
/// and the vision tier of the extraction cascade.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Run one text completion and return the raw model output.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Run one vision completion over raw document bytes.
    async fn complete_vision(&self, prompt: &str, bytes: &[u8], mime: &str) -> Result<String>;
}

/// A no-op client that always returns errors.
pub struct DisabledClient;

#[async_trait]
impl AiClient for DisabledClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("AI provider is disabled")
    }

    async fn complete_vision(&self, _prompt: &str, _bytes: &[u8], _mime: &str) -> Result<String> {
        bail!("AI provider is disabled")
    }
}

/// Client for an OpenAI-compatible chat-completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiClient {
    model: String,
    vision_model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ai.model required for OpenAI provider"))?;
        let vision_model = config.vision_model.clone().unwrap_or_else(|| model.clone());

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self {
            model,
            vision_model,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    async fn chat(&self, model: &str, messages: serde_json::Value) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "temperature": 0.0,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return extract_message_content(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("AI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("AI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("AI call failed after retries")))
    }
}

#[async_trait]
impl AiClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let messages = serde_json::json!([
            { "role": "system", "content": system },
            { "role": "user", "content": user },
        ]);
        self.chat(&self.model, messages).await
    }

    async fn complete_vision(&self, prompt: &str, bytes: &[u8], mime: &str) -> Result<String> {
        let data_url = format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        );
        let messages = serde_json::json!([
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            },
        ]);
        self.chat(&self.vision_model, messages).await
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn extract_message_content(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid AI response: missing message content"))
}

/// Create the appropriate [`AiClient`] based on configuration.
pub fn create_client(config: &AiConfig) -> Result<Arc<dyn AiClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledClient)),
        "openai" => Ok(Arc::new(OpenAiClient::new(config)?)),
        other => bail!("Unknown AI provider: {}", other),
    }
}

/// Strip Markdown code fences models often wrap JSON answers in.
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Parse a model answer as JSON, tolerating code fences and leading prose.
pub fn parse_json_response(s: &str) -> Result<serde_json::Value> {
    let cleaned = strip_code_fences(s);
    if let Ok(v) = serde_json::from_str(cleaned) {
        return Ok(v);
    }
    // Fall back to the first balanced {...} or [...] in the answer.
    for open in ['{', '['] {
        if let Some(start) = cleaned.find(open) {
            let close = if open == '{' { '}' } else { ']' };
            if let Some(end) = cleaned.rfind(close) {
                if end > start {
                    if let Ok(v) = serde_json::from_str(&cleaned[start..=end]) {
                        return Ok(v);
                    }
                }
            }
        }
    }
    bail!("AI response is not valid JSON")
}
