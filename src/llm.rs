//! Language model capability abstraction and implementations.
//!
//! Defines the [`LanguageModel`] / [`ModelSession`] traits and concrete
//! implementations:
//! - **[`DisabledModel`]** — reports the capability as absent; used when no
//!   model runtime is configured.
//! - **[`HttpModel`]** — talks to an OpenAI-compatible local runtime
//!   (LM Studio, Ollama, and friends) with retry and backoff.
//!
//! A session is created from a seed conversation (system instruction plus
//! optional example turns) and sampling parameters, then answers one-shot,
//! non-streamed prompts. Callers check [`LanguageModel::availability`] once
//! per pipeline run and map every non-ready state to a degraded behavior
//! instead of an error.
//!
//! # Retry Strategy
//!
//! The HTTP implementation retries transient errors with exponential
//! backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::models::{ChatTurn, Role, SamplingParams};

/// Runtime capability state, checked once per pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Sessions can be created and prompted.
    Ready,
    /// The runtime is still fetching the model; not usable yet.
    Downloading,
    /// The runtime is reachable but reports the model as unusable.
    Unavailable,
    /// No model runtime is present at all.
    Absent,
}

impl Availability {
    pub fn is_ready(&self) -> bool {
        matches!(self, Availability::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Ready => "ready",
            Availability::Downloading => "downloading",
            Availability::Unavailable => "unavailable",
            Availability::Absent => "absent",
        }
    }
}

/// A language model runtime that can open prompt sessions.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Capability check. Cheap enough to call once per pipeline run.
    async fn availability(&self) -> Availability;

    /// Open a session seeded with `seed` conversation turns.
    async fn open_session(
        &self,
        seed: &[ChatTurn],
        params: SamplingParams,
    ) -> Result<Box<dyn ModelSession>>;
}

/// One open conversation context. Prompts are one-shot and non-streamed.
#[async_trait]
pub trait ModelSession: Send + Sync {
    async fn prompt(&self, text: &str) -> Result<String>;
}

/// Instantiate the model implementation selected by the configuration.
pub fn create_model(config: &ModelConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledModel)),
        "openai-compat" => Ok(Box::new(HttpModel::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

// ============ Disabled model ============

/// Stands in when no model runtime is configured. Reports the capability
/// as absent; opening a session always fails.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    async fn availability(&self) -> Availability {
        Availability::Absent
    }

    async fn open_session(
        &self,
        _seed: &[ChatTurn],
        _params: SamplingParams,
    ) -> Result<Box<dyn ModelSession>> {
        bail!("model provider is disabled")
    }
}

// ============ OpenAI-compatible HTTP model ============

/// Model runtime spoken to over an OpenAI-compatible HTTP API.
///
/// Availability is probed via `GET /v1/models`; completions go through
/// `POST /v1/chat/completions` with `stream: false`.
pub struct HttpModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl HttpModel {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.model required for openai-compat provider"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for HttpModel {
    async fn availability(&self) -> Availability {
        let url = format!("{}/v1/models", self.base_url);

        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            // Nothing listening at all — the capability is absent.
            Err(e) if e.is_connect() => return Availability::Absent,
            Err(_) => return Availability::Unavailable,
        };

        if !resp.status().is_success() {
            return Availability::Unavailable;
        }

        let json: serde_json::Value = match resp.json().await {
            Ok(j) => j,
            Err(_) => return Availability::Unavailable,
        };

        let listed = json
            .get("data")
            .and_then(|d| d.as_array())
            .map(|models| {
                models
                    .iter()
                    .any(|m| m.get("id").and_then(|id| id.as_str()) == Some(self.model.as_str()))
            })
            .unwrap_or(false);

        if listed {
            Availability::Ready
        } else {
            Availability::Unavailable
        }
    }

    async fn open_session(
        &self,
        seed: &[ChatTurn],
        params: SamplingParams,
    ) -> Result<Box<dyn ModelSession>> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            url: format!("{}/v1/chat/completions", self.base_url),
            model: self.model.clone(),
            seed: seed.to_vec(),
            params,
            max_retries: self.max_retries,
        }))
    }
}

struct HttpSession {
    client: reqwest::Client,
    url: String,
    model: String,
    seed: Vec<ChatTurn>,
    params: SamplingParams,
    max_retries: u32,
}

#[async_trait]
impl ModelSession for HttpSession {
    async fn prompt(&self, text: &str) -> Result<String> {
        let mut messages = self.seed.clone();
        messages.push(ChatTurn {
            role: Role::User,
            content: text.to_string(),
        });

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.params.temperature,
            "top_k": self.params.top_k,
            "stream": false,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&self.url).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("model API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("model API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("completion failed after retries")))
    }
}

/// Pull the completion text out of a chat-completions response.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_model_is_absent() {
        let model = create_model(&ModelConfig::default()).unwrap();
        assert_eq!(model.availability().await, Availability::Absent);
        assert!(model
            .open_session(&[], SamplingParams::default())
            .await
            .is_err());
    }

    #[test]
    fn http_model_requires_a_model_name() {
        let config = ModelConfig {
            provider: "openai-compat".to_string(),
            ..Default::default()
        };
        assert!(create_model(&config).is_err());
    }

    #[test]
    fn parse_completion_extracts_content() {
        let json = serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "Hello there" } }
            ]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Hello there");
    }

    #[test]
    fn parse_completion_rejects_missing_choices() {
        let json = serde_json::json!({ "error": "boom" });
        assert!(parse_completion(&json).is_err());
    }
}
