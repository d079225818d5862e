//! Completion service capability.
//!
//! Both the model classifier and the evaluator's explanation tier talk to an
//! external chat-completion service through [`CompletionService`]. The real
//! network dependency lives in [`HttpCompletionClient`]; tests inject stubs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::{non_empty_env, parsed_env};
use crate::metrics::METRICS;

/// A role-tagged prompt for one completion round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Per-call deadline; falls back to the client's configured timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.0,
            timeout: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Completion service failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion service is not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion request timed out after {0}s")]
    Timeout(u64),

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),

    #[error("completion service returned an empty reply")]
    EmptyResponse,
}

/// Capability: turn a prompt into free text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, CompletionError>;
}

/// Connection settings for an OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL, e.g. `https://api.moonshot.cn/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.moonshot.cn/v1".to_string(),
            model: "moonshot-v1-8k".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl CompletionConfig {
    /// Read settings from the environment, keeping defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: non_empty_env("ROUTECHECK_COMPLETION_URL").unwrap_or(defaults.base_url),
            model: non_empty_env("ROUTECHECK_COMPLETION_MODEL").unwrap_or(defaults.model),
            api_key: non_empty_env("ROUTECHECK_COMPLETION_API_KEY")
                .or_else(|| non_empty_env("MOONSHOT_API_KEY"))
                .or_else(|| non_empty_env("OPENAI_API_KEY")),
            timeout_secs: parsed_env("ROUTECHECK_COMPLETION_TIMEOUT_SECS", defaults.timeout_secs),
        }
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpCompletionClient {
    config: CompletionConfig,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        if config.api_key.is_none() {
            return Err(CompletionError::NotConfigured(
                "no API key (set ROUTECHECK_COMPLETION_API_KEY, MOONSHOT_API_KEY or OPENAI_API_KEY)"
                    .to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("routecheck/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CompletionError::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send(&self, prompt: &Prompt) -> Result<String, CompletionError> {
        let timeout = prompt
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.timeout_secs));

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": prompt.temperature,
        });

        let mut request = self.http.post(self.endpoint()).json(&body).timeout(timeout);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout(timeout.as_secs())
            } else {
                CompletionError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body: crate::domain::truncate_message(&body, 200),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))?;

        extract_reply(&payload)
    }
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, CompletionError> {
        METRICS.inc_completion_calls();
        debug!(model = %self.config.model, "sending completion request");
        let result = self.send(prompt).await;
        if result.is_err() {
            METRICS.inc_completion_failures();
        }
        result
    }
}

/// Stand-in used when no completion endpoint is configured. Every call fails
/// with [`CompletionError::NotConfigured`], so callers take their fallbacks.
#[derive(Debug, Clone)]
pub struct UnconfiguredService {
    reason: String,
}

impl UnconfiguredService {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CompletionService for UnconfiguredService {
    async fn complete(&self, _prompt: &Prompt) -> Result<String, CompletionError> {
        Err(CompletionError::NotConfigured(self.reason.clone()))
    }
}

/// Build the HTTP client for `config`, or an [`UnconfiguredService`] when
/// that is not possible.
pub fn service_from_config(config: CompletionConfig) -> Arc<dyn CompletionService> {
    match HttpCompletionClient::new(config) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            debug!(error = %err, "completion service unavailable");
            let reason = match err {
                CompletionError::NotConfigured(reason) => reason,
                other => other.to_string(),
            };
            Arc::new(UnconfiguredService::new(reason))
        }
    }
}

/// Pull `choices[0].message.content` out of a chat-completion payload.
pub fn extract_reply(payload: &Value) -> Result<String, CompletionError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .ok_or_else(|| CompletionError::InvalidResponse("missing choices[0].message.content".into()))?
        .as_str()
        .ok_or_else(|| CompletionError::InvalidResponse("content is not a string".into()))?
        .trim();

    if content.is_empty() {
        return Err(CompletionError::EmptyResponse);
    }
    Ok(content.to_string())
}
