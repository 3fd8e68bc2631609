//! Text-generation providers.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tubewiki_shared::{GenerationConfig, Result, TubeWikiError, read_secret};

/// Overall HTTP timeout; the executor applies its own per-attempt budget.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

const USER_AGENT: &str = concat!("TubeWiki/", env!("CARGO_PKG_VERSION"));

/// One completion request: a system instruction plus a user message.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

/// A model that turns a [`GenerationRequest`] into text.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn complete(&self, request: &GenerationRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    #[serde(default)]
    choices: Vec<ChoiceRaw>,
}

#[derive(Debug, Deserialize)]
struct ChoiceRaw {
    message: MessageRaw,
}

#[derive(Debug, Deserialize)]
struct MessageRaw {
    #[serde(default)]
    content: Option<String>,
}

/// Provider speaking the OpenAI-compatible `/chat/completions` protocol.
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    http_client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| TubeWikiError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// Build from config, reading the key from the configured env var.
    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            &config.model,
            read_secret(&config.api_key_env),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationProvider for ChatCompletionsProvider {
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| TubeWikiError::config("generation API key is missing"))?;

        let start = Instant::now();
        let body = ChatBody {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "chat completion request failed");
                TubeWikiError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "chat completion API error");
            return Err(TubeWikiError::Generation(format!(
                "HTTP {status}: {error_text}"
            )));
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| TubeWikiError::Generation(format!("invalid completion response: {e}")))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TubeWikiError::Generation("no completion choices returned".into()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            chars = content.len(),
            "chat completion"
        );

        Ok(content)
    }
}
