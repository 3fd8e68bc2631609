//! Notion page writer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use tubewiki_executor::{RetryPolicy, retry_with_backoff};
use tubewiki_markdown::{ContentBlock, ListStyle};
use tubewiki_shared::{ErrorKind, NotionConfig, Result, TubeWikiError, read_secret};

use crate::{DocumentSink, SINK_RETRYABLE};

/// Notion rejects more children than this in one request.
pub const MAX_CHILDREN_PER_REQUEST: usize = 100;

/// Longest title Notion accepts.
pub const MAX_TITLE_CHARS: usize = 2000;

const DEFAULT_TIMEOUT_SECS: u64 = 60;

const USER_AGENT: &str = concat!("TubeWiki/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct PageResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

/// [`DocumentSink`] that creates child pages through the Notion REST API.
#[derive(Debug, Clone)]
pub struct NotionSink {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    notion_version: String,
    policy: RetryPolicy,
}

impl NotionSink {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        notion_version: impl Into<String>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| TubeWikiError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            notion_version: notion_version.into(),
            policy,
        })
    }

    /// Build from config, reading the token from the configured env var.
    pub fn from_config(config: &NotionConfig, policy: RetryPolicy) -> Result<Self> {
        Self::new(
            &config.base_url,
            read_secret(&config.token_env),
            &config.notion_version,
            policy,
        )
    }

    /// Whether a token is configured.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    async fn send(&self, token: &str, method: Method, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http_client
            .request(method, &url)
            .bearer_auth(token)
            .header("Notion-Version", &self.notion_version)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, %url, "notion request failed");
                TubeWikiError::Network(format!("{url}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "notion API error");
            return Err(status_error(status, &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| TubeWikiError::SinkUnavailable(format!("invalid response body: {e}")))
    }

    async fn send_with_retry(
        &self,
        token: &str,
        method: Method,
        path: &str,
        body: &Value,
    ) -> Result<Value> {
        retry_with_backoff(&self.policy, "notion_request", SINK_RETRYABLE, || {
            self.send(token, method.clone(), path, body)
        })
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::Network | ErrorKind::Timeout => TubeWikiError::SinkUnavailable(e.to_string()),
            _ => e,
        })
    }
}

/// Map a non-2xx status to an error kind. Client errors other than 408, 409
/// and 429 will not succeed on resend, so they are not `SinkUnavailable`.
fn status_error(status: StatusCode, body: &str) -> TubeWikiError {
    let message = format!("notion rejected request: HTTP {status}: {body}");
    match status.as_u16() {
        401 | 403 => TubeWikiError::config(message),
        408 | 409 | 429 => TubeWikiError::SinkUnavailable(format!("HTTP {status}: {body}")),
        _ if status.is_client_error() => TubeWikiError::validation(message),
        _ => TubeWikiError::SinkUnavailable(format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl DocumentSink for NotionSink {
    #[instrument(skip_all, fields(destination = %destination, blocks = blocks.len()))]
    async fn create_document(
        &self,
        destination: &str,
        title: &str,
        blocks: &[ContentBlock],
        media_url: Option<&str>,
    ) -> Result<String> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| TubeWikiError::config("notion token is missing"))?;

        if destination.trim().is_empty() {
            return Err(TubeWikiError::validation("destination page id is empty"));
        }

        let mut children: Vec<Value> = Vec::with_capacity(blocks.len() + 1);
        if let Some(url) = media_url.filter(|u| !u.trim().is_empty()) {
            children.push(embed_block(url));
        }
        children.extend(blocks.iter().map(block_to_notion));

        let mut chunks = children.chunks(MAX_CHILDREN_PER_REQUEST);
        let first = chunks.next().unwrap_or_default();

        let body = json!({
            "parent": { "page_id": destination },
            "properties": {
                "title": [{ "text": { "content": clip(title, MAX_TITLE_CHARS) } }]
            },
            "children": first,
        });

        let raw = self
            .send_with_retry(token, Method::POST, "/v1/pages", &body)
            .await?;
        let page: PageResponse = serde_json::from_value(raw)
            .map_err(|e| TubeWikiError::SinkUnavailable(format!("unexpected page response: {e}")))?;

        for chunk in chunks {
            let path = format!("/v1/blocks/{}/children", page.id);
            self.send_with_retry(token, Method::PATCH, &path, &json!({ "children": chunk }))
                .await?;
            debug!(page_id = %page.id, appended = chunk.len(), "appended blocks");
        }

        let url = page
            .url
            .unwrap_or_else(|| format!("https://www.notion.so/{}", page.id.replace('-', "")));
        info!(page_id = %page.id, %url, children = children.len(), "notion page created");
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Block encoding
// ---------------------------------------------------------------------------

fn rich_text(text: &str) -> Value {
    json!([{ "type": "text", "text": { "content": text } }])
}

fn typed_block(kind: &str, payload: Value) -> Value {
    json!({ "object": "block", "type": kind, kind: payload })
}

/// Encode one content block as a Notion block object.
pub fn block_to_notion(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Heading { level, text } => {
            let kind = format!("heading_{}", (*level).clamp(1, 3));
            typed_block(&kind, json!({ "rich_text": rich_text(text) }))
        }
        ContentBlock::Paragraph { text } => {
            typed_block("paragraph", json!({ "rich_text": rich_text(text) }))
        }
        ContentBlock::ListItem { style, text } => {
            let kind = match style {
                ListStyle::Bulleted => "bulleted_list_item",
                ListStyle::Numbered => "numbered_list_item",
            };
            typed_block(kind, json!({ "rich_text": rich_text(text) }))
        }
        ContentBlock::Code { language, text } => typed_block(
            "code",
            json!({ "rich_text": rich_text(text), "language": language }),
        ),
    }
}

/// Embed block pointing at the source media.
pub fn embed_block(url: &str) -> Value {
    typed_block("embed", json!({ "url": url }))
}

fn clip(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
