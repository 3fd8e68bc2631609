//! HTTP caption provider speaking the timed-text endpoint.
//!
//! Track listing: `GET {base}/api/timedtext?type=list&v={id}` returns XML
//! `<track .../>` elements. Fragments: `GET {base}/api/timedtext?v={id}&lang=..&fmt=json3`
//! returns `{"events":[{"segs":[{"utf8":"..."}]}]}`.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use tubewiki_shared::{Result, TubeWikiError};

use crate::{CaptionFragment, CaptionTrack, TrackKind, TranscriptProvider};

/// Default HTTP timeout for caption requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 3;

const USER_AGENT: &str = concat!("TubeWiki/", env!("CARGO_PKG_VERSION"));

static TRACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<track\s+([^>]*?)/?>").expect("valid regex"));

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z_]+)="([^"]*)""#).expect("valid regex"));

/// Caption provider backed by the public timed-text API.
#[derive(Debug, Clone)]
pub struct TimedTextProvider {
    client: Client,
    base_url: String,
}

impl TimedTextProvider {
    /// Create a provider rooted at `base_url` (e.g. `https://www.youtube.com`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| TubeWikiError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/timedtext", self.base_url)
    }

    async fn get_text(&self, query: &[(&str, &str)]) -> Result<Option<String>> {
        let url = self.endpoint();
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| TubeWikiError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TubeWikiError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TubeWikiError::Network(format!("{url}: failed to read body: {e}")))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl TranscriptProvider for TimedTextProvider {
    async fn list_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrack>> {
        let body = self.get_text(&[("type", "list"), ("v", video_id)]).await?;
        let tracks = body.as_deref().map(parse_track_list).unwrap_or_default();
        debug!(video_id, tracks = tracks.len(), "caption tracks listed");
        Ok(tracks)
    }

    async fn fetch_fragments(
        &self,
        video_id: &str,
        track: &CaptionTrack,
    ) -> Result<Vec<CaptionFragment>> {
        let mut query = vec![
            ("v", video_id),
            ("lang", track.language.as_str()),
            ("fmt", "json3"),
        ];
        if track.kind == TrackKind::Generated {
            query.push(("kind", "asr"));
        }
        if let Some(name) = track.name.as_deref().filter(|n| !n.is_empty()) {
            query.push(("name", name));
        }

        match self.get_text(&query).await? {
            Some(body) if !body.trim().is_empty() => parse_json3(&body),
            _ => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a timed-text track list document.
pub(crate) fn parse_track_list(xml: &str) -> Vec<CaptionTrack> {
    TRACK_RE
        .captures_iter(xml)
        .filter_map(|cap| {
            let attrs: HashMap<&str, String> = ATTR_RE
                .captures_iter(cap.get(1)?.as_str())
                .filter_map(|a| Some((a.get(1)?.as_str(), unescape_xml(a.get(2)?.as_str()))))
                .collect();

            let language = attrs.get("lang_code")?.clone();
            let kind = match attrs.get("kind").map(String::as_str) {
                Some("asr") => TrackKind::Generated,
                _ => TrackKind::Manual,
            };

            Some(CaptionTrack {
                language,
                name: attrs.get("name").cloned().filter(|n| !n.is_empty()),
                kind,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(default)]
    segs: Vec<Json3Seg>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Parse a json3 caption document into fragments, one per event.
pub(crate) fn parse_json3(body: &str) -> Result<Vec<CaptionFragment>> {
    let doc: Json3 = serde_json::from_str(body)
        .map_err(|e| TubeWikiError::parse(format!("invalid caption document: {e}")))?;

    Ok(doc
        .events
        .into_iter()
        .filter_map(|event| {
            let text: String = event.segs.iter().map(|s| s.utf8.as_str()).collect();
            let text = text.replace('\n', " ").trim().to_string();
            (!text.is_empty()).then_some(CaptionFragment { text })
        })
        .collect())
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
