//! Transcript retrieval for media URLs.
//!
//! [`TranscriptFetcher`] resolves a URL to its video id, picks the best
//! caption track for a language preference list, and joins the track's
//! fragments into one plain-text transcript. The whole fetch runs under the
//! retry executor; only transport failures are retried.

mod timedtext;
mod video_id;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use tubewiki_executor::{RetryPolicy, TRANSIENT, retry_with_backoff};
use tubewiki_shared::{Result, TubeWikiError};

pub use timedtext::TimedTextProvider;
pub use video_id::extract_video_id;

// ---------------------------------------------------------------------------
// Tracks and fragments
// ---------------------------------------------------------------------------

/// Whether a caption track was authored or machine-generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Manual,
    Generated,
}

/// One caption track available for a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
    /// Language code, e.g. `en` or `en-US`.
    pub language: String,
    /// Optional track name; some videos carry several tracks per language.
    pub name: Option<String>,
    pub kind: TrackKind,
}

impl CaptionTrack {
    pub fn manual(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            name: None,
            kind: TrackKind::Manual,
        }
    }

    pub fn generated(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            name: None,
            kind: TrackKind::Generated,
        }
    }
}

/// A single timed caption line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionFragment {
    pub text: String,
}

impl CaptionFragment {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Source of caption tracks.
#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    /// All caption tracks available for `video_id`. Empty when the video has
    /// no captions.
    async fn list_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrack>>;

    /// The ordered fragments of one track.
    async fn fetch_fragments(
        &self,
        video_id: &str,
        track: &CaptionTrack,
    ) -> Result<Vec<CaptionFragment>>;
}

/// Pick the track to use for `languages` (most preferred first).
///
/// Manually authored tracks in preference order win over generated tracks
/// in preference order; with no language match the first listed track is
/// used.
pub fn select_track<'a>(tracks: &'a [CaptionTrack], languages: &[String]) -> Option<&'a CaptionTrack> {
    let find = |kind: TrackKind| {
        languages.iter().find_map(|lang| {
            tracks
                .iter()
                .find(|t| t.kind == kind && t.language.eq_ignore_ascii_case(lang))
        })
    };

    find(TrackKind::Manual)
        .or_else(|| find(TrackKind::Generated))
        .or_else(|| tracks.first())
}

/// Join fragment texts with single spaces, preserving order.
pub fn join_fragments(fragments: &[CaptionFragment]) -> String {
    fragments
        .iter()
        .map(|f| f.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Retrying transcript fetcher.
#[derive(Clone)]
pub struct TranscriptFetcher {
    provider: Arc<dyn TranscriptProvider>,
    policy: RetryPolicy,
    languages: Vec<String>,
}

impl TranscriptFetcher {
    pub fn new(provider: Arc<dyn TranscriptProvider>, policy: RetryPolicy, languages: Vec<String>) -> Self {
        Self {
            provider,
            policy,
            languages,
        }
    }

    /// Fetch the full transcript text for `url`.
    ///
    /// `languages` overrides the configured preference list for this call.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &str, languages: Option<&[String]>) -> Result<String> {
        let video_id = extract_video_id(url)?;
        let languages = languages
            .filter(|l| !l.is_empty())
            .unwrap_or(self.languages.as_slice());

        let text = retry_with_backoff(&self.policy, "fetch_transcript", TRANSIENT, || {
            self.fetch_once(&video_id, languages)
        })
        .await?;

        info!(video_id = %video_id, chars = text.chars().count(), "transcript fetched");
        Ok(text)
    }

    async fn fetch_once(&self, video_id: &str, languages: &[String]) -> Result<String> {
        let tracks = self.provider.list_tracks(video_id).await?;
        let track = select_track(&tracks, languages).ok_or_else(|| {
            TubeWikiError::TranscriptUnavailable {
                video_id: video_id.to_string(),
            }
        })?;

        let fragments = self.provider.fetch_fragments(video_id, track).await?;
        let text = join_fragments(&fragments);
        if text.is_empty() {
            return Err(TubeWikiError::TranscriptUnavailable {
                video_id: video_id.to_string(),
            });
        }
        Ok(text)
    }
}
