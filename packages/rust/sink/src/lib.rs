//! Document sinks: where finished study guides are published.
//!
//! A [`DocumentSink`] turns a title plus [`ContentBlock`]s into a remote
//! document and returns its URL. The shipped implementation is
//! [`NotionSink`].

mod notion;

use async_trait::async_trait;

use tubewiki_markdown::ContentBlock;
use tubewiki_shared::{ErrorKind, Result};

pub use notion::{MAX_CHILDREN_PER_REQUEST, MAX_TITLE_CHARS, NotionSink, block_to_notion, embed_block};

/// Failure kinds retried for sink writes. Rejected requests (most 4xx) map
/// to config or validation errors and are never resent.
pub const SINK_RETRYABLE: &[ErrorKind] = &[
    ErrorKind::SinkUnavailable,
    ErrorKind::Network,
    ErrorKind::Timeout,
];

/// A remote document store.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Create a document under `destination` and return its URL.
    ///
    /// When `media_url` is given an embed of it is placed before `blocks`.
    /// Fails with a config error, before any remote call, when the sink has
    /// no credential.
    async fn create_document(
        &self,
        destination: &str,
        title: &str,
        blocks: &[ContentBlock],
        media_url: Option<&str>,
    ) -> Result<String>;
}
