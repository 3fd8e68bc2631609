//! Error types for TubeWiki.
//!
//! Library crates use [`TubeWikiError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every variant maps to an [`ErrorKind`]; the retry executor and the job
//! pipeline decide what to do with a failure by kind, never by message.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all TubeWiki operations.
#[derive(Debug, thiserror::Error)]
pub enum TubeWikiError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure talking to a remote service.
    #[error("network error: {0}")]
    Network(String),

    /// A single attempt exceeded its wall-clock budget.
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// The job's source reference is not a recognized media URL.
    #[error("invalid source reference '{url}': {reason}")]
    InvalidSourceReference { url: String, reason: String },

    /// The media exists but has no caption track at all.
    #[error("transcript not available for video: {video_id}")]
    TranscriptUnavailable { video_id: String },

    /// The text-generation provider failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// The document sink rejected or failed the write.
    #[error("document sink unavailable: {0}")]
    SinkUnavailable(String),

    /// The job descriptor carries no job-record reference.
    #[error("missing job reference in descriptor options")]
    MissingJobReference,

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Response or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Data validation error (malformed descriptor, bad field, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TubeWikiError>;

/// Coarse classification of a [`TubeWikiError`], used to select retryable
/// failures at each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Network,
    Timeout,
    InvalidSourceReference,
    TranscriptUnavailable,
    Generation,
    SinkUnavailable,
    MissingJobReference,
    Storage,
    Parse,
    Validation,
    Io,
}

impl ErrorKind {
    /// Stable snake_case name, used as a structured log field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::InvalidSourceReference => "invalid_source_reference",
            Self::TranscriptUnavailable => "transcript_unavailable",
            Self::Generation => "generation",
            Self::SinkUnavailable => "sink_unavailable",
            Self::MissingJobReference => "missing_job_reference",
            Self::Storage => "storage",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TubeWikiError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an invalid-source error for `url`.
    pub fn invalid_source(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSourceReference {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidSourceReference { .. } => ErrorKind::InvalidSourceReference,
            Self::TranscriptUnavailable { .. } => ErrorKind::TranscriptUnavailable,
            Self::Generation(_) => ErrorKind::Generation,
            Self::SinkUnavailable(_) => ErrorKind::SinkUnavailable,
            Self::MissingJobReference => ErrorKind::MissingJobReference,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Whether this failure came from the transport rather than the data.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Timeout)
    }
}
