//! Core domain types: job records and inbound job descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TubeWikiError};

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Identifier of a job record. Assigned by the submission path, never by
/// the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job record.
///
/// `pending -> processing -> completed | failed`. Terminal states are never
/// left by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = TubeWikiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TubeWikiError::validation(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// JobRecord
// ---------------------------------------------------------------------------

/// Persisted state of one unit of work and its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    /// Owner (user) identifier.
    pub owner_id: String,
    /// Media URL the job was submitted for.
    pub source_ref: String,
    pub status: JobStatus,
    /// Generated Markdown, set on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Populated only when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Reference to the document created in the sink, if one was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A fresh `pending` record, as the submission path creates it.
    pub fn pending(id: JobId, owner_id: impl Into<String>, source_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: owner_id.into(),
            source_ref: source_ref.into(),
            status: JobStatus::Pending,
            content: None,
            title: None,
            error_message: None,
            document_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// JobDescriptor
// ---------------------------------------------------------------------------

/// The inbound (possibly duplicated) request to run the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Media URL.
    #[serde(alias = "video_url")]
    pub source: String,
    /// Owner identifier.
    #[serde(default, alias = "user_id")]
    pub owner: String,
    /// Generation preset name; only `default` exists today.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default)]
    pub options: JobOptions,
}

/// Typed descriptor options. Unknown keys on the wire are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Reference to the job record this descriptor drives.
    #[serde(default, alias = "note_id", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Parent page in the document sink; the sink step runs only when set.
    #[serde(default, alias = "notion_page_id", skip_serializing_if = "Option::is_none")]
    pub sink_page_id: Option<String>,
    /// Transcript language preference override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
}

impl JobDescriptor {
    /// Parse and validate a descriptor from its JSON wire form.
    pub fn from_json(body: &str) -> Result<Self> {
        let descriptor: Self = serde_json::from_str(body)
            .map_err(|e| TubeWikiError::validation(format!("invalid job descriptor: {e}")))?;

        if descriptor.source.trim().is_empty() {
            return Err(TubeWikiError::validation("job descriptor has an empty source"));
        }
        if let Some(page) = &descriptor.options.sink_page_id {
            if page.trim().is_empty() {
                return Err(TubeWikiError::validation("sink page id must not be empty"));
            }
        }

        Ok(descriptor)
    }

    /// The job-record reference, or [`TubeWikiError::MissingJobReference`].
    pub fn job_id(&self) -> Result<JobId> {
        self.options.job_id.ok_or(TubeWikiError::MissingJobReference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id: JobId = " 42 ".parse().expect("parse JobId");
        assert_eq!(id, JobId(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!("COMPLETED".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert_eq!("pending".parse::<JobStatus>().unwrap(), JobStatus::Pending);
        assert!("archived".parse::<JobStatus>().is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn descriptor_accepts_submission_wire_names() {
        let body = r#"{
            "video_url": "https://youtu.be/abc12345678",
            "user_id": "u-1",
            "preset": "default",
            "options": {"note_id": 7, "notion_page_id": "p-1", "extra": true}
        }"#;
        let descriptor = JobDescriptor::from_json(body).expect("parse");
        assert_eq!(descriptor.source, "https://youtu.be/abc12345678");
        assert_eq!(descriptor.owner, "u-1");
        assert_eq!(descriptor.job_id().unwrap(), JobId(7));
        assert_eq!(descriptor.options.sink_page_id.as_deref(), Some("p-1"));
    }

    #[test]
    fn descriptor_without_job_reference() {
        let descriptor =
            JobDescriptor::from_json(r#"{"source": "https://youtu.be/abc12345678"}"#).unwrap();
        assert!(matches!(
            descriptor.job_id(),
            Err(TubeWikiError::MissingJobReference)
        ));
    }

    #[test]
    fn descriptor_rejects_garbage() {
        let err = JobDescriptor::from_json("invalid json").unwrap_err();
        assert!(err.to_string().contains("invalid job descriptor"));

        let err = JobDescriptor::from_json(r#"{"source": "  "}"#).unwrap_err();
        assert!(err.to_string().contains("empty source"));
    }

    #[test]
    fn record_serialization_skips_empty_fields() {
        let record = JobRecord::pending(JobId(1), "u", "https://youtu.be/abc12345678");
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains(r#""status":"pending""#));
        assert!(!json.contains("error_message"));
    }
}
