//! Job pipeline: descriptor → claim → transcript → study guide → mind map →
//! (optional) published document → terminal record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, field, info, instrument, warn};
use uuid::Uuid;

use tubewiki_generation::ContentGenerator;
use tubewiki_markdown::{extract_title, markdown_to_blocks};
use tubewiki_shared::{JobDescriptor, JobId, JobStatus, Result};
use tubewiki_sink::DocumentSink;
use tubewiki_transcript::TranscriptFetcher;

use crate::store::JobStore;

/// Default window after which a `processing` record may be reclaimed.
pub const DEFAULT_STALE_CLAIM: Duration = Duration::from_secs(900);

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a descriptor was acknowledged without doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoteNotFound,
    AlreadyCompleted,
    AlreadyFailed,
    AlreadyProcessing,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoteNotFound => "note_not_found",
            Self::AlreadyCompleted => "already_completed",
            Self::AlreadyFailed => "already_failed",
            Self::AlreadyProcessing => "already_processing",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handling one descriptor. Every variant is an acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success {
        job_id: JobId,
        title: String,
        document_url: Option<String>,
    },
    Skipped {
        job_id: JobId,
        reason: SkipReason,
    },
    Failed {
        job_id: JobId,
        reason: String,
    },
}

impl JobOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Success { job_id, .. }
            | Self::Skipped { job_id, .. }
            | Self::Failed { job_id, .. } => *job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for pipeline execution.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn stage(&self, name: &str);
    /// Called once with the final outcome.
    fn done(&self, outcome: &JobOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _name: &str) {}
    fn done(&self, _outcome: &JobOutcome) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// What a successful run produced.
struct Produced {
    content: String,
    title: String,
    document_url: Option<String>,
}

/// The job orchestrator. Holds its collaborators behind `Arc`, so one
/// instance can serve concurrent tasks.
pub struct Pipeline {
    store: Arc<dyn JobStore>,
    transcripts: TranscriptFetcher,
    generator: ContentGenerator,
    sink: Arc<dyn DocumentSink>,
    stale_claim: Duration,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        transcripts: TranscriptFetcher,
        generator: ContentGenerator,
        sink: Arc<dyn DocumentSink>,
    ) -> Self {
        Self {
            store,
            transcripts,
            generator,
            sink,
            stale_claim: DEFAULT_STALE_CLAIM,
        }
    }

    /// Set how long a `processing` record must sit untouched before another
    /// delivery may take it over.
    pub fn with_stale_claim(mut self, window: Duration) -> Self {
        self.stale_claim = window;
        self
    }

    /// Handle one descriptor without progress reporting.
    pub async fn process(&self, descriptor: &JobDescriptor) -> Result<JobOutcome> {
        self.process_with_progress(descriptor, &SilentProgress).await
    }

    /// Handle one descriptor.
    ///
    /// Only a descriptor without a job reference, or a storage failure, is
    /// an `Err`; pipeline failures are recorded on the job and returned as
    /// [`JobOutcome::Failed`].
    #[instrument(skip_all, fields(run_id = %Uuid::now_v7(), job_id = field::Empty))]
    pub async fn process_with_progress(
        &self,
        descriptor: &JobDescriptor,
        progress: &dyn ProgressReporter,
    ) -> Result<JobOutcome> {
        let job_id = descriptor.job_id()?;
        tracing::Span::current().record("job_id", job_id.0);
        let start = Instant::now();

        // --- Idempotency ---
        progress.stage("Loading job");
        let Some(mut record) = self.store.get(job_id).await? else {
            warn!("job record not found");
            return Ok(finish(progress, JobOutcome::Skipped {
                job_id,
                reason: SkipReason::NoteNotFound,
            }));
        };

        let terminal_skip = match record.status {
            JobStatus::Completed => Some(SkipReason::AlreadyCompleted),
            JobStatus::Failed => Some(SkipReason::AlreadyFailed),
            JobStatus::Pending | JobStatus::Processing => None,
        };
        if let Some(reason) = terminal_skip {
            info!(%reason, "job already terminal, skipping");
            return Ok(finish(progress, JobOutcome::Skipped { job_id, reason }));
        }

        let stale_before = chrono::Duration::from_std(self.stale_claim)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if !self.store.claim(job_id, stale_before).await? {
            info!("job claimed by another run, skipping");
            return Ok(finish(progress, JobOutcome::Skipped {
                job_id,
                reason: SkipReason::AlreadyProcessing,
            }));
        }
        record.status = JobStatus::Processing;
        record.updated_at = Utc::now();

        info!(source = %descriptor.source, "processing job");

        // --- Work ---
        let outcome = match self.hold_claim(job_id, self.run(descriptor, progress)).await {
            Ok(produced) => {
                record.status = JobStatus::Completed;
                record.content = Some(produced.content);
                record.title = Some(produced.title.clone());
                record.document_url = produced.document_url.clone();
                record.error_message = None;
                record.updated_at = Utc::now();
                self.store.save(&record).await?;

                info!(
                    title = %produced.title,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "job completed"
                );
                JobOutcome::Success {
                    job_id,
                    title: produced.title,
                    document_url: produced.document_url,
                }
            }
            Err(err) => {
                let reason = err.to_string();
                record.status = JobStatus::Failed;
                record.error_message = Some(reason.clone());
                record.updated_at = Utc::now();
                self.store.save(&record).await?;

                error!(
                    kind = %err.kind(),
                    error = %err,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "job failed"
                );
                JobOutcome::Failed { job_id, reason }
            }
        };

        Ok(finish(progress, outcome))
    }

    /// Drive `work` while refreshing the job's claim at a third of the stale
    /// window, so a live run is never reclaimed by a duplicate delivery.
    async fn hold_claim<T>(&self, job_id: JobId, work: impl Future<Output = Result<T>>) -> Result<T> {
        let period = (self.stale_claim / 3).max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(work);

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = heartbeat.tick() => match self.store.touch(job_id).await {
                    Ok(true) => debug!("job claim refreshed"),
                    Ok(false) => warn!("job left processing during run"),
                    Err(e) => warn!(error = %e, "failed to refresh job claim"),
                },
            }
        }
    }

    async fn run(
        &self,
        descriptor: &JobDescriptor,
        progress: &dyn ProgressReporter,
    ) -> Result<Produced> {
        progress.stage("Fetching transcript");
        let transcript = self
            .transcripts
            .fetch(&descriptor.source, descriptor.options.languages.as_deref())
            .await?;

        progress.stage("Generating study guide");
        let mut content = self.generator.generate_content(&transcript).await?;

        progress.stage("Generating mind map");
        if let Some(diagram) = self.generator.generate_diagram(&content).await {
            content.push_str(&format!("\n\n## Mind Map\n```mermaid\n{diagram}\n```"));
        }

        let title = extract_title(&content)
            .unwrap_or_else(|| format!("Study Guide: {}", descriptor.source));

        let document_url = match descriptor.options.sink_page_id.as_deref() {
            Some(destination) => {
                progress.stage("Publishing document");
                let blocks = markdown_to_blocks(&content);
                let url = self
                    .sink
                    .create_document(destination, &title, &blocks, Some(&descriptor.source))
                    .await?;
                Some(url)
            }
            None => None,
        };

        Ok(Produced {
            content,
            title,
            document_url,
        })
    }
}

fn finish(progress: &dyn ProgressReporter, outcome: JobOutcome) -> JobOutcome {
    progress.done(&outcome);
    outcome
}

/// Check that `source` is a supported media URL without running anything.
///
/// Submission paths use this to refuse bad URLs before creating a record.
pub fn validate_source(source: &str) -> Result<()> {
    tubewiki_transcript::extract_video_id(source).map(|_| ())
}
