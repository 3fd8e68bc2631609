//! Job orchestration for TubeWiki.
//!
//! This crate ties transcript retrieval, study-guide generation, block
//! conversion and publishing into one idempotent per-job workflow
//! ([`Pipeline`]), persisted through a [`JobStore`].

pub mod pipeline;
pub mod store;

pub use pipeline::{
    DEFAULT_STALE_CLAIM, JobOutcome, Pipeline, ProgressReporter, SilentProgress, SkipReason,
    validate_source,
};
pub use store::{JobStore, MemoryJobStore};
