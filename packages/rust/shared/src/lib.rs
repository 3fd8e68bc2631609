//! Shared types, error model, and configuration for TubeWiki.
//!
//! This crate is the foundation depended on by all other TubeWiki crates.
//! It provides:
//! - [`TubeWikiError`] and [`ErrorKind`] - the unified error taxonomy
//! - Domain types ([`JobRecord`], [`JobDescriptor`], [`JobStatus`], [`JobId`])
//! - Configuration ([`AppConfig`], per-stage [`RetryConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, GenerationConfig, NotionConfig, PipelineConfig, RetryConfig,
    RetryPolicies, TranscriptConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, read_secret, validate_api_key,
};
pub use error::{ErrorKind, Result, TubeWikiError};
pub use types::{JobDescriptor, JobId, JobOptions, JobRecord, JobStatus};
