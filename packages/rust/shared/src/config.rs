//! Application configuration for TubeWiki.
//!
//! User config lives at `~/.tubewiki/tubewiki.toml`.
//! CLI flags override config file values, which override defaults.
//! Secrets are never stored in the file, only the names of the env vars
//! that hold them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TubeWikiError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tubewiki.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tubewiki";

// ---------------------------------------------------------------------------
// Config structs (matching tubewiki.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Text-generation provider settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Caption provider settings.
    #[serde(default)]
    pub transcript: TranscriptConfig,

    /// Document sink settings.
    #[serde(default)]
    pub notion: NotionConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Per-stage retry policies.
    #[serde(default)]
    pub retry: RetryPolicies,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL job database. A leading `~/` is expanded.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// The database path with `~/` expanded against the home directory.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

fn default_db_path() -> String {
    "~/.tubewiki/tubewiki.db".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// OpenAI-compatible API root.
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Transcript characters sent to content generation.
    #[serde(default = "default_max_transcript_chars")]
    pub max_transcript_chars: usize,

    /// Content characters sent to diagram generation.
    #[serde(default = "default_max_diagram_chars")]
    pub max_diagram_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_transcript_chars: default_max_transcript_chars(),
            max_diagram_chars: default_max_diagram_chars(),
        }
    }
}

fn default_generation_base_url() -> String {
    "https://api.groq.com/openai/v1".into()
}
fn default_model() -> String {
    "llama-3.3-70b-versatile".into()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".into()
}
fn default_max_transcript_chars() -> usize {
    15_000
}
fn default_max_diagram_chars() -> usize {
    5_000
}

/// `[transcript]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    /// Root of the timedtext caption endpoint.
    #[serde(default = "default_transcript_base_url")]
    pub base_url: String,

    /// Language preference order; the first entry is the preferred language.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            base_url: default_transcript_base_url(),
            languages: default_languages(),
        }
    }
}

fn default_transcript_base_url() -> String {
    "https://www.youtube.com".into()
}
fn default_languages() -> Vec<String> {
    vec!["ja".into(), "en".into(), "en-US".into()]
}

/// `[notion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionConfig {
    #[serde(default = "default_notion_base_url")]
    pub base_url: String,

    /// Name of the env var holding the integration token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Value of the `Notion-Version` header.
    #[serde(default = "default_notion_version")]
    pub notion_version: String,
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            base_url: default_notion_base_url(),
            token_env: default_token_env(),
            notion_version: default_notion_version(),
        }
    }
}

fn default_notion_base_url() -> String {
    "https://api.notion.com".into()
}
fn default_token_env() -> String {
    "NOTION_TOKEN".into()
}
fn default_notion_version() -> String {
    "2022-06-28".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// A `processing` record untouched for this long may be reclaimed by a
    /// redelivery (the previous worker is presumed dead).
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stale_claim_secs: default_stale_claim_secs(),
        }
    }
}

fn default_stale_claim_secs() -> u64 {
    900
}

/// One `[retry.<stage>]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Per-attempt wall-clock budget; absent means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_ms: Option<u64>,
}

/// `[retry]` section: one policy per external stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicies {
    #[serde(default = "default_transcript_retry")]
    pub transcript: RetryConfig,
    #[serde(default = "default_generation_retry")]
    pub generation: RetryConfig,
    #[serde(default = "default_diagram_retry")]
    pub diagram: RetryConfig,
    #[serde(default = "default_sink_retry")]
    pub sink: RetryConfig,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            transcript: default_transcript_retry(),
            generation: default_generation_retry(),
            diagram: default_diagram_retry(),
            sink: default_sink_retry(),
        }
    }
}

fn default_transcript_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 4,
        initial_delay_ms: 1_000,
        max_delay_ms: 60_000,
        backoff_factor: 2.0,
        attempt_timeout_ms: Some(30_000),
    }
}
fn default_generation_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 2_000,
        max_delay_ms: 60_000,
        backoff_factor: 2.0,
        attempt_timeout_ms: Some(120_000),
    }
}
fn default_diagram_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        initial_delay_ms: 1_000,
        max_delay_ms: 10_000,
        backoff_factor: 2.0,
        attempt_timeout_ms: Some(60_000),
    }
}
fn default_sink_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1_000,
        max_delay_ms: 30_000,
        backoff_factor: 2.0,
        attempt_timeout_ms: Some(30_000),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tubewiki/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| TubeWikiError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tubewiki/tubewiki.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TubeWikiError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TubeWikiError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TubeWikiError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TubeWikiError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TubeWikiError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the named env var. Empty values count as absent.
pub fn read_secret(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

/// Check that the generation API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.generation.api_key_env;
    match read_secret(var_name) {
        Some(_) => Ok(()),
        None => Err(TubeWikiError::config(format!(
            "generation API key not found. Set the {var_name} environment variable."
        ))),
    }
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| TubeWikiError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("GROQ_API_KEY"));
        assert!(toml_str.contains("NOTION_TOKEN"));
        assert!(toml_str.contains("[retry.transcript]"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.generation.max_transcript_chars, 15_000);
        assert_eq!(parsed.transcript.languages, vec!["ja", "en", "en-US"]);
        assert_eq!(parsed.retry.transcript.max_attempts, 4);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[generation]
model = "llama-3.1-8b-instant"

[retry.sink]
max_attempts = 5
initial_delay_ms = 10
max_delay_ms = 100
backoff_factor = 3.0
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.generation.model, "llama-3.1-8b-instant");
        assert_eq!(config.generation.api_key_env, "GROQ_API_KEY");
        assert_eq!(config.retry.sink.max_attempts, 5);
        assert_eq!(config.retry.sink.attempt_timeout_ms, None);
        assert_eq!(config.retry.generation, default_generation_retry());
        assert_eq!(config.pipeline.stale_claim_secs, 900);
    }

    #[test]
    fn home_expansion() {
        let db = DatabaseConfig {
            path: "/var/lib/tubewiki/jobs.db".into(),
        };
        assert_eq!(
            db.resolved_path().unwrap(),
            PathBuf::from("/var/lib/tubewiki/jobs.db")
        );
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.generation.api_key_env = "TW_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
