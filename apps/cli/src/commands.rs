//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use tubewiki_core::{JobOutcome, Pipeline, ProgressReporter, validate_source};
use tubewiki_executor::RetryPolicy;
use tubewiki_generation::{ChatCompletionsProvider, ContentGenerator};
use tubewiki_markdown::markdown_to_blocks;
use tubewiki_shared::{
    AppConfig, JobDescriptor, JobId, JobStatus, init_config, load_config, load_config_from,
    validate_api_key,
};
use tubewiki_sink::NotionSink;
use tubewiki_storage::Storage;
use tubewiki_transcript::{TimedTextProvider, TranscriptFetcher};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// TubeWiki: turn videos into study guides.
#[derive(Parser)]
#[command(
    name = "tubewiki",
    version,
    about = "Turn video transcripts into Markdown study guides and published documents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.tubewiki/tubewiki.toml.
    #[arg(long, env = "TUBEWIKI_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create a pending job for a video URL and print its id.
    Submit {
        /// Video URL.
        url: String,

        /// Owner identifier recorded on the job.
        #[arg(long, default_value = "local")]
        owner: String,
    },

    /// Run the pipeline for one job descriptor (JSON file, or `-` for stdin).
    Process {
        /// Path to the descriptor JSON.
        descriptor: String,
    },

    /// Print one job record as JSON.
    Show {
        /// Job id.
        id: i64,
    },

    /// List recent jobs, newest first.
    List {
        /// Only jobs in this status (pending, processing, completed, failed).
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of jobs to print.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Move a failed job back to pending so it can be processed again.
    Retry {
        /// Job id.
        id: i64,
    },

    /// Convert a Markdown file to content blocks and print them as JSON.
    Convert {
        /// Markdown file path.
        file: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tubewiki=info",
        1 => "tubewiki=debug",
        _ => "tubewiki=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so stdout stays machine-readable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Submit { url, owner } => cmd_submit(config_path, &url, &owner).await,
        Command::Process { descriptor } => cmd_process(config_path, &descriptor).await,
        Command::Show { id } => cmd_show(config_path, JobId(id)).await,
        Command::List { status, limit } => cmd_list(config_path, status.as_deref(), limit).await,
        Command::Retry { id } => cmd_retry(config_path, JobId(id)).await,
        Command::Convert { file } => cmd_convert(&file),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = config.database.resolved_path()?;
    let storage = Storage::open(&path)
        .await
        .wrap_err_with(|| format!("failed to open job database at {}", path.display()))?;
    Ok(storage)
}

/// Open the job database for inspection, without migrating or creating it.
async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    let path = config.database.resolved_path()?;
    let storage = Storage::open_readonly(&path)
        .await
        .wrap_err_with(|| format!("cannot read job database at {}", path.display()))?;
    Ok(storage)
}

/// Wire the pipeline's collaborators from config.
fn build_pipeline(config: &AppConfig, storage: Arc<Storage>) -> Result<Pipeline> {
    let captions = TimedTextProvider::new(&config.transcript.base_url)?;
    let transcripts = TranscriptFetcher::new(
        Arc::new(captions),
        RetryPolicy::from(&config.retry.transcript),
        config.transcript.languages.clone(),
    );

    let model = ChatCompletionsProvider::from_config(&config.generation)?;
    let generator = ContentGenerator::new(
        Arc::new(model),
        RetryPolicy::from(&config.retry.generation),
        RetryPolicy::from(&config.retry.diagram),
    )
    .with_limits(
        config.generation.max_transcript_chars,
        config.generation.max_diagram_chars,
    );

    let sink = NotionSink::from_config(&config.notion, RetryPolicy::from(&config.retry.sink))?;
    if !sink.has_token() {
        warn!(
            env = %config.notion.token_env,
            "notion token not set; jobs with a sink destination will fail"
        );
    }

    Ok(Pipeline::new(storage, transcripts, generator, Arc::new(sink))
        .with_stale_claim(Duration::from_secs(config.pipeline.stale_claim_secs)))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_submit(config_path: Option<&Path>, url: &str, owner: &str) -> Result<()> {
    validate_source(url)?;

    let config = resolve_config(config_path)?;
    let storage = open_storage(&config).await?;
    let record = storage.insert_job(owner, url).await?;

    info!(job_id = record.id.0, url, "job submitted");
    println!("{}", record.id);
    Ok(())
}

async fn cmd_process(config_path: Option<&Path>, source: &str) -> Result<()> {
    let body = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .wrap_err("failed to read descriptor from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source)
            .wrap_err_with(|| format!("failed to read descriptor '{source}'"))?
    };
    let descriptor = JobDescriptor::from_json(&body)?;

    let config = resolve_config(config_path)?;
    validate_api_key(&config)?;

    let storage = Arc::new(open_storage(&config).await?);
    let pipeline = build_pipeline(&config, storage)?;

    let reporter = CliProgress::new();
    let outcome = pipeline
        .process_with_progress(&descriptor, &reporter)
        .await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

async fn cmd_show(config_path: Option<&Path>, id: JobId) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = open_storage_readonly(&config).await?;

    let record = storage
        .get_job(id)
        .await?
        .ok_or_else(|| eyre!("job {id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_list(config_path: Option<&Path>, status: Option<&str>, limit: u32) -> Result<()> {
    let status = status.map(str::parse::<JobStatus>).transpose()?;

    let config = resolve_config(config_path)?;
    let storage = open_storage_readonly(&config).await?;
    let jobs = storage.list_jobs(status, limit).await?;

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    for job in jobs {
        println!(
            "{:>6}  {:<10}  {}  {}",
            job.id.0,
            job.status.as_str(),
            job.updated_at.format("%Y-%m-%d %H:%M:%S"),
            job.title.as_deref().unwrap_or(&job.source_ref),
        );
    }
    Ok(())
}

async fn cmd_retry(config_path: Option<&Path>, id: JobId) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = open_storage(&config).await?;

    if !storage.rearm_job(id).await? {
        return Err(eyre!("job {id} is not in the failed state"));
    }

    info!(job_id = id.0, "job re-armed");
    println!("Job {id} is pending again.");
    Ok(())
}

fn cmd_convert(file: &Path) -> Result<()> {
    let markdown = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;
    let blocks = markdown_to_blocks(&markdown);
    println!("{}", serde_json::to_string_pretty(&blocks)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner showing the current pipeline stage.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, outcome: &JobOutcome) {
        self.spinner.finish_and_clear();
        info!(job_id = outcome.job_id().0, "pipeline finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_list_filters() {
        let cli = Cli::parse_from(["tubewiki", "list", "--status", "failed", "--limit", "5"]);
        match cli.command {
            Command::List { status, limit } => {
                assert_eq!(status.as_deref(), Some("failed"));
                assert_eq!(limit, 5);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn verbosity_is_global() {
        let cli = Cli::parse_from(["tubewiki", "show", "7", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Show { id: 7 }));
    }
}
