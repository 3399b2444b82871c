//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use subscout_core::pipeline::{ProgressReporter, ResearchPipeline};
use subscout_core::report;
use subscout_core::worker::ResearchService;
use subscout_shared::{
    AppConfig, JobId, JobStatus, JobView, Query, ResearchConfig, ResultRecord, init_config,
    load_config, validate_api_key,
};
use subscout_storage::{JobStore, LibsqlJobStore, MemoryJobStore};

/// How often the research command polls its job.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// subscout: find and rank subcontractors with verifiable evidence.
#[derive(Parser)]
#[command(
    name = "subscout",
    version,
    about = "Research, verify and rank subcontractors for a trade in a city.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Result output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Markdown table.
    Table,
    Json,
    Csv,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a research job and print the ranked results.
    Research {
        /// Trade to look for (e.g. mechanical, electrical, plumbing).
        #[arg(long)]
        trade: String,

        /// Target city.
        #[arg(long)]
        city: String,

        /// Two-letter state code.
        #[arg(long)]
        state: String,

        /// Minimum bonding capacity in dollars.
        #[arg(long, default_value_t = 0)]
        min_bond: u64,

        /// Relevance keyword (repeatable).
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,

        /// Output format.
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,

        /// Write results to a file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Inspect jobs in the persistent job store.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Job store subcommands.
#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Print one job as JSON.
    Show {
        /// Job id.
        id: String,
    },
    /// List jobs, oldest first.
    List {
        /// Only jobs with this status (queued, running, succeeded, failed).
        #[arg(long)]
        status: Option<String>,
    },
    /// Ask a queued or running job to stop.
    Cancel {
        /// Job id.
        id: String,
    },
    /// Fail jobs left running by a crashed process and run the queued ones.
    /// Only safe while no other subscout process uses the database.
    Recover,
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
        0 => "subscout=info",
        1 => "subscout=debug",
        _ => "subscout=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    match cli.command {
        Command::Research {
            trade,
            city,
            state,
            min_bond,
            keywords,
            format,
            out,
        } => {
            let query = Query::new(trade, city, state, min_bond, keywords)?;
            cmd_research(query, format, out.as_deref()).await
        }
        Command::Job { action } => match action {
            JobAction::Show { id } => cmd_job_show(&id).await,
            JobAction::List { status } => cmd_job_list(status.as_deref()).await,
            JobAction::Cancel { id } => cmd_job_cancel(&id).await,
            JobAction::Recover => cmd_job_recover().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// research
// ---------------------------------------------------------------------------

async fn cmd_research(query: Query, format: OutputFormat, out: Option<&Path>) -> Result<()> {
    // Credentials are checked before a job exists.
    let config = load_config()?;
    validate_api_key(&config)?;

    let spinner = new_spinner();
    let pipeline = ResearchPipeline::from_config(&config)?
        .with_progress(Arc::new(CliProgress {
            spinner: spinner.clone(),
        }));
    let store = open_store(&config).await?;
    let workers = ResearchConfig::from(&config).workers;
    // One-shot runs only work their own job; `job recover` handles leftovers.
    let service = ResearchService::start(store, pipeline, workers);

    let job = service.submit(query).await?;
    info!(
        job_id = %job.job_id,
        trade = %job.query.trade,
        city = %job.query.city,
        state = %job.query.state,
        "research job submitted"
    );
    spinner.set_message(format!("Queued job {}", job.job_id));

    let view = follow(&service, job.job_id).await;
    spinner.finish_and_clear();
    let view = view?;
    service.shutdown().await;

    match view.status {
        JobStatus::Succeeded => {
            let records = view.results.unwrap_or_default();
            emit(&records, format, out)?;
            eprintln!("{} candidates ranked (job {})", records.len(), view.job_id);
            Ok(())
        }
        _ => Err(eyre!(
            "job {} failed: {}",
            view.job_id,
            view.error.as_deref().unwrap_or("unknown error")
        )),
    }
}

/// Poll until the job is terminal. Ctrl-C requests cancellation once and
/// keeps polling so the job's final state is still reported.
async fn follow(service: &ResearchService, job_id: JobId) -> Result<JobView> {
    let mut cancel_sent = false;
    loop {
        let view = service.poll(job_id).await?;
        if view.status.is_terminal() {
            return Ok(view);
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            signal = tokio::signal::ctrl_c(), if !cancel_sent => {
                signal.wrap_err("failed to listen for ctrl-c")?;
                service.cancel(job_id).await?;
                cancel_sent = true;
                eprintln!("Cancelling job {job_id} at the next stage boundary...");
            }
        }
    }
}

fn emit(records: &[ResultRecord], format: OutputFormat, out: Option<&Path>) -> Result<()> {
    let rendered = match format {
        OutputFormat::Table => report::to_markdown(records),
        OutputFormat::Json => report::to_json(records)?,
        OutputFormat::Csv => report::to_csv(records)?,
    };

    match out {
        Some(path) => {
            std::fs::write(path, rendered)
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            eprintln!("Results written to {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

/// The configured libSQL store, or an in-memory one for a one-shot run.
async fn open_store(config: &AppConfig) -> Result<Arc<dyn JobStore>> {
    match &config.storage.database_path {
        Some(path) => Ok(Arc::new(open_database(path).await?)),
        None => Ok(Arc::new(MemoryJobStore::new())),
    }
}

async fn open_database(path: &str) -> Result<LibsqlJobStore> {
    let path = PathBuf::from(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(LibsqlJobStore::open(&path).await?)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn new_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Mirrors pipeline stages onto the terminal spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl ProgressReporter for CliProgress {
    fn phase(&self, _job_id: JobId, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn evidence_found(&self, _job_id: JobId, total: usize) {
        self.spinner
            .set_message(format!("Discovering evidence [{total} sources]"));
    }

    fn done(&self, _job_id: JobId, results: usize) {
        self.spinner.set_message(format!("Ranked {results} candidates"));
    }
}

// ---------------------------------------------------------------------------
// job
// ---------------------------------------------------------------------------

/// The persistent store named in the config; job commands have nothing to
/// read without one.
async fn persistent_store() -> Result<LibsqlJobStore> {
    let config = load_config()?;
    let path = config.storage.database_path.as_deref().ok_or_else(|| {
        eyre!("no job database configured: set [storage] database_path in the config file")
    })?;
    open_database(path).await
}

fn parse_job_id(id: &str) -> Result<JobId> {
    id.parse().map_err(|e| eyre!("invalid job id '{id}': {e}"))
}

async fn cmd_job_show(id: &str) -> Result<()> {
    let job_id = parse_job_id(id)?;
    let store = persistent_store().await?;
    let job = store.get(job_id).await?;
    println!("{}", serde_json::to_string_pretty(&JobView::from(&job))?);
    Ok(())
}

async fn cmd_job_list(status: Option<&str>) -> Result<()> {
    let status = status.map(str::parse::<JobStatus>).transpose()?;
    let store = persistent_store().await?;
    let jobs = store.list_by_status(status).await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!("{:<36}  {:<9}  {:<16}  QUERY", "JOB ID", "STATUS", "CREATED");
    for job in jobs {
        println!(
            "{:<36}  {:<9}  {:<16}  {} in {}, {}",
            job.job_id.to_string(),
            job.status.as_str(),
            job.created_at.format("%Y-%m-%d %H:%M").to_string(),
            job.query.trade,
            job.query.city,
            job.query.state,
        );
    }
    Ok(())
}

async fn cmd_job_cancel(id: &str) -> Result<()> {
    let job_id = parse_job_id(id)?;
    let store = persistent_store().await?;
    let job = store.request_cancel(job_id).await?;
    if job.status.is_terminal() {
        println!("Job {job_id} already finished ({}).", job.status);
    } else {
        println!("Cancellation requested for job {job_id} ({}).", job.status);
    }
    Ok(())
}

async fn cmd_job_recover() -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;
    let store: Arc<dyn JobStore> = Arc::new(persistent_store().await?);
    let pipeline = ResearchPipeline::from_config(&config)?;
    let workers = ResearchConfig::from(&config).workers;

    let service = ResearchService::start(store, pipeline, workers);
    let recovery = service.recover().await?;
    println!(
        "Marked {} interrupted job(s) failed, running {} queued job(s)...",
        recovery.interrupted, recovery.requeued
    );
    service.shutdown().await;
    println!("Done.");
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
