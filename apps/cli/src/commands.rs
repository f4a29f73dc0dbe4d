//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::{info, warn};

use posterpress_core::pipeline::{JobOutcome, JobReport, ProgressReporter, Step, input_bundle_key};
use posterpress_core::{CompilerInvoker, Pipeline, PipelineConfig, Worker};
use posterpress_shared::{
    AppConfig, InputBundle, Job, JobId, JobStatus, RenderMode, init_config, load_config,
    load_config_from,
};
use posterpress_storage::{FsObjectStore, JobDatabase, JobQueue, ObjectStore};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PosterPress: render poster jobs from a queue into PDFs.
#[derive(Parser)]
#[command(
    name = "posterpress",
    version,
    about = "Claim poster rendering jobs, compile them, and publish the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.posterpress/posterpress.toml).
    #[arg(long, global = true, env = "POSTERPRESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
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

/// Job mode accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum ModeArg {
    Preview,
    Final,
    Paid,
}

impl From<ModeArg> for RenderMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Preview => Self::Preview,
            ModeArg::Final => Self::Final,
            ModeArg::Paid => Self::Paid,
        }
    }
}

/// Job status filter accepted on the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum StatusArg {
    Queued,
    Claimed,
    Succeeded,
    Failed,
}

impl From<StatusArg> for JobStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Queued => Self::Queued,
            StatusArg::Claimed => Self::Claimed,
            StatusArg::Succeeded => Self::Succeeded,
            StatusArg::Failed => Self::Failed,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the worker loop until interrupted.
    Run,

    /// Process one queued job (or every queued job with --all) and exit.
    Once {
        /// Keep going until the queue is empty.
        #[arg(long)]
        all: bool,
    },

    /// Queue a rendering job.
    Submit {
        /// Owning project identifier.
        project_id: String,

        /// Template identifier.
        #[arg(short, long)]
        template: String,

        /// Rendering mode.
        #[arg(short, long, value_enum, default_value = "preview")]
        mode: ModeArg,

        /// Input bundle JSON to upload for the project before queueing.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show one job, or list recent jobs.
    Status {
        /// Job ID. Lists jobs when omitted.
        job_id: Option<String>,

        /// Only list jobs with this status.
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        /// Maximum number of jobs listed.
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Template management.
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Return jobs whose claim outlived the lease to the queue.
    RequeueStale {
        /// Lease in seconds (defaults to worker.claim_lease_secs).
        #[arg(long)]
        lease_secs: Option<u64>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Template subcommands.
#[derive(Subcommand)]
pub(crate) enum TemplateAction {
    /// Store a template source file under an identifier, replacing any previous one.
    Import {
        /// Template identifier.
        id: String,
        /// Path to the template source.
        file: PathBuf,
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
        0 => "posterpress=info",
        1 => "posterpress=debug",
        _ => "posterpress=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
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
        Command::Run => cmd_run(config_path).await,
        Command::Once { all } => cmd_once(config_path, all).await,
        Command::Submit {
            project_id,
            template,
            mode,
            input,
        } => cmd_submit(config_path, &project_id, &template, mode.into(), input.as_deref()).await,
        Command::Status {
            job_id,
            status,
            limit,
            json,
        } => cmd_status(config_path, job_id.as_deref(), status.map(Into::into), limit, json).await,
        Command::Template { action } => match action {
            TemplateAction::Import { id, file } => cmd_template_import(config_path, &id, &file).await,
        },
        Command::RequeueStale { lease_secs } => cmd_requeue_stale(config_path, lease_secs).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Startup helpers
// ---------------------------------------------------------------------------

/// Load the config from `--config` or the default location.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Load and validate the config, then open the job database read-write.
async fn open_database(path: Option<&Path>) -> Result<(AppConfig, Arc<JobDatabase>)> {
    let config = resolve_config(path)?;
    config.validate()?;
    let db = JobDatabase::open(&config.database.path)
        .await
        .wrap_err_with(|| format!("opening {}", config.database.path.display()))?;
    Ok((config, Arc::new(db)))
}

fn build_worker(
    config: &AppConfig,
    db: &Arc<JobDatabase>,
    reporter: Option<Arc<dyn ProgressReporter>>,
) -> Worker {
    let objects = Arc::new(FsObjectStore::new(config.storage.root.clone()));
    let mut pipeline = Pipeline::new(
        db.clone(),
        db.clone(),
        objects,
        CompilerInvoker::from(&config.compiler),
        PipelineConfig::from(config),
    );
    if let Some(reporter) = reporter {
        pipeline = pipeline.with_reporter(reporter);
    }
    Worker::from_config(db.clone(), pipeline, &config.worker)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>) -> Result<()> {
    let (config, db) = open_database(config_path).await?;
    let worker = build_worker(&config, &db, None);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, finishing current job"),
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
        let _ = shutdown_tx.send(true);
    });

    info!(
        database = %config.database.path.display(),
        objects = %config.storage.root.display(),
        compiler = %config.compiler.program,
        "starting worker"
    );
    let summary = worker.run(shutdown_rx).await;

    println!();
    println!("  Processed: {}", summary.processed);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed:    {}", summary.failed);
    if summary.unrecorded > 0 {
        println!("  Unrecorded outcomes: {}", summary.unrecorded);
    }
    println!();
    Ok(())
}

async fn cmd_once(config_path: Option<&Path>, all: bool) -> Result<()> {
    let (config, db) = open_database(config_path).await?;
    let reporter = Arc::new(CliProgress::new());
    let progress: Arc<dyn ProgressReporter> = reporter.clone();
    let worker = build_worker(&config, &db, Some(progress));

    if all {
        let summary = worker.drain().await?;
        reporter.clear();
        println!(
            "Processed {} job(s): {} succeeded, {} failed",
            summary.processed, summary.succeeded, summary.failed
        );
        return Ok(());
    }

    let report = worker.run_once().await?;
    reporter.clear();
    match report {
        None => println!("No queued jobs."),
        Some(report) => print_report(&report),
    }
    Ok(())
}

async fn cmd_submit(
    config_path: Option<&Path>,
    project_id: &str,
    template_id: &str,
    mode: RenderMode,
    input: Option<&Path>,
) -> Result<()> {
    let (config, db) = open_database(config_path).await?;

    if let Some(input) = input {
        let bytes = std::fs::read(input).wrap_err_with(|| format!("reading {}", input.display()))?;
        // Reject a malformed bundle here rather than as a failed job later.
        InputBundle::from_json(&bytes)?;
        let objects = FsObjectStore::new(config.storage.root.clone());
        let key = input_bundle_key(project_id);
        objects
            .put(&config.storage.input_bucket, &key, &bytes, "application/json")
            .await?;
        info!(key, "uploaded input bundle");
    }

    let id = db.enqueue_job(project_id, template_id, mode).await?;
    info!(%id, project_id, template_id, %mode, "queued job");
    println!("{id}");
    Ok(())
}

async fn cmd_status(
    config_path: Option<&Path>,
    job_id: Option<&str>,
    status: Option<JobStatus>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    if !config.database.path.exists() {
        return Err(eyre!(
            "no job database at '{}'; run `posterpress submit` or `posterpress run` first",
            config.database.path.display()
        ));
    }
    let db = JobDatabase::open_readonly(&config.database.path).await?;

    let jobs = match job_id {
        Some(raw) => {
            let id: JobId = raw.parse().map_err(|e| eyre!("invalid job id '{raw}': {e}"))?;
            let job = db
                .get_job(&id)
                .await?
                .ok_or_else(|| eyre!("job {id} not found"))?;
            vec![job]
        }
        None => db.list_jobs(status, limit).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs.");
    }
    for job in &jobs {
        print_job(job);
    }
    Ok(())
}

async fn cmd_template_import(config_path: Option<&Path>, id: &str, file: &Path) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("reading template {}", file.display()))?;
    let (_config, db) = open_database(config_path).await?;
    db.upsert_template(id, &source).await?;
    println!("Template '{id}' imported ({} bytes)", source.len());
    Ok(())
}

async fn cmd_requeue_stale(config_path: Option<&Path>, lease_secs: Option<u64>) -> Result<()> {
    let (config, db) = open_database(config_path).await?;
    let lease = Duration::from_secs(lease_secs.unwrap_or(config.worker.claim_lease_secs));
    let requeued = db.requeue_stale(lease).await?;
    println!("Requeued {requeued} job(s)");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_job(job: &Job) {
    println!(
        "{}  {:<9}  {:<7}  {}  ({})",
        job.id,
        job.status.as_str(),
        job.mode.as_str(),
        job.project_id,
        job.template_id
    );
    if let Some(code) = job.error_code {
        println!("    error: {code}");
    }
    if let Some(detail) = &job.error_detail {
        let first_line = detail.lines().next().unwrap_or_default();
        println!("    detail: {first_line}");
    }
    if let Some(paths) = &job.output_paths {
        println!("    pdf: {}", paths.pdf);
        if let Some(archive) = &paths.source_archive {
            println!("    sources: {archive}");
        }
    }
}

fn print_report(report: &JobReport) {
    println!();
    match &report.outcome {
        JobOutcome::Succeeded(paths) => {
            println!("  Job {} succeeded", report.job_id);
            println!("  PDF:     {}", paths.pdf);
            if let Some(archive) = &paths.source_archive {
                println!("  Sources: {archive}");
            }
        }
        JobOutcome::Failed(e) => {
            println!("  Job {} failed: {}", report.job_id, e.code);
            let first_line = e.message.lines().next().unwrap_or_default();
            println!("  Detail:  {first_line}");
        }
    }
    if !report.status_recorded {
        println!("  Warning: outcome could not be recorded; the job stays claimed");
    }
    println!("  Time:    {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("Waiting for a job");
        Self { spinner }
    }

    fn clear(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn step(&self, job_id: &JobId, step: Step) {
        let label = match step {
            Step::FetchInputs => "Fetching inputs",
            Step::Render => "Rendering template",
            Step::StageAssets => "Staging assets",
            Step::Compile => "Compiling",
            Step::PublishArtifact => "Publishing document",
            Step::PackageSources => "Packaging sources",
            Step::Report => "Recording outcome",
        };
        self.spinner.set_message(format!("{label} [{job_id}]"));
    }

    fn finished(&self, report: &JobReport) {
        let verdict = if report.succeeded() { "done" } else { "failed" };
        self.spinner
            .println(format!("{} {verdict}", report.job_id));
    }
}
