//! CLI command definitions for reviewd.
//!
//! Two commands: `serve` runs the daemon (WebSocket gateway plus queue
//! worker), `enqueue` pushes a test job onto the queue.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::gateway::{self, ConnectionRegistry, DEFAULT_BIND_ADDR};
use crate::llm::{
    GeminiReviewer, OpenAiReviewer, ProviderKind, ReviewerSet, DEFAULT_GEMINI_MODEL,
    DEFAULT_OPENAI_MODEL,
};
use crate::scheduler::{Job, JobQueue, Worker, WorkerConfig, WorkerStats};

/// Default Redis connection URL.
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default Redis list jobs are pushed to.
const DEFAULT_QUEUE: &str = "llm-queue";

/// Queue-driven LLM code review daemon.
#[derive(Parser)]
#[command(name = "reviewd")]
#[command(about = "Stream LLM code reviews from a Redis queue to WebSocket clients")]
#[command(version)]
#[command(
    long_about = "reviewd consumes review jobs from a Redis list and streams per-file\nreview results to the WebSocket connection each job names.\n\nExample usage:\n  reviewd serve --redis-url redis://localhost:6379 --bind 0.0.0.0:8081"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the review daemon: WebSocket gateway plus queue worker.
    Serve(ServeArgs),

    /// Push a review job onto the queue.
    ///
    /// Meant for smoke testing. Real producers enqueue jobs themselves
    /// using the connection id from the WebSocket hello message.
    Enqueue(EnqueueArgs),
}

/// Arguments for the serve command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Redis list jobs are consumed from.
    #[arg(long, default_value = DEFAULT_QUEUE)]
    pub queue: String,

    /// Address the WebSocket gateway listens on.
    #[arg(long, default_value = DEFAULT_BIND_ADDR)]
    pub bind: String,

    /// OpenAI API key. Jobs naming openai are rejected without it.
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    /// Override the OpenAI-compatible API base URL.
    #[arg(long, env = "OPENAI_API_BASE")]
    pub openai_api_base: Option<String>,

    /// OpenAI model used for reviews.
    #[arg(long, default_value = DEFAULT_OPENAI_MODEL)]
    pub openai_model: String,

    /// Gemini API key. Jobs naming gemini are rejected without it.
    #[arg(long, env = "GEMINI_API_KEY")]
    pub gemini_api_key: Option<String>,

    /// Override the Gemini API base URL.
    #[arg(long, env = "GEMINI_API_BASE")]
    pub gemini_api_base: Option<String>,

    /// Gemini model used for reviews.
    #[arg(long, default_value = DEFAULT_GEMINI_MODEL)]
    pub gemini_model: String,

    /// How long each queue poll blocks, in seconds.
    #[arg(long, default_value = "1")]
    pub poll_interval: u64,

    /// Skip requeueing jobs left in the processing list by a previous run.
    #[arg(long)]
    pub no_recover: bool,
}

/// Arguments for the enqueue command.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    pub redis_url: String,

    /// Redis list the job is pushed to.
    #[arg(long, default_value = DEFAULT_QUEUE)]
    pub queue: String,

    /// Provider to review with (openai or gemini).
    #[arg(short, long)]
    pub provider: String,

    /// Path to the project directory to review.
    #[arg(long)]
    pub path: String,

    /// Connection id of the WebSocket client receiving results.
    #[arg(long)]
    pub id: String,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the reviewd CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => {
            run_serve_command(args).await?;
        }
        Commands::Enqueue(args) => {
            run_enqueue_command(args).await?;
        }
    }
    Ok(())
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let queue = Arc::new(JobQueue::connect_with_retry(&args.redis_url, &args.queue).await?);
    info!(url = %args.redis_url, queue = %args.queue, "Connected to Redis");

    let registry = Arc::new(ConnectionRegistry::new());
    let reviewers = Arc::new(build_reviewers(&args));
    if reviewers.is_empty() {
        warn!("No provider API keys configured; every job will be rejected");
    }

    let (gateway_addr, gateway_task) = gateway::bind(&args.bind, Arc::clone(&registry)).await?;
    info!(addr = %gateway_addr, "WebSocket gateway listening");

    let config = WorkerConfig::default()
        .with_poll_interval(Duration::from_secs(args.poll_interval.max(1)))
        .with_recover_on_start(!args.no_recover);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let stats = Arc::new(WorkerStats::default());

    let worker = Worker::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&reviewers),
        config,
        shutdown_rx,
        Arc::clone(&stats),
    );
    let worker_task = tokio::spawn(worker.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Ignore send error - the worker may have already stopped
    let _ = shutdown_tx.send(());
    worker_task.await?;
    gateway_task.abort();

    let snapshot = stats.snapshot();
    info!(
        jobs_completed = snapshot.jobs_completed,
        jobs_failed = snapshot.jobs_failed,
        jobs_discarded = snapshot.jobs_discarded,
        files_reviewed = snapshot.files_reviewed,
        deliveries_dropped = snapshot.deliveries_dropped,
        "Worker statistics at shutdown"
    );

    Ok(())
}

/// Builds the provider set from whatever API keys are configured.
///
/// A missing key is normal for single-provider deployments; jobs naming
/// an unconfigured provider get an error result instead of a review.
fn build_reviewers(args: &ServeArgs) -> ReviewerSet {
    let mut reviewers = ReviewerSet::new();

    match args.openai_api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            let reviewer = match args.openai_api_base.as_deref() {
                Some(base) => OpenAiReviewer::with_custom_url(
                    key.to_string(),
                    base.to_string(),
                    args.openai_model.clone(),
                ),
                None => OpenAiReviewer::with_model(key.to_string(), args.openai_model.clone()),
            };
            info!(
                model = %args.openai_model,
                api_key = %reviewer.api_key_masked(),
                "OpenAI reviewer configured"
            );
            reviewers = reviewers.with_openai(Arc::new(reviewer));
        }
        Some(_) => warn!("OPENAI_API_KEY is set but empty; openai jobs will be rejected"),
        None => info!("OPENAI_API_KEY not set; openai jobs will be rejected"),
    }

    match args.gemini_api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => {
            let reviewer = match args.gemini_api_base.as_deref() {
                Some(base) => GeminiReviewer::with_custom_url(
                    key.to_string(),
                    base.to_string(),
                    args.gemini_model.clone(),
                ),
                None => GeminiReviewer::with_model(key.to_string(), args.gemini_model.clone()),
            };
            info!(
                model = %args.gemini_model,
                api_key = %reviewer.api_key_masked(),
                "Gemini reviewer configured"
            );
            reviewers = reviewers.with_gemini(Arc::new(reviewer));
        }
        Some(_) => warn!("GEMINI_API_KEY is set but empty; gemini jobs will be rejected"),
        None => info!("GEMINI_API_KEY not set; gemini jobs will be rejected"),
    }

    reviewers
}

async fn run_enqueue_command(args: EnqueueArgs) -> anyhow::Result<()> {
    let provider: ProviderKind = args.provider.parse()?;

    let job = Job::new(provider, &args.path, &args.id);
    job.validate()?;

    let queue = JobQueue::connect_with_retry(&args.redis_url, &args.queue).await?;
    queue.enqueue(&job).await?;

    println!(
        "Enqueued {} review of {} for connection {}",
        provider, args.path, args.id
    );
    Ok(())
}
