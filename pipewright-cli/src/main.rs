//! Pipewright CLI
//!
//! The `pipewright` command validates, plans and runs pipeline definitions.
//!
//! ## Commands
//!
//! - `validate`: Check a definition and report the first problem
//! - `plan`: Show which jobs a ref would run, stage by stage
//! - `run`: Execute a definition with local shell workers

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pipewright::errors::PipewrightError;
use pipewright::observability::{init_tracing, run_summary};
use pipewright::prelude::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staged CI pipeline orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline definition
    Validate {
        /// Path to the definition (YAML or JSON)
        file: PathBuf,
    },

    /// Show the execution plan for a ref
    Plan {
        /// Path to the definition (YAML or JSON)
        file: PathBuf,

        /// Branch or tag name
        #[arg(long = "ref", default_value = "main")]
        ref_name: String,

        /// Treat the ref as a tag
        #[arg(long)]
        tag: bool,

        /// Commit SHA used to expand cache keys
        #[arg(long, default_value = "0000000000000000000000000000000000000000")]
        sha: String,
    },

    /// Run a pipeline with local shell workers
    Run {
        /// Path to the definition (YAML or JSON)
        file: PathBuf,

        /// Branch or tag name
        #[arg(long = "ref")]
        ref_name: String,

        /// Commit SHA of the triggering push
        #[arg(long)]
        sha: String,

        /// Treat the ref as a tag
        #[arg(long)]
        tag: bool,

        /// Number of local workers
        #[arg(short, long, default_value = "2")]
        workers: usize,

        /// Tags carried by every local worker
        #[arg(long, value_delimiter = ',')]
        worker_tags: Vec<String>,

        /// Engine config file (YAML or JSON)
        #[arg(short, long, env = "PIPEWRIGHT_CONFIG")]
        config: Option<PathBuf>,

        /// Override the parallelism limit
        #[arg(long)]
        max_parallel_jobs: Option<usize>,

        /// Working directory for job scripts
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { file } => cmd_validate(&file, cli.json),
        Commands::Plan {
            file,
            ref_name,
            tag,
            sha,
        } => cmd_plan(&file, &trigger(ref_name, sha, tag)),
        Commands::Run {
            file,
            ref_name,
            sha,
            tag,
            workers,
            worker_tags,
            config,
            max_parallel_jobs,
            workdir,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(max) = max_parallel_jobs {
                config = config.with_max_parallel_jobs(max);
            }
            let mut executor = ShellExecutor::new();
            if let Some(dir) = workdir {
                executor = executor.with_working_dir(dir);
            }
            let tags: Vec<&str> = worker_tags.iter().map(String::as_str).collect();
            let pool = StaticWorkerPool::uniform(workers, &tags);

            cmd_run(
                &file,
                &trigger(ref_name, sha, tag),
                config,
                Arc::new(executor),
                Arc::new(pool),
                cli.json,
            )
            .await
        }
    }
}

fn trigger(ref_name: String, sha: String, tag: bool) -> Trigger {
    if tag {
        Trigger::tag(ref_name, sha)
    } else {
        Trigger::branch(ref_name, sha)
    }
}

/// Reads the config file if given, then overlays `PIPEWRIGHT_*` variables.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let base = match path {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            EngineConfig::from_document(&source)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    base.overlay(|name| std::env::var(format!("{}{name}", pipewright::config::ENV_PREFIX)).ok())
        .context("Invalid PIPEWRIGHT_* environment variable")
}

fn load_definition(store: &DescriptorStore, file: &Path) -> Result<Arc<PipelineDefinition>> {
    match store.load_file(file) {
        Ok(definition) => Ok(definition),
        Err(PipewrightError::Descriptor(e)) => {
            bail!("{}: [{}] {}\n  hint: {}", file.display(), e.code(), e, e.fix_hint())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", file.display())),
    }
}

fn cmd_validate(file: &Path, json: bool) -> Result<ExitCode> {
    let definition = load_definition(&DescriptorStore::new(), file)?;
    if json {
        let report = serde_json::json!({
            "valid": true,
            "pipeline": definition.name,
            "stages": definition.stages,
            "jobs": definition.job_count(),
            "digest": definition.digest,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: valid ({} stages, {} jobs)",
            definition.name,
            definition.stages.len(),
            definition.job_count()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_plan(file: &Path, trigger: &Trigger) -> Result<ExitCode> {
    let definition = load_definition(&DescriptorStore::new(), file)?;
    let plan = pipewright::plan::resolve(&definition, trigger);
    println!("{}", serde_json::to_string_pretty(&plan.to_json())?);
    Ok(ExitCode::SUCCESS)
}

/// Tells the user what happens to in-flight work once the run is canceled.
fn announce_cancellation(cancel: &CancellationToken) {
    cancel.on_cancel(|| {
        warn!("Run canceled, waiting for running jobs to finish");
        eprintln!("Canceling: pending jobs will not start, running jobs finish first");
    });
}

async fn cmd_run(
    file: &Path,
    trigger: &Trigger,
    config: EngineConfig,
    executor: Arc<dyn JobExecutor>,
    workers: Arc<dyn WorkerPool>,
    json: bool,
) -> Result<ExitCode> {
    let engine = Engine::new(config, executor, workers)
        .context("Invalid engine configuration")?
        .with_event_sink(Arc::new(LoggingEventSink::debug()));
    let definition = load_definition(engine.store(), file)?;

    let cancel = Arc::new(CancellationToken::new());
    announce_cancellation(&cancel);
    let on_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel("interrupted");
        }
    });

    info!(pipeline = %definition.name, ref_name = %trigger.ref_name, "Starting run");
    let result = engine.run(&definition, trigger, &cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&run_summary(&result))?);
    } else {
        for job in &result.jobs {
            let detail = job
                .failure
                .as_ref()
                .map(ToString::to_string)
                .or_else(|| job.reason.clone())
                .unwrap_or_default();
            println!(
                "{:<24} {:<10} {:>8}ms  {}",
                job.name,
                job.status.to_string(),
                job.duration_ms,
                detail
            );
        }
        for warning in &result.warnings {
            println!("warning: {warning}");
        }
        println!("{}: {} in {}ms", result.pipeline, result.outcome, result.duration_ms);
    }

    Ok(if result.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
