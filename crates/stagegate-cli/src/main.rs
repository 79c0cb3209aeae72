//! stagegate CLI - checkpointed pipelines with human review gates
//!
//! Usage:
//!   stagegate init                                 Write .stagegate/config.toml
//!   stagegate run --description <text>             Start a thread
//!   stagegate resume --thread <id> --approve       Answer a paused review
//!   stagegate recover --thread <id>                Finish an interrupted call
//!   stagegate status --thread <id>                 Show the latest checkpoint
//!   stagegate history --thread <id>                Show every checkpoint
//!   stagegate threads                              List known threads

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use serde_json::{json, Value};
use stagegate_core::{Approval, HumanDecision, StagegateConfig, StateMap};
use stagegate_orchestrator::{ActivityLogger, PipelineOrchestrator};
use stagegate_stages::standard_pipeline;
use stagegate_store::{FileStore, StateStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(author, version, about = "Checkpointed multi-stage pipelines with human review")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Repository root holding .stagegate/
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .stagegate/config.toml
    Init,

    /// Start a pipeline run
    Run {
        /// Thread id (a fresh UUID when omitted)
        #[arg(long)]
        thread: Option<String>,

        /// Project description handed to the first stage
        #[arg(long)]
        description: String,

        /// JSON object merged into the initial state
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,
    },

    /// Answer a thread paused for review
    #[command(group(
        ArgGroup::new("decision")
            .required(true)
            .args(["approve", "reject", "refine"])
    ))]
    Resume {
        /// Thread id
        #[arg(long)]
        thread: String,

        /// Approve the paused stage
        #[arg(long)]
        approve: bool,

        /// Reject the paused stage and stop the thread
        #[arg(long)]
        reject: bool,

        /// Re-run the paused stage with this feedback
        #[arg(long, value_name = "TEXT")]
        refine: Option<String>,

        /// Remark recorded with an approval or rejection
        #[arg(long)]
        feedback: Option<String>,

        /// Only apply if the latest checkpoint still has this sequence number
        #[arg(long, value_name = "SEQ")]
        at: Option<u64>,
    },

    /// Finish a run or resume that stopped before reaching a pause or end
    Recover {
        /// Thread id
        #[arg(long)]
        thread: String,
    },

    /// Show the latest checkpoint of a thread
    Status {
        #[arg(long)]
        thread: String,
    },

    /// Show every checkpoint of a thread
    History {
        #[arg(long)]
        thread: String,
    },

    /// List known threads
    Threads,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; stdout carries JSON, logs go to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init => cmd_init(&cli.root),
        Commands::Run {
            thread,
            description,
            input,
        } => cmd_run(&cli.root, thread, description, input).await,
        Commands::Resume {
            thread,
            approve,
            reject,
            refine,
            feedback,
            at,
        } => {
            let decision = decision_from_flags(approve, reject, refine, feedback)?;
            cmd_resume(&cli.root, &thread, decision, at).await
        }
        Commands::Recover { thread } => cmd_recover(&cli.root, &thread).await,
        Commands::Status { thread } => cmd_status(&cli.root, &thread).await,
        Commands::History { thread } => cmd_history(&cli.root, &thread).await,
        Commands::Threads => cmd_threads(&cli.root).await,
    }
}

/// Orchestrator over the file store configured for `root`
fn open(root: &Path) -> Result<PipelineOrchestrator<FileStore>> {
    let config = StagegateConfig::load_or_default(root)
        .context("Failed to load .stagegate/config.toml")?
        .resolve_paths(root);
    let definition = standard_pipeline(&config)?;
    let store = Arc::new(FileStore::new(&config.store_dir));

    let mut orchestrator = PipelineOrchestrator::new(definition, store);
    if let Some(dir) = &config.journal_dir {
        orchestrator = orchestrator.with_journal(ActivityLogger::new(dir));
    }
    Ok(orchestrator)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(root: &Path) -> Result<()> {
    let path = StagegateConfig::write_default(root).context("Failed to write config")?;
    let config = StagegateConfig::load_or_default(root)?.resolve_paths(root);
    std::fs::create_dir_all(&config.store_dir)
        .with_context(|| format!("Failed to create {}", config.store_dir.display()))?;

    info!("Initialized stagegate in {}", root.display());
    println!("Created:");
    println!("  {}", path.display());
    println!("  {}", config.store_dir.display());
    Ok(())
}

async fn cmd_run(
    root: &Path,
    thread: Option<String>,
    description: String,
    input: Option<PathBuf>,
) -> Result<()> {
    let extra = match &input {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };
    let initial_state = initial_state(description, extra.as_deref())?;
    let thread_id = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let orchestrator = open(root)?;
    let result = orchestrator
        .run(&thread_id, initial_state)
        .await
        .with_context(|| format!("Run of thread {} failed", thread_id))?;
    print_json(&result)
}

async fn cmd_resume(
    root: &Path,
    thread_id: &str,
    decision: HumanDecision,
    at: Option<u64>,
) -> Result<()> {
    let orchestrator = open(root)?;
    let result = match at {
        Some(sequence) => orchestrator.resume_at(thread_id, sequence, decision).await,
        None => orchestrator.resume(thread_id, decision).await,
    }
    .with_context(|| format!("Resume of thread {} failed", thread_id))?;
    print_json(&result)
}

async fn cmd_recover(root: &Path, thread_id: &str) -> Result<()> {
    let result = open(root)?
        .recover(thread_id)
        .await
        .with_context(|| format!("Recovery of thread {} failed", thread_id))?;
    print_json(&result)
}

async fn cmd_status(root: &Path, thread_id: &str) -> Result<()> {
    let result = open(root)?.status(thread_id).await?;
    print_json(&result)
}

async fn cmd_history(root: &Path, thread_id: &str) -> Result<()> {
    let history = open(root)?.history(thread_id).await?;
    print_json(&history)
}

async fn cmd_threads(root: &Path) -> Result<()> {
    let orchestrator = open(root)?;
    let mut summaries = Vec::new();
    for thread_id in orchestrator.store().threads().await? {
        let result = orchestrator.status(&thread_id).await?;
        summaries.push(json!({
            "thread_id": result.thread_id,
            "sequence_number": result.sequence_number,
            "status": result.status,
            "current_stage": result.current_stage,
        }));
    }
    print_json(&summaries)
}

/// Build the initial state from the description and an optional JSON object
///
/// `--description` wins over a `description` key in the input file.
fn initial_state(description: String, input: Option<&str>) -> Result<StateMap> {
    let mut state = match input {
        Some(content) => match serde_json::from_str::<Value>(content)
            .context("Input file is not valid JSON")?
        {
            Value::Object(map) => map,
            _ => bail!("Input file must contain a JSON object"),
        },
        None => StateMap::new(),
    };
    state.insert("description".into(), Value::String(description));
    Ok(state)
}

fn decision_from_flags(
    approve: bool,
    reject: bool,
    refine: Option<String>,
    feedback: Option<String>,
) -> Result<HumanDecision> {
    let decision = match (approve, reject, refine) {
        (true, false, None) => HumanDecision::new(Approval::Approved, feedback.unwrap_or_default()),
        (false, true, None) => HumanDecision::new(Approval::Rejected, feedback.unwrap_or_default()),
        (false, false, Some(text)) => {
            if feedback.is_some() {
                bail!("--feedback cannot be combined with --refine; put the feedback in --refine");
            }
            HumanDecision::refine(text)
        }
        _ => bail!("Pass exactly one of --approve, --reject or --refine"),
    };
    Ok(decision)
}
