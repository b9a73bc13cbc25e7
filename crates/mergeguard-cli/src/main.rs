//! MergeGuard CLI
//!
//! The `mergeguard` command scores change requests and applies low-risk ones.
//!
//! ## Commands
//!
//! - `score`: Score a change event and print the decision (no side effects)
//! - `apply`: Run the full pipeline for a change event
//! - `outcome`: Record the observed outcome of a decided revision
//! - `train`: Retrain the predictor from the outcome log
//! - `agent`: Run the integration agent for a change event
//! - `report`: Print an archived agent report
//! - `show`: Show the stored decision and ledger entry for a revision

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mergeguard_core::agent::{read_report, write_report};
use mergeguard_core::metrics::METRICS;
use mergeguard_core::telemetry::init_tracing;
use mergeguard_core::{
    Agent, AgentTask, ChangeEvent, Engine, EngineConfig, EngineStepRunner, Outcome,
    OutcomeFeedback, SourceControlHost, Stores,
};
use mergeguard_host::RecordingHost;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "mergeguard")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Risk-based change integration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Engine configuration file
    #[arg(
        long,
        global = true,
        env = "MERGEGUARD_CONFIG",
        default_value = ".mergeguard/config.toml"
    )]
    config: PathBuf,

    /// Storage URL (mem://, surrealkv://path, or a remote endpoint)
    #[arg(long, global = true, env = "MERGEGUARD_STORAGE_URL")]
    storage_url: Option<String>,

    /// Record host calls instead of sending them
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a change event without persisting or acting
    Score {
        /// Change event JSON file ("-" for stdin)
        #[arg(default_value = "-")]
        event: PathBuf,
    },

    /// Persist the decision for a change event and apply it
    Apply {
        /// Change event JSON file ("-" for stdin)
        #[arg(default_value = "-")]
        event: PathBuf,
    },

    /// Record the outcome of a decided revision
    Outcome {
        /// Revision the outcome belongs to
        revision: String,

        #[arg(value_enum)]
        result: OutcomeArg,
    },

    /// Retrain the predictor from the outcome log
    Train,

    /// Run the integration agent for a change event
    Agent {
        /// Change event JSON file ("-" for stdin)
        #[arg(default_value = "-")]
        event: PathBuf,

        /// Task id (random when omitted)
        #[arg(long)]
        task_id: Option<String>,

        /// Directory for archived agent reports
        #[arg(long, default_value = ".mergeguard/agent")]
        archive_dir: PathBuf,
    },

    /// Show an archived agent report
    Report {
        task_id: String,

        /// Directory for archived agent reports
        #[arg(long, default_value = ".mergeguard/agent")]
        archive_dir: PathBuf,
    },

    /// Show the stored decision and ledger entry for a revision
    Show {
        revision: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutcomeArg {
    Success,
    Failure,
}

impl From<OutcomeArg> for Outcome {
    fn from(arg: OutcomeArg) -> Self {
        match arg {
            OutcomeArg::Success => Outcome::Success,
            OutcomeArg::Failure => Outcome::Failure,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config = EngineConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config {:?}", cli.config))?;
    if let Some(url) = &cli.storage_url {
        config.storage.url = url.clone();
    }

    if let Commands::Report {
        task_id,
        archive_dir,
    } = &cli.command
    {
        return cmd_report(task_id, archive_dir);
    }

    let needs_host = matches!(cli.command, Commands::Apply { .. } | Commands::Agent { .. });
    let host = build_host(&config, cli.dry_run, needs_host)?;
    let stores = Stores::connect(&config.storage)
        .await
        .with_context(|| format!("Failed to open storage at {}", config.storage.url))?;
    let engine = Arc::new(Engine::new(&config, stores, host));

    let result = match cli.command {
        Commands::Score { event } => cmd_score(&engine, &event).await,
        Commands::Apply { event } => cmd_apply(&engine, &event).await,
        Commands::Outcome { revision, result } => {
            cmd_outcome(&engine, &revision, result.into()).await
        }
        Commands::Train => cmd_train(&engine).await,
        Commands::Agent {
            event,
            task_id,
            archive_dir,
        } => cmd_agent(&engine, &config, &event, task_id.as_deref(), &archive_dir).await,
        Commands::Show { revision } => cmd_show(&engine, &revision).await,
        Commands::Report { .. } => Ok(()), // handled before storage is opened
    };

    METRICS.flush();
    result
}

/// Pick the host implementation for this invocation.
fn build_host(
    config: &EngineConfig,
    dry_run: bool,
    needs_host: bool,
) -> Result<Arc<dyn SourceControlHost>> {
    if dry_run || !needs_host {
        return Ok(Arc::new(RecordingHost::new()));
    }
    if !config.host.is_configured() {
        bail!("No host configured: set [host].repository in the config or pass --dry-run");
    }
    let timeout = std::time::Duration::from_secs(config.executor.call_timeout_secs);
    let host = config
        .host
        .github_host(timeout)
        .context("Failed to build host client")?;
    Ok(Arc::new(host))
}

/// Read a change event from `path`, or stdin for `-`.
fn read_event(path: &Path) -> Result<ChangeEvent> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).context(format!("Failed to read event file: {:?}", path))?
    };
    serde_json::from_str(&text).context("Failed to parse change event JSON")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Train from whatever history exists so scoring sees the learned model.
async fn warm_start(engine: &Engine) {
    match engine.train().await {
        Ok(report) => debug!(
            model_version = report.model_version,
            records = report.records,
            "predictor warm start"
        ),
        Err(e) => warn!(error = %e, "predictor warm start failed; using rules only"),
    }
}

async fn cmd_score(engine: &Engine, event_path: &Path) -> Result<()> {
    let event = read_event(event_path)?;
    warm_start(engine).await;
    let evaluated = engine.evaluate(&event).context("Failed to score event")?;
    print_json(&evaluated.record())
}

async fn cmd_apply(engine: &Engine, event_path: &Path) -> Result<()> {
    let event = read_event(event_path)?;
    warm_start(engine).await;
    let outcome = engine.process(&event).await.context("Pipeline failed")?;
    info!(
        revision_id = %outcome.record.revision_id,
        status = outcome.execution.status.as_str(),
        "decision processed"
    );
    print_json(&outcome)
}

async fn cmd_outcome(engine: &Engine, revision: &str, outcome: Outcome) -> Result<()> {
    let record = engine
        .record_outcome(&OutcomeFeedback::new(revision, outcome))
        .await
        .context(format!("Failed to record outcome for {}", revision))?;
    println!(
        "Recorded {} for {} (score {}, strategy {})",
        record.outcome,
        record.revision_id(),
        record.assessment.score,
        record.decision.strategy
    );
    Ok(())
}

async fn cmd_train(engine: &Engine) -> Result<()> {
    let report = engine.train().await.context("Training failed")?;
    print_json(&report)
}

async fn cmd_agent(
    engine: &Arc<Engine>,
    config: &EngineConfig,
    event_path: &Path,
    task_id: Option<&str>,
    archive_dir: &Path,
) -> Result<()> {
    let event = read_event(event_path)?;
    warm_start(engine).await;

    let task = match task_id {
        Some(id) => AgentTask::with_id(id, event),
        None => AgentTask::new(event),
    };
    let agent = Agent::new(
        Arc::new(EngineStepRunner::new(engine.clone())),
        config.agent.clone(),
    );
    let report = agent.run(task).await.context("Agent run failed")?;
    let path = write_report(archive_dir, &report)?;
    info!(path = %path.display(), state = %report.final_state, "agent report archived");
    print_json(&report)
}

fn cmd_report(task_id: &str, archive_dir: &Path) -> Result<()> {
    let report = read_report(archive_dir, task_id)
        .context(format!("Failed to read agent report {}", task_id))?;
    print_json(&report)
}

#[derive(Serialize)]
struct ShowOutput {
    revision_id: String,
    decision: Option<mergeguard_core::DecisionRecord>,
    ledger: Option<mergeguard_state::AppliedRecord>,
}

async fn cmd_show(engine: &Engine, revision: &str) -> Result<()> {
    let decision = engine.decision(revision).await?.map(|e| e.record());
    let ledger = engine.stores().ledger.get(revision).await?;
    if decision.is_none() && ledger.is_none() {
        bail!("No decision recorded for revision {}", revision);
    }
    print_json(&ShowOutput {
        revision_id: revision.to_string(),
        decision,
        ledger,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mergeguard_core::{CiStatus, ExecutionStatus};

    fn event_file(dir: &Path, event: &ChangeEvent) -> PathBuf {
        let path = dir.join("event.json");
        std::fs::write(&path, serde_json::to_vec(event).unwrap()).unwrap();
        path
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mergeguard",
            "apply",
            "event.json",
            "--dry-run",
            "--storage-url",
            "mem://",
        ])
        .unwrap();
        assert!(cli.dry_run);
        assert_eq!(cli.storage_url.as_deref(), Some("mem://"));
        assert!(matches!(cli.command, Commands::Apply { .. }));
    }

    #[test]
    fn outcome_values_are_validated() {
        assert!(Cli::try_parse_from(["mergeguard", "outcome", "abc", "success"]).is_ok());
        assert!(Cli::try_parse_from(["mergeguard", "outcome", "abc", "maybe"]).is_err());
    }

    #[test]
    fn read_event_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = read_event(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse change event JSON"));
    }

    #[test]
    fn unconfigured_host_requires_dry_run() {
        let config = EngineConfig::default();
        assert!(build_host(&config, false, true).is_err());
        assert!(build_host(&config, true, true).is_ok());
        assert!(build_host(&config, false, false).is_ok());
    }

    #[tokio::test]
    async fn apply_then_show_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = event_file(
            dir.path(),
            &ChangeEvent::new("abc", 3, 10, 5).with_ci(CiStatus::Pass),
        );
        let engine = Engine::new(
            &EngineConfig::default(),
            Stores::in_memory(),
            Arc::new(RecordingHost::new()),
        );

        cmd_apply(&engine, &path).await.unwrap();
        let record = engine.stores().ledger.get("abc").await.unwrap().unwrap();
        let result: mergeguard_core::ExecutionResult =
            serde_json::from_value(record.result).unwrap();
        assert_eq!(result.status, ExecutionStatus::Applied);

        cmd_show(&engine, "abc").await.unwrap();
        assert!(cmd_show(&engine, "missing").await.is_err());
    }
}
