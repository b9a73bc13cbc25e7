//! MergeGuard daemon
//!
//! Reads change events and outcome feedback as newline-delimited JSON on
//! stdin, runs one pipeline per event, and writes results to stdout. The
//! background learner retrains as outcomes arrive.

mod serve;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mergeguard_core::metrics::METRICS;
use mergeguard_core::telemetry::init_tracing;
use mergeguard_core::{Engine, EngineConfig, PipelineCoordinator, SourceControlHost, Stores};
use mergeguard_host::RecordingHost;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "mergeguardd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stream change events through the MergeGuard pipeline", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Engine configuration file
    #[arg(long, env = "MERGEGUARD_CONFIG", default_value = ".mergeguard/config.toml")]
    config: PathBuf,

    /// Storage URL (mem://, surrealkv://path, or a remote endpoint)
    #[arg(long, env = "MERGEGUARD_STORAGE_URL")]
    storage_url: Option<String>,

    /// Record host calls instead of sending them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(args.json, level);

    let mut config = EngineConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config {:?}", args.config))?;
    if let Some(url) = args.storage_url {
        config.storage.url = url;
    }

    let host: Arc<dyn SourceControlHost> = if args.dry_run {
        Arc::new(RecordingHost::new())
    } else if config.host.is_configured() {
        let timeout = Duration::from_secs(config.executor.call_timeout_secs);
        Arc::new(config.host.github_host(timeout).context("Failed to build host client")?)
    } else {
        bail!("No host configured: set [host].repository in the config or pass --dry-run");
    };

    let stores = Stores::connect(&config.storage)
        .await
        .with_context(|| format!("Failed to open storage at {}", config.storage.url))?;
    let engine = Arc::new(Engine::new(&config, stores, host));

    match engine.train().await {
        Ok(report) => info!(
            model_version = report.model_version,
            records = report.records,
            "predictor ready"
        ),
        Err(e) => warn!(error = %e, "initial training failed; using rules only"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let learner = engine.learner().clone().spawn(shutdown_rx);
    let coordinator = Arc::new(PipelineCoordinator::new(engine));

    info!(storage = %config.storage.url, "mergeguardd started");
    let stdin = BufReader::new(tokio::io::stdin());
    let served = tokio::select! {
        result = serve::serve(coordinator, stdin, tokio::io::stdout()) => Some(result?),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            None
        }
    };

    shutdown_tx.send_replace(true);
    if let Err(e) = learner.await {
        warn!(error = %e, "learner task ended abnormally");
    }
    if let Some(stats) = served {
        info!(
            lines = stats.lines,
            decisions = stats.decisions,
            dropped = stats.dropped,
            outcomes = stats.outcomes,
            errors = stats.errors,
            "input drained"
        );
    }
    METRICS.flush();
    Ok(())
}
