//! dq-controller - Detector Data-Quality Feedback Controller
//!
//! Reads detector frames, runs the configured quality checks, and writes
//! corrected acquisition parameters back to the detector.
//!
//! # Usage
//!
//! ```bash
//! # Closed loop against the built-in simulated detector
//! dq-controller --simulate
//!
//! # Frames from an external producer, writes logged only
//! frame-producer | dq-controller --stdin --dry-run
//!
//! # Replay a recorded feed
//! dq-controller --replay run42.jsonl --config controller.toml
//!
//! # Validate configuration and exit
//! dq-controller check-config --config controller.toml
//! ```
//!
//! # Environment Variables
//!
//! - `DQ_CONTROLLER_CONFIG`: Path to controller.toml (default: ./controller.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dq_controller::config::{ControllerConfig, FeedKind, SinkKind};
use dq_controller::pipeline::{
    FrameSource, PipelineController, PipelineSettings, ReplaySource, StdinSource, StopReason,
    TcpSource,
};
use dq_controller::registry::CheckRegistry;
use dq_controller::response::{LogSink, ProcessValueSink, TcpSink};
use dq_controller::simulation::SimulatedDetector;
use dq_controller::types::ACQ_TIME;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "dq-controller")]
#[command(about = "Detector data-quality feedback controller")]
#[command(version)]
struct CliArgs {
    /// Path to controller.toml (overrides the standard search order)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Read JSON-lines frames from stdin
    #[arg(long, conflicts_with_all = ["replay", "tcp", "simulate"])]
    stdin: bool,

    /// Replay a JSON-lines frame file
    #[arg(long, value_name = "FILE", conflicts_with_all = ["tcp", "simulate"])]
    replay: Option<PathBuf>,

    /// Connect to a JSON-lines frame server
    /// Example: dq-controller --tcp localhost:5555
    #[arg(long, value_name = "HOST:PORT", conflicts_with = "simulate")]
    tcp: Option<String>,

    /// Run against the built-in simulated detector
    #[arg(long)]
    simulate: bool,

    /// Delay between replayed frames in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Log corrective writes instead of performing them
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Validate the configuration, bounds and check registry, then exit
    CheckConfig,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

// ============================================================================
// Startup Helpers
// ============================================================================

fn load_config(args: &CliArgs) -> Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ControllerConfig::load(),
    };

    // CLI feed/sink flags win over the file
    if args.stdin {
        config.feed.kind = FeedKind::Stdin;
    } else if let Some(path) = &args.replay {
        config.feed.kind = FeedKind::File;
        config.feed.path = Some(path.clone());
    } else if let Some(addr) = &args.tcp {
        config.feed.kind = FeedKind::Tcp;
        config.feed.addr = Some(addr.clone());
    } else if args.simulate {
        config.feed.kind = FeedKind::Simulate;
    }
    if let Some(delay) = args.delay_ms {
        config.feed.delay_ms = delay;
    }
    if args.dry_run {
        config.sink.kind = SinkKind::Log;
    }

    config.validate()?;
    Ok(config)
}

fn acq_time_pv(config: &ControllerConfig) -> String {
    config.pvs.get(ACQ_TIME).cloned().unwrap_or_else(|| {
        format!("{}:cam1:AcquireTime", config.controller.detector)
    })
}

async fn build_sink(config: &ControllerConfig) -> Result<Arc<dyn ProcessValueSink>> {
    let sink: Arc<dyn ProcessValueSink> = match config.sink.kind {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Tcp => {
            let addr = config.sink.addr.as_deref().context("sink.addr is not set")?;
            let sink = TcpSink::connect(addr)
                .await
                .with_context(|| format!("Failed to connect to control gateway {addr}"))?;
            info!("🔌 Connected to control gateway at {}", addr);
            Arc::new(sink)
        }
    };
    Ok(sink)
}

/// Build the frame source and, for the simulated detector, its sink.
async fn build_source(
    config: &ControllerConfig,
    dry_run: bool,
) -> Result<(Box<dyn FrameSource>, Option<Arc<dyn ProcessValueSink>>)> {
    let pvs: Arc<HashMap<String, String>> = Arc::new(config.pvs.clone());
    let built: (Box<dyn FrameSource>, Option<Arc<dyn ProcessValueSink>>) = match config.feed.kind {
        FeedKind::Stdin => {
            info!("📡 Reading frames from stdin");
            (Box::new(StdinSource::stdin(pvs)), None)
        }
        FeedKind::File => {
            let path = config
                .feed
                .path
                .as_deref()
                .map(|p| config.resolve_path(p))
                .context("feed.path is not set")?;
            info!("📂 Replaying frames from {}", path.display());
            let source = ReplaySource::open(&path, pvs, config.feed.delay_ms)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            (Box::new(source), None)
        }
        FeedKind::Tcp => {
            let addr = config.feed.addr.as_deref().context("feed.addr is not set")?;
            let source = TcpSource::connect(addr, pvs).await?;
            info!("📡 Connected to frame server at {}", addr);
            (Box::new(source), None)
        }
        FeedKind::Simulate => {
            let detector =
                SimulatedDetector::new(acq_time_pv(config), config.simulation.initial_acq_time);
            info!(
                "🧪 Simulated detector {}x{} @ {} counts/px/s",
                config.simulation.rows, config.simulation.cols, config.simulation.mean_rate
            );
            let source = detector.source(&config.simulation);
            let sink: Option<Arc<dyn ProcessValueSink>> =
                (!dry_run).then(|| Arc::new(detector) as Arc<dyn ProcessValueSink>);
            (Box::new(source), sink)
        }
    };
    Ok(built)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let config = load_config(&args)?;
    let bounds = config.resolve_bounds()?;
    let registry = Arc::new(CheckRegistry::with_builtins());

    registry.validate(&config.checks.active, &bounds)?;

    if let Some(SubCommand::CheckConfig) = &args.command {
        info!("✅ Configuration OK");
        info!("   Detector:      {}", config.controller.detector);
        info!("   Active checks: {}", config.checks.active.join(", "));
        info!("   Bounds tables: {}", bounds.len());
        info!("   Cooldown:      {:.1}s", config.controller.cooldown_secs);
        info!("   Known checks:  {}", registry.ids().join(", "));
        return Ok(());
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  dq-controller - Detector Data-Quality Feedback Controller");
    info!("  Detector: {}", config.controller.detector);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");
    if config.checks.active.is_empty() {
        warn!("No active checks configured; frames will only be counted");
    }

    let (mut source, source_sink) = build_source(&config, args.dry_run).await?;
    let sink = match source_sink {
        Some(sink) => sink,
        None => build_sink(&config).await?,
    };

    let controller = PipelineController::new(
        PipelineSettings::from_config(&config),
        registry,
        bounds,
        sink,
    )?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let stats = controller.run(source.as_mut(), cancel_token).await;

    if let Some(StopReason::FeedError(e)) = &stats.stop_reason {
        bail!("Feed failed: {e}");
    }
    info!("✅ Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_replay_with_dry_run() {
        let args = CliArgs::parse_from(["dq-controller", "--replay", "feed.jsonl", "--dry-run"]);
        assert_eq!(args.replay, Some(PathBuf::from("feed.jsonl")));
        assert!(args.dry_run);
        assert!(args.command.is_none());
    }

    #[test]
    fn cli_rejects_two_feeds() {
        assert!(CliArgs::try_parse_from(["dq-controller", "--stdin", "--simulate"]).is_err());
    }

    #[test]
    fn cli_check_config_subcommand() {
        let args = CliArgs::parse_from(["dq-controller", "check-config", "--config", "c.toml"]);
        assert!(matches!(args.command, Some(SubCommand::CheckConfig)));
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn default_acq_time_pv_from_pvs_table() {
        let config = ControllerConfig::default();
        assert_eq!(acq_time_pv(&config), "13SIM1:cam1:AcquireTime");
    }
}
