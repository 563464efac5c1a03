//! CareLink connection-quality monitor
//!
//! Replays scripted network conditions through the degradation controller
//! and scores one-off statistics samples.
//!
//! ```text
//! carelink-monitor simulate --scenario demos/wifi-drop.toml --policy demos/policy.toml
//! carelink-monitor score --video-loss 3 --rtt 320
//! carelink-monitor score --report stats.json
//! ```

mod applier;
mod scenario;
mod simulate;

use std::path::PathBuf;

use anyhow::Context;
use carelink_infra_common::{
    LogContext, LoggingConfig, ResultExt, load_settings, log_welcome, parse_log_level,
    setup_logging,
};
use carelink_quality_core::{
    ControllerPolicy, QualityScore, QualityScorer, QualityTrend, StatsCollector, StatsReport,
    StatsSnapshot, Suggestion, SuggestionEngine,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{Instrument, Level, info};

use crate::scenario::Scenario;
use crate::simulate::RunOptions;

/// Environment prefix for policy overrides, e.g. `CARELINK_POLICY__COOLDOWN_MS`
const POLICY_ENV_PREFIX: &str = "CARELINK_POLICY";

#[derive(Parser, Debug)]
#[command(name = "carelink-monitor", version, about = "Connection-quality monitor for video consultations")]
struct Cli {
    /// Default log level
    #[arg(long, global = true, default_value = "info", env = "CARELINK_LOG_LEVEL")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a scenario through the degradation controller
    Simulate(SimulateArgs),
    /// Score a single statistics sample
    Score(ScoreArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Scenario TOML file
    #[arg(short, long)]
    scenario: PathBuf,

    /// Controller policy TOML file
    #[arg(short, long, env = "CARELINK_POLICY_FILE")]
    policy: Option<PathBuf>,

    /// Disable automatic mitigation
    #[arg(long)]
    manual: bool,

    /// Approve every suggestion the controller raises
    #[arg(long)]
    approve: bool,

    /// Poll on the wall clock instead of a simulated one
    #[arg(long)]
    realtime: bool,

    /// Only print the final summary
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// Raw statistics report (JSON map of records) instead of the flags below
    #[arg(long, conflicts_with_all = ["video_loss", "audio_loss", "frame_drop", "rtt", "video_jitter", "audio_jitter", "outgoing_bitrate"])]
    report: Option<PathBuf>,

    #[arg(long, default_value_t = 0.0)]
    video_loss: f64,

    #[arg(long, default_value_t = 0.0)]
    audio_loss: f64,

    #[arg(long, default_value_t = 0.0)]
    frame_drop: f64,

    /// Round-trip time in milliseconds
    #[arg(long, default_value_t = 0.0)]
    rtt: f64,

    #[arg(long, default_value_t = 0.0)]
    video_jitter: f64,

    #[arg(long, default_value_t = 0.0)]
    audio_jitter: f64,

    /// Outgoing bitrate in bits per second
    #[arg(long, default_value_t = 0.0)]
    outgoing_bitrate: f64,
}

#[derive(Debug, Serialize)]
struct ScoreOutput {
    #[serde(flatten)]
    score: QualityScore,
    suggestions: Vec<Suggestion>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = parse_log_level(&cli.log_level)?;
    setup_logging(&LoggingConfig::new(level, "carelink-monitor").with_json(cli.json_logs))?;
    log_welcome("carelink-monitor", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Simulate(args) => simulate(args).await,
        Command::Score(args) => score(args),
    }
}

async fn simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let scenario = Scenario::load(&args.scenario)?;

    // Both ResultExt and anyhow::Context provide with_context
    let mut policy: ControllerPolicy = ResultExt::with_context(
        load_settings(args.policy.as_deref(), POLICY_ENV_PREFIX),
        "cli",
        "load_policy",
    )?;
    if args.manual {
        policy = policy.with_auto_mode(false);
    }

    let context = LogContext::with_operation("cli", "simulate")
        .with_session(scenario.session_id.clone().unwrap_or_default())
        .with_field("scenario", scenario.name.clone())
        .with_field("cycles", scenario.total_cycles().to_string());
    info!("Running {}", context);

    let options = RunOptions {
        approve: args.approve,
        realtime: args.realtime,
        quiet: args.quiet,
    };
    let summary = simulate::run(&scenario, policy, options)
        .instrument(context.span(Level::INFO))
        .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("failed to render summary")?
    );
    Ok(())
}

fn score(args: ScoreArgs) -> anyhow::Result<()> {
    let snapshot = match &args.report {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read report {}", path.display()))?;
            StatsCollector::parse_report(&StatsReport::from_json(&json)?)
        }
        None => snapshot_from_flags(&args),
    };

    let score = QualityScorer::new().score(&snapshot);
    let suggestions = SuggestionEngine::new().evaluate(&snapshot, score.level, QualityTrend::Stable);

    let output = ScoreOutput { score, suggestions };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to render score")?
    );
    Ok(())
}

fn snapshot_from_flags(args: &ScoreArgs) -> StatsSnapshot {
    StatsSnapshot::builder()
        .video_loss_pct(args.video_loss)
        .audio_loss_pct(args.audio_loss)
        .frame_drop_pct(args.frame_drop)
        .rtt_ms(args.rtt)
        .video_jitter_ms(args.video_jitter)
        .audio_jitter_ms(args.audio_jitter)
        .outgoing_bitrate_bps(args.outgoing_bitrate)
        .build()
}
