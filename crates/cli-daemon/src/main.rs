//! CLI entry point for the HandBrake optimizer
//!
//! `run` starts the daemon; `analyze` probes one file and prints what the
//! daemon would do with it.

use clap::{Parser, Subcommand};
use handbrake_optimizer::{Config, Daemon, FfprobeProbe, MetadataProbe, SettingsRecommender};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "handbrake_optimizer=info,hb_optimizer=info";

/// HandBrake optimizer - recommends and runs HandBrakeCLI encodes for a media library
#[derive(Parser, Debug)]
#[command(name = "hb-optimizer")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon until Ctrl-C
    Run {
        /// Path to the configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip startup checks (HandBrakeCLI, ffprobe). For testing only.
        #[arg(long, default_value = "false")]
        skip_checks: bool,
    },
    /// Probe a file and print its analysis and recommended settings as JSON
    Analyze {
        /// Video file to analyze
        file: PathBuf,

        /// Path to the configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    handbrake_optimizer::load_config(path).map_err(|e| match path {
        Some(path) => format!("{}: {}", path.display(), e),
        None => e.to_string(),
    })
}

async fn run(config: Option<PathBuf>, skip_checks: bool) -> Result<(), String> {
    let daemon = Daemon::new(config.as_deref(), skip_checks)
        .map_err(|e| format!("Failed to initialize daemon: {}", e))?;

    info!(
        workers = daemon.concurrency_plan.workers,
        metrics = %daemon.config.metrics.bind,
        "Daemon initialized"
    );
    daemon
        .run_until_ctrl_c()
        .await
        .map_err(|e| format!("Daemon error: {}", e))
}

/// Probe and recommend without touching any on-disk state.
fn analyze(file: &Path, config: Option<PathBuf>) -> Result<(), String> {
    let config = load_config(config.as_deref())?;
    let meta = std::fs::metadata(file).map_err(|e| format!("{}: {}", file.display(), e))?;

    let probe = FfprobeProbe::new(config.encoder.ffprobe_path.clone());
    let probed = probe
        .probe(file)
        .map_err(|e| format!("probe failed: {}", e))?;
    let modified_ms = meta.modified().ok().map(handbrake_optimizer::models::system_time_ms);
    let analysis = probed.into_analysis(file, meta.len(), modified_ms);
    analysis.validate().map_err(|e| e.to_string())?;

    let recommender = SettingsRecommender::new(
        config.encoder.output_dir.clone(),
        config.encoder.handbrake_path.clone(),
    );
    let settings = recommender.recommend(&analysis).map_err(|e| e.to_string())?;

    let report = serde_json::json!({
        "analysis": analysis,
        "settings": settings,
    });
    let text = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let result = match args.command {
        Command::Run {
            config,
            skip_checks,
        } => run(config, skip_checks).await,
        Command::Analyze { file, config } => analyze(&file, config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
