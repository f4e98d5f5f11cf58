use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use reachmon::config::Config;
use reachmon::path::TcpProbe;
use reachmon::plugin::HighLossDetector;
use reachmon::types::PathStatus;
use reachmon::{BaselineModel, HttpUpdater, PathSource, ReachabilityEngine};

#[derive(Parser)]
#[command(name = "reachmon")]
#[command(author, version, about = "adaptive reachability and anomaly intelligence monitor")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start monitoring (stops on Ctrl-C)
    Run,

    /// One-shot connectivity check
    Check {
        /// Probe endpoint (overrides the configured target)
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run_monitor(config).await,
        Commands::Check { target } => check(config, target).await,
        Commands::GenConfig { output } => gen_config(output),
    }
}

async fn run_monitor(config: Config) -> Result<()> {
    let source = Arc::new(TcpProbe::new(config.probe.clone()));
    let mut engine = ReachabilityEngine::new(&config, source);

    // Built-in model learns the baseline online from every observed metric
    let model = Arc::new(BaselineModel::new(&config.detection));
    {
        let model = model.clone();
        engine.on_path_change(Box::new(move |metric| {
            model.observe(&metric.features());
        }));
    }
    engine.set_model(model);

    engine.add_plugin(Arc::new(HighLossDetector::new(
        config.detection.nominal_loss_pct,
    )));

    if let Some(dir) = &config.plugins.dir {
        let errors = engine.plugin_registry().load_from_dir(dir);
        if !errors.is_empty() {
            warn!("{} plugin(s) failed to load from {}", errors.len(), dir.display());
        }
    }

    if config.federated.enabled {
        let updater = HttpUpdater::new(&config.federated, config.general.device_tag.clone())
            .context("Failed to configure federated updater")?;
        engine.set_updater(Arc::new(updater));
    }

    engine.on_anomaly(Box::new(|score| {
        warn!("anomalous network conditions (threat score {:.2})", score);
    }));

    engine
        .start_monitoring()
        .await
        .context("Failed to start monitoring")?;
    info!("monitoring started, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    engine.stop_monitoring().await;
    Ok(())
}

async fn check(config: Config, target: Option<String>) -> Result<()> {
    let mut probe_config = config.probe;
    if let Some(target) = target {
        probe_config.target = target;
    }
    let target = probe_config.target.clone();

    let probe = TcpProbe::new(probe_config);
    let (tx, mut rx) = mpsc::channel(1);
    probe.start(tx).context("Failed to start probe")?;
    let event = rx
        .recv()
        .await
        .context("Probe produced no result")?;
    probe.cancel();

    match event.status {
        PathStatus::Satisfied => {
            let latency = event
                .latency_ms
                .map(|l| format!("{:.1}ms", l))
                .unwrap_or_else(|| "n/a".to_string());
            println!("reachable: {} ({})", target, latency);
        }
        PathStatus::Unsatisfied => {
            println!("unreachable: {}", target);
            std::process::exit(1);
        }
    }
    Ok(())
}

fn gen_config(output: Option<PathBuf>) -> Result<()> {
    let toml = Config::default().to_toml()?;
    match output {
        Some(path) => {
            std::fs::write(&path, toml)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
        }
        None => print!("{}", toml),
    }
    Ok(())
}
