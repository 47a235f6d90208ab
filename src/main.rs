use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use flotilla::{AppConfig, SimBroker, SimPriceFeed, SystemBuilder};

#[derive(Debug, Parser)]
#[command(name = "flotilla", about = "Multi-agent trading orchestrator")]
struct Cli {
    /// Configuration directory (default.toml + env-specific overrides)
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Execute approved opportunities without manual review
    #[arg(long)]
    auto_execute: bool,
}

fn init_tracing(cfg: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.logging.level.clone()));

    let (file_layer, guard) = match &cfg.logging.file_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "flotilla.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if cfg.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match AppConfig::load_from(&cli.config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "No usable configuration in {} ({e}); falling back to defaults",
                cli.config_dir
            );
            AppConfig::default_config()
        }
    };
    if cli.auto_execute {
        config.pipeline.auto_execute = true;
    }
    if let Err(errors) = config.validate() {
        anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
    }

    let _log_guard = init_tracing(&config);
    info!(
        "Starting flotilla (auto_execute={})",
        config.pipeline.auto_execute
    );
    if config.pipeline.auto_execute {
        warn!("Auto-execute is ON: approved opportunities trade without review");
    }

    // The binary runs against the simulated broker; live venue adapters and
    // the scanner/analyzer/ranker fleet plug in through `SystemBuilder`.
    let feed = SimPriceFeed::new();
    let broker = Arc::new(SimBroker::new(feed.clone()));
    let mut system = SystemBuilder::new(config, broker, feed).build().await;

    system.start_all().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    system.stop_all().await;
    Ok(())
}
