//! TCP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌────────────────────────────────────────────────┐
//!   Client ─────────▶│ proxy listener ──▶ engine ──▶ strategy          │
//!                    │       │              │          │               │
//!                    │       ▼              ▼          ▼               │
//!   Backend ◀────────│   relay bytes    server pool ◀─ health monitor  │
//!                    │                      ▲                          │
//!                    │   admin API ─────────┘    config watcher        │
//!                    └────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use tcp_balancer::config::{load_config, watcher::ConfigWatcher, BalancerConfig};
use tcp_balancer::lifecycle::{self, signals, ConfigReloader, Shutdown};
use tcp_balancer::observability::{logging, metrics};
use tcp_balancer::StrategyKind;

#[derive(Parser)]
#[command(name = "tcp-balancer")]
#[command(about = "TCP load balancer with pluggable selection strategies", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured strategy.
    #[arg(short, long)]
    strategy: Option<StrategyKind>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BalancerConfig::default(),
    };
    let file_strategy = config.strategy.clone();
    if let Some(kind) = cli.strategy {
        config.strategy.kind = kind;
    }

    logging::init(config.observability.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tcp-balancer starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let services = lifecycle::start(&config, &shutdown).await?;

    // Keep the watcher alive for the life of the process
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let balancer = services.balancer.clone();
            let mut reloader = ConfigReloader::new(balancer.clone(), file_strategy);
            tokio::spawn(async move {
                while let Some(next) = updates.recv().await {
                    let change = reloader.apply(&next);
                    tracing::info!(
                        added = change.added.len(),
                        removed = change.removed.len(),
                        strategy = %balancer.strategy_kind(),
                        "Configuration reloaded"
                    );
                }
            });
            Some(handle)
        }
        None => None,
    };

    signals::wait_for_termination().await;
    shutdown.trigger();
    services.join().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
