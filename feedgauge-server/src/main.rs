use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use feedgauge_server::{ModeSetting, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "feedgauge-server")]
#[command(about = "Aggregates feed throughput reports and streams them to live viewers")]
struct Args {
    /// Path to a config file (TOML/JSON/YAML); CLI flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Ingestion policy
    #[arg(short, long, value_enum)]
    mode: Option<ModeSetting>,

    /// Points retained per series
    #[arg(long)]
    history_points: Option<usize>,

    /// Pull-mode aggregation tick in seconds
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Maximum concurrent viewers
    #[arg(long)]
    max_subscribers: Option<usize>,

    /// Directory for the history snapshot and sample logs
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Periodic history save cadence in seconds (0 = shutdown-only)
    #[arg(long)]
    save_secs: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(points) = self.history_points {
            config.history_points = points;
        }
        if let Some(tick) = self.tick_secs {
            config.tick_secs = tick;
        }
        if let Some(max) = self.max_subscribers {
            config.max_subscribers = max;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(secs) = self.save_secs {
            config.save_secs = secs;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Args::parse().into_config()?;
    let server = Server::bind(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                error!(error = %err, "failed to listen for interrupt");
                // Keep the sender alive; dropping it reads as a shutdown.
                std::future::pending::<()>().await;
            }
        }
    });

    server.run(shutdown_rx).await
}
