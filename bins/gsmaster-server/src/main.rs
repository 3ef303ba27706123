//! Game-server master daemon
//!
//! Maintains the live directory of registered game servers, proves their
//! reachability through an independent verification socket, brokers NAT
//! hole punching between clients and NAT-encumbered servers, and issues
//! signed demo messages.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use gsmaster_core::{MasterConfig, MasterServer};

/// Game-server master daemon
#[derive(Parser)]
#[command(name = "gsmaster-server")]
#[command(author, version, about)]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the public listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => MasterConfig::load(path)
            .await
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => MasterConfig::default(),
    };
    if let Some(port) = cli.port {
        config.server_address.port = port;
    }
    config.validate().context("invalid configuration")?;

    info!("starting master server on port {}", config.server_address.port);

    let mut server = MasterServer::new(&config)
        .await
        .context("master startup failed")?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
