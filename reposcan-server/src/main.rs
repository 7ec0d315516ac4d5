//! # Reposcan
//!
//! Asynchronous repository security scanning.
//!
//! One binary, three roles:
//!
//! - `api`: HTTP surface for repositories and scans, the result-topic
//!   consumer and the stale-scan reaper
//! - `execution`: the request-topic dispatcher and the scan worker pool
//! - `migrate`: apply database migrations and exit
//!
//! Roles share PostgreSQL and two Redis streams; run as many processes of
//! each as needed.

mod errors;
mod handlers;
mod roles;
mod routes;
mod state;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reposcan_config::{ConfigLoad, ConfigLoader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "reposcan")]
#[command(about = "Asynchronous repository security scanning")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "REPOSCAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API and apply scan results
    Api {
        /// Server port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Server host (overrides config)
        #[arg(long)]
        host: Option<String>,
    },
    /// Dispatch scan requests and run scan workers
    Execution,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load before tracing so a RUST_LOG from .env is honoured.
    let load = load_config(cli.config.as_ref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,reposcan=debug,reposcan_core=debug,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    for warning in &load.warnings {
        warn!("{warning}");
    }
    if load.config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &load.config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }
    let mut config = load.config;

    match cli.command {
        Command::Migrate => roles::migrate(&config).await,
        Command::Api { port, host } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            roles::api::run(&config, shutdown_on_ctrl_c()).await
        }
        Command::Execution => roles::execution::run(&config, shutdown_on_ctrl_c()).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ConfigLoad> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_config_path(path);
    }
    loader.load().context("failed to load configuration")
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c; shutting down"),
        }
        trigger.cancel();
    });
    token
}
