//! GetMyMusic Server - per-user music storage over TCP

use anyhow::{Context, Result};
use clap::Parser;
use getmymusic_server::{Config, Server};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "GetMyMusic server - user accounts and per-user file storage", long_about = None)]
struct Args {
    /// Configuration file path (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overrides the configuration file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.general.bind_port = port;
    }

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level in configuration")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting GetMyMusic server v{}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!("Loaded configuration from: {:?}", path),
        None => info!("No configuration file given, using defaults"),
    }
    info!("Storage root: {:?}", config.storage.data_dir);

    let server = Server::bind(&config).await?;
    server
        .run_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
}
