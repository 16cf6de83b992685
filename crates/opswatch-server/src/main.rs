//! opswatch server binary entry point.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use opswatch_core::config::OpswatchConfig;
use opswatch_server::Server;

/// opswatch - security-operations dashboard backend.
#[derive(Parser, Debug)]
#[command(name = "opswatch", version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "/etc/opswatch/config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Log level priority: OPSWATCH_LOG env var > info.
    let env_filter =
        EnvFilter::try_from_env("OPSWATCH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config =
        OpswatchConfig::load(Path::new(&args.config)).context("loading configuration")?;
    tracing::info!(config = %args.config, bind = %config.server.bind, "opswatch starting");

    Server::new(config).run().await
}
