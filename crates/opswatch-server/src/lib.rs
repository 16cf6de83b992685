//! opswatch server orchestration.
//!
//! [`Server`] ties the subscriber registry, broadcaster, tier cache, search
//! client, and engine proxies into one axum application and runs it until a
//! shutdown signal arrives.

pub mod api;
pub mod proxy;
pub mod search;
pub mod tiers;
pub mod views;
pub mod ws;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tracing::info;

use opswatch_core::config::OpswatchConfig;

/// The dashboard service.
pub struct Server {
    config: OpswatchConfig,
}

impl Server {
    pub fn new(config: OpswatchConfig) -> Self {
        Self { config }
    }

    /// Bind the listener and serve until SIGTERM/SIGINT.
    pub async fn run(self) -> Result<()> {
        let state = api::AppState::from_config(&self.config).context("building app state")?;
        let app = api::router(state);

        let addr: SocketAddr = self
            .config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {}", self.config.server.bind))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(addr = %addr, "dashboard API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("serving dashboard API")?;

        info!("server shut down");
        Ok(())
    }
}

/// Resolves when the process receives SIGTERM or SIGINT.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
            _ = sigint.recv() => info!("SIGINT received, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received, shutting down");
    }
}
