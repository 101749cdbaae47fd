//! solo-relay: single-holder TCP relay.
//!
//! Forwards TCP connections to a fixed upstream while allowing only one
//! remote peer address at a time, and optionally serves an HTTP endpoint
//! reporting who currently holds the relay.

mod config;
mod relay;
mod status;
mod whois;

use anyhow::Context;
use clap::Parser;
use config::{RelayConfig, DEFAULT_SOCKET_BUFFER};
use relay::RelayEngine;
use solo_core::AccessGate;
use status::StatusState;
use std::sync::Arc;
use tracing::{error, info, warn};
use whois::TailscaleWhois;

/// solo-relay — one peer at a time TCP relay
#[derive(Parser, Debug)]
#[command(name = "solo-relay", version, about = "Single-holder TCP relay")]
struct Cli {
    /// Listen address (host:port)
    #[arg(long, env = "SOLO_FROM")]
    from: String,

    /// Upstream address (host:port)
    #[arg(long, env = "SOLO_TO")]
    to: String,

    /// Status endpoint address (host:port); disabled when empty
    #[arg(long, env = "SOLO_STATUS")]
    status: Option<String>,

    /// tailscale binary used to resolve holder identities
    #[arg(long, env = "SOLO_TAILSCALE", default_value = "tailscale")]
    tailscale: String,

    /// Socket send/receive buffer size in bytes (0 keeps OS defaults)
    #[arg(long, env = "SOLO_SOCKET_BUFFER", default_value_t = DEFAULT_SOCKET_BUFFER)]
    socket_buffer: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting solo-relay");

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "solo-relay failed");
        std::process::exit(1);
    }

    info!("solo-relay stopped");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RelayConfig::new(
        &cli.from,
        &cli.to,
        cli.status.as_deref(),
        &cli.tailscale,
        cli.socket_buffer,
    )
    .context("invalid configuration")?;

    let gate = Arc::new(AccessGate::new());

    let engine = RelayEngine::bind(&config, gate.clone())
        .await
        .with_context(|| format!("failed to listen on {}", config.listen_addr))?;

    let status = async {
        let Some(addr) = config.status_addr.as_deref() else {
            return std::future::pending::<anyhow::Result<()>>().await;
        };
        let resolver = TailscaleWhois::new(config.tailscale_bin.clone()).into_resolver();
        status::serve(addr, StatusState::new(gate.clone(), resolver))
            .await
            .with_context(|| format!("status endpoint on {addr} failed"))
    };

    tokio::select! {
        result = engine.run() => result.context("relay listener failed"),
        result = status => result,
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            Ok(())
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
