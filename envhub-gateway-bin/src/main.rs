//! envhub gateway: authenticated, rate-limited `/env-instance` front door.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use envhub_gateway_lib::{GatewayConfig, GatewayState, gateway_router};
use envhub_runtime::reaper::Reaper;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_log();
    let config = GatewayConfig::parse();

    let state = Arc::new(
        GatewayState::from_config(&config)
            .await
            .context("building gateway state")?,
    );

    let cancel = CancellationToken::new();
    let reaper = Reaper::spawn(
        state.backend.clone(),
        config.cleanup_interval,
        cancel.child_token(),
    );

    let app = gateway_router(state, config.request_timeout);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("envhub gateway listening on {addr}");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
            }
            shutdown.cancel();
        })
        .await
        .context("serving gateway")?;

    reaper.stop().await;
    Ok(())
}

fn setup_log() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};
    if tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .is_err()
    {}
}
