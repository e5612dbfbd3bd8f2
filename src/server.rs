//! Health endpoint.
//!
//! The only inbound surface: `GET /` returns a static message confirming the
//! background timers are running. Sync errors are visible in logs only.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tracing::info;

async fn health() -> &'static str {
    "Periodic synchronization in progress."
}

pub async fn serve_health(addr: SocketAddr) -> Result<()> {
    let app = Router::new().route("/", get(health));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding health endpoint to {addr}"))?;
    info!("health endpoint listening on {addr}");
    axum::serve(listener, app)
        .await
        .context("serving health endpoint")?;
    Ok(())
}
