mod config;
mod db;
mod hub;
mod presence;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::RelayConfig;
use crate::db::CanvasDb;
use crate::hub::{CanvasStore, SessionRegistry};
use crate::presence::PresenceStore;
use crate::ws::RelayState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    let db = Arc::new(CanvasDb::open(&config.db_path).with_context(|| {
        format!("failed to open canvas db at {}", config.db_path.display())
    })?);
    let registry = Arc::new(SessionRegistry::default());
    let canvases = Arc::new(CanvasStore::default());
    let presence = Arc::new(PresenceStore::default());

    // Heartbeat expiry is the authoritative absence signal: sweep and
    // broadcast departures for peers whose lastSeen fell behind.
    tokio::spawn(presence::run_expiry_sweep(
        presence.clone(),
        registry.clone(),
        config.presence_timeout_ms,
        config.presence_sweep_interval_ms,
    ));

    let state = RelayState {
        registry,
        canvases,
        presence,
        db,
        presence_timeout_ms: config.presence_timeout_ms,
    };
    let app = build_router(state);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting relay server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(ws::router(state))
        .layer(CorsLayer::permissive())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
