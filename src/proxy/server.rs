//! Proxy server setup and initialization

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::logging::RequestLog;

use super::handlers::{health_handler, not_found_handler, responses_handler};
use super::sessions::SessionManager;
use super::state::ProxyState;

/// Build the router for a prepared state
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/v1/responses", post(responses_handler))
        .route("/responses", post(responses_handler))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

/// Start the proxy server
///
/// Runs until `shutdown_rx` fires (or its sender is dropped).
pub async fn start_proxy(
    config: Config,
    sessions: Arc<SessionManager>,
    request_log: RequestLog,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr = config.bind_addr;
    let state = ProxyState::from_config(&config, sessions.clone(), request_log)?;

    if config.access_token.is_none() {
        tracing::warn!("No access token configured; backend requests will be unauthenticated");
    }
    tracing::info!(
        mode = config.bridge_mode.as_str(),
        backend = %state.upstream_url,
        sessions = sessions.is_enabled(),
        "Bridge configured"
    );

    let app = router(state);

    tracing::info!("Starting proxy on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Proxy listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}
