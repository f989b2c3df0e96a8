// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! HTTP surface: the operator channel under `/internal/*` and the
//! subscriber WebSocket channel at `/ws/:session_id`.

pub mod auth;
pub mod operator;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::registry::SessionRegistry;

/// How long shutdown waits for in-flight dispatch to drain after the HTTP
/// listener has stopped accepting connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OrchestratorConfig>,
    pub registry: SessionRegistry,
    pub shutdown: watch::Receiver<bool>,
}

pub async fn serve(config: Arc<OrchestratorConfig>, registry: SessionRegistry) -> anyhow::Result<()> {
    let bind = config.http.bind.clone();
    let max_body = config.http.max_body_bytes;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState {
        config,
        registry: registry.clone(),
        shutdown: shutdown_rx,
    };

    let operator_routes = Router::new()
        .route("/internal/init", post(operator::init))
        .route("/internal/prompt", post(operator::enqueue_prompt))
        .route("/internal/ws-token", post(operator::issue_ws_token))
        .route(
            "/internal/participants",
            get(operator::list_participants).post(operator::upsert_participant),
        )
        .route("/internal/messages", get(operator::list_messages))
        .route("/internal/events", get(operator::list_events))
        .route("/internal/state", get(operator::state))
        .route("/internal/sandbox-event", post(operator::sandbox_event))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_operator_secret,
        ));

    let app = Router::new()
        .merge(operator_routes)
        .route("/ws/:session_id", get(ws::ws_handler))
        .route("/sessions/:session_id/artifact", post(operator::upload_artifact))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!(%bind, "listening");
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    info!("http listener stopped, draining in-flight dispatch");
    registry.drain(DRAIN_TIMEOUT).await;
    Ok(())
}

/// Resolves once ctrl-c or SIGTERM is observed, and flips the shared
/// watch so every open subscriber connection closes with a normal close
/// frame instead of being dropped.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            std::future::pending::<()>().await;
            return;
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    warn!("shutdown signal received, closing subscriber connections");
    let _ = shutdown_tx.send(true);
}
