//! Live quiz session server.
//!
//! Run several instances against the same lock directory: exactly one of
//! them dispatches questions for each session at a time, and every client
//! connected to any instance's `/ws/{session_id}` receives that instance's
//! questions while it is master.
//!
//! Run with: cargo run -p quiz-server
//!
//! Environment: `QUIZ_BIND_ADDR`, `QUIZ_SESSION_IDS`, `QUIZ_LOCK_DIR`,
//! `QUIZ_QUESTION_INTERVAL`, `QUIZ_SEND_TIMEOUT`, `RUST_LOG`.

mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use live_session_coordinator::{SessionManager, lock::FileLockProvider};
use live_session_transport::{Broadcaster, ConnectionRegistry, websocket::create_ws_router};
use serde::Serialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<ConnectionRegistry>,
    manager: Arc<SessionManager>,
}

#[derive(Serialize)]
struct StatusResponse {
    session: String,
    clients: usize,
    is_master: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    let registry = Arc::new(ConnectionRegistry::new());
    let broadcaster =
        Broadcaster::new(Arc::clone(&registry)).with_send_timeout(config.send_timeout);
    let manager = Arc::new(SessionManager::new(
        Arc::new(FileLockProvider::new(config.lock_dir.clone())),
        Arc::new(broadcaster),
        config.master.clone(),
    ));

    for session_id in &config.session_ids {
        manager.start(session_id).await;
    }

    let state = AppState {
        registry: Arc::clone(&registry),
        manager: Arc::clone(&manager),
    };

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/status/{session_id}", get(status_handler))
        .with_state(state)
        .merge(create_ws_router(registry))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(
        lock_dir = %config.lock_dir.display(),
        "Server listening on http://{}",
        config.bind_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    manager.shutdown_all().await;
    tracing::info!("Session service shut down");
    Ok(())
}

async fn root_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "msg": "session service (ws) up",
        "sessions": state.manager.sessions().await,
    }))
}

async fn status_handler(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Json<StatusResponse> {
    let clients = state.registry.client_count(&session_id).await;
    let is_master = state.manager.is_master(&session_id).await;
    Json(StatusResponse {
        session: session_id,
        clients,
        is_master,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
