//! HTTP/SSE transport for the BA assistant.
//!
//! Chat turns are streamed as server-sent events, wrapped by the
//! [`heartbeat`] multiplexer. Out-of-process agents call tools back through
//! `/api/agent-tools/{tool}`.

pub mod error;
pub mod heartbeat;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use ba_core::config::Config;
use ba_core::DocumentStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/threads/{thread_id}/chat", post(routes::chat::chat))
        .route("/api/agent-tools/{tool}", post(routes::agent_tools::call_tool))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the server on `config.server.port` and run until Ctrl-C.
///
/// The warm pool (CLI backend only) is started once the port is bound and
/// stopped after the server has drained.
pub async fn serve(config: &Config, store: Arc<dyn DocumentStore>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port)).await?;
    let state = AppState::from_config(config, store)?;
    if let Some(pool) = &state.pool {
        pool.start(config.pool.size);
    }
    serve_on(state, listener).await
}

/// Run the server on a pre-bound listener until Ctrl-C.
pub async fn serve_on(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let port = listener.local_addr()?.port();
    let pool = state.pool.clone();
    tracing::info!(
        port,
        provider = state.orchestrator.adapter().name(),
        model = state.orchestrator.adapter().model(),
        "BA assistant listening on http://localhost:{port}"
    );

    let result = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(pool) = pool {
        pool.stop().await;
    }
    result?;
    Ok(())
}

/// Serve the router in a background task with no shutdown signal of its own.
///
/// Used by one-off turns that still need the tool callback route reachable.
/// Abort the handle to stop it; the caller owns the pool.
pub fn spawn_on(
    state: AppState,
    listener: tokio::net::TcpListener,
) -> tokio::task::JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move { axum::serve(listener, build_router(state)).await })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
