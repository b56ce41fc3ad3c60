//! HTTP server exposing the sandbox
//!
//! `POST /run` takes an [`ExecutionRequest`] and answers with an
//! [`ExecutionResult`]; `GET /health` answers `OK`.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use coderun_sandbox::{CodeRunner, ExecutionRequest, ExecutionResult, SandboxError};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Create the sandbox router
pub fn create_router(runner: Arc<dyn CodeRunner>) -> Router {
    Router::new()
        .route("/run", post(handle_run))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(runner)
}

/// Serve on `listener` until `shutdown` resolves
pub async fn start_server(
    listener: tokio::net::TcpListener,
    runner: Arc<dyn CodeRunner>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let bind_addr = listener
        .local_addr()
        .context("Failed to obtain server bind address")?;
    info!(runtime = runner.name(), "Starting sandbox server on {}", bind_addr);

    axum::serve(listener, create_router(runner))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Sandbox server error")?;

    info!("Sandbox server stopped");
    Ok(())
}

async fn handle_run(
    State(runner): State<Arc<dyn CodeRunner>>,
    Json(request): Json<ExecutionRequest>,
) -> Response {
    match runner.run(request).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(SandboxError::InvalidInput(message)) => (
            StatusCode::BAD_REQUEST,
            Json(ExecutionResult::rejected(message)),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Sandbox failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn handle_health() -> &'static str {
    "OK"
}
