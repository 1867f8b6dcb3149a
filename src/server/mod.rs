//! HTTP ingress.
//!
//! User routes authenticate with a bearer token mapped to a user id in
//! configuration. The provider webhook and public storage reads are open.

mod session;
mod state;
mod storage_routes;
mod upload_routes;
mod webhook_routes;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::core::{IngestLimits, ValidationError};

pub use session::{AuthError, AuthUser};
pub use state::ServerState;
pub use upload_routes::sanitize_filename;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// 413 for oversize uploads, 400 for everything else, with the limit hit
pub(crate) fn validation_response(e: &ValidationError, limits: &IngestLimits) -> Response {
    let (status, body) = match e {
        ValidationError::InvalidMimeType { .. } => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": e.to_string(),
                "reason": e.reason(),
                "allowedTypes": limits.allowed_mime_types,
            }),
        ),
        ValidationError::FileTooLarge { actual, limit } => (
            StatusCode::PAYLOAD_TOO_LARGE,
            json!({
                "error": e.to_string(),
                "reason": e.reason(),
                "maxSize": limit,
                "receivedSize": actual,
            }),
        ),
        ValidationError::TooLong {
            estimated_seconds,
            limit_seconds,
        } => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": e.to_string(),
                "reason": e.reason(),
                "maxDuration": limit_seconds,
                "estimatedDuration": estimated_seconds.round(),
            }),
        ),
    };
    (status, Json(body)).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub fn make_app(state: ServerState) -> Router {
    let max_file_bytes = state.limits.max_file_bytes;

    Router::new()
        .route("/health", get(health))
        .merge(upload_routes::upload_routes(max_file_bytes))
        .merge(webhook_routes::webhook_routes())
        .merge(storage_routes::storage_routes(max_file_bytes))
        .with_state(state)
}

pub async fn run_server(state: ServerState, bind: &str) -> Result<()> {
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(address = %bind, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(_) => std::future::pending::<()>().await,
    }
}
