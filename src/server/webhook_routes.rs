//! Provider callback route.
//!
//! The provider retries until it sees a 2xx, so the handler only parses the
//! payload, hands it to the bus and acknowledges. Duplicate and stale
//! deliveries are sorted out by the orchestrator.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::{error, info};

use crate::adapters::auphonic::ProductionPayload;
use crate::core::WorkflowEvent;

use super::error_response;
use super::state::ServerState;

/// POST /api/auphonic/webhook
async fn auphonic_webhook(
    State(state): State<ServerState>,
    Json(payload): Json<ProductionPayload>,
) -> Response {
    let Some(external_id) = payload.uuid.clone().filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing production uuid");
    };

    let production = payload.into_job(&external_id);
    info!(
        production = %external_id,
        status = %production.status,
        outputs = production.output_files.len(),
        "Provider webhook received"
    );

    let event = WorkflowEvent::ProductionFinished {
        external_id: production.external_id,
        status: production.status,
        output_files: production.output_files,
    };
    if let Err(e) = state.bus.send(event).await {
        error!(production = %external_id, error = %e, "Failed to forward webhook");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Webhook not accepted");
    }

    Json(json!({ "success": true })).into_response()
}

pub fn webhook_routes() -> Router<ServerState> {
    Router::new().route("/api/auphonic/webhook", post(auphonic_webhook))
}
