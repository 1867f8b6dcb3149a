//! Public object access and signed direct uploads.
//!
//! - GET /storage/{bucket}/{*path} - read a stored object
//! - PUT /storage/signed/{token} - redeem a signed upload URL

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::adapters::{ObjectStorage, StorageError};
use crate::core::validation::mime_for_extension;

use super::state::ServerState;
use super::{error_response, validation_response};

fn content_type_for(path: &str) -> &'static str {
    path.rsplit_once('.')
        .and_then(|(_, ext)| mime_for_extension(ext))
        .unwrap_or("application/octet-stream")
}

/// GET /storage/{bucket}/{*path}
async fn get_object(
    State(state): State<ServerState>,
    Path((bucket, path)): Path<(String, String)>,
) -> Response {
    if bucket != state.storage.bucket() {
        return error_response(StatusCode::NOT_FOUND, "Object not found");
    }

    match state.storage.read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type_for(&path))], bytes).into_response(),
        Err(StorageError::NotFound(_)) | Err(StorageError::InvalidPath(_)) => {
            error_response(StatusCode::NOT_FOUND, "Object not found")
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Failed to read object");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read object")
        }
    }
}

/// PUT /storage/signed/{token}
async fn put_signed(
    State(state): State<ServerState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    if let Err(e) = state.limits.validate(&body, &content_type) {
        debug!(reason = e.reason(), "Signed upload rejected");
        return validation_response(&e, &state.limits);
    }

    match state
        .storage
        .redeem_signed_upload(&token, &body, &content_type)
        .await
    {
        Ok(object) => {
            info!(path = %object.path, size = body.len(), "Signed upload stored");
            Json(json!({ "path": object.path, "id": object.id })).into_response()
        }
        Err(StorageError::InvalidToken) => {
            error_response(StatusCode::FORBIDDEN, "Invalid or expired upload token")
        }
        Err(StorageError::AlreadyExists(_)) => {
            error_response(StatusCode::CONFLICT, "Object already exists")
        }
        Err(e) => {
            warn!(error = %e, "Signed upload failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed")
        }
    }
}

pub fn storage_routes(max_file_bytes: u64) -> Router<ServerState> {
    let body_limit = usize::try_from(max_file_bytes).unwrap_or(usize::MAX);

    let signed_route = Router::new()
        .route("/storage/signed/{token}", put(put_signed))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .merge(signed_route)
        .route("/storage/{bucket}/{*path}", get(get_object))
}
