//! Upload ingress routes.
//!
//! - POST /api/upload - validate, store and enqueue an audio file
//! - POST /api/upload/signed-url - reserve a path for a direct upload
//! - GET /api/upload/list - the caller's stored files
//! - GET /api/upload/allowed-types - accepted audio types
//! - GET /api/jobs/{id} - job state
//! - POST /api/jobs/{id}/poll - ask the provider about a waiting job

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{ObjectInfo, ObjectStorage, SignedUpload};
use crate::core::validation::mime_for_extension;
use crate::core::{ValidationError, WorkflowEvent};
use crate::domain::{EnhancementPreset, NewJob, UploadJob};

use super::session::AuthUser;
use super::state::ServerState;
use super::{error_response, validation_response};

/// Multipart overhead allowed on top of the file size limit
const MULTIPART_HEADROOM: usize = 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct UploadedFile {
    pub path: String,
    pub url: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub file: UploadedFile,
    pub production_id: Option<String>,
    pub job_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlBody {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub files: Vec<ObjectInfo>,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job: UploadJob,
}

struct FilePart {
    filename: String,
    content_type: Option<String>,
    data: Vec<u8>,
}

/// Keep a client filename safe to use as the last path segment
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `{user}/{epoch millis}-{nonce}-{filename}`
fn object_path(user_id: &str, filename: &str) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}-{}-{}",
        user_id,
        Utc::now().timestamp_millis(),
        &nonce[..8],
        sanitize_filename(filename)
    )
}

/// Declared content type, falling back to the file extension
fn resolve_mime(part: &FilePart) -> String {
    match part.content_type.as_deref() {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => part
            .filename
            .rsplit_once('.')
            .and_then(|(_, ext)| mime_for_extension(ext))
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

/// POST /api/upload
async fn upload_file(
    user: AuthUser,
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> Response {
    let mut file: Option<FilePart> = None;
    let mut enhancement: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read multipart body: {}", e);
                return error_response(e.status(), "Failed to read upload");
            }
        };

        match field.name().unwrap_or("") {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => {
                        file = Some(FilePart {
                            filename,
                            content_type,
                            data: bytes.to_vec(),
                        })
                    }
                    Err(e) => {
                        warn!("Failed to read file data: {}", e);
                        return error_response(e.status(), "Failed to read file");
                    }
                }
            }
            "enhancement" => {
                if let Ok(value) = field.text().await {
                    let value = value.trim().to_string();
                    if !value.is_empty() {
                        enhancement = Some(value);
                    }
                }
            }
            _ => {}
        }
    }

    let Some(file) = file else {
        return error_response(StatusCode::BAD_REQUEST, "No file uploaded");
    };

    let mime_type = resolve_mime(&file);
    let validated = match state.limits.validate(&file.data, &mime_type) {
        Ok(v) => v,
        Err(e) => {
            info!(user = %user.user_id, reason = e.reason(), "Upload rejected");
            return validation_response(&e, &state.limits);
        }
    };

    let path = object_path(&user.user_id, &file.filename);
    if let Err(e) = state
        .storage
        .upload(&path, &file.data, &validated.mime_type)
        .await
    {
        error!(path = %path, error = %e, "Failed to store upload");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed");
    }
    let url = state.storage.public_url(&path);

    let preset = enhancement
        .as_deref()
        .map(EnhancementPreset::parse)
        .unwrap_or_default();

    let job = match state
        .orchestrator
        .create_job(NewJob {
            user_id: user.user_id.clone(),
            raw_file_path: path.clone(),
            source_url: url.clone(),
            title: file.filename.clone(),
            mime_type: validated.mime_type.clone(),
            size_bytes: validated.size_bytes,
            estimated_duration_sec: validated.estimated_duration_sec,
            preset,
        })
        .await
    {
        Ok(job) => job,
        Err(e) => {
            error!(path = %path, error = %e, "Failed to create job");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Upload failed");
        }
    };

    let production_id = match state.orchestrator.begin(job.id).await {
        Ok(job) => job.external_job_id,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Enhancement step deferred");
            None
        }
    };

    if let Err(e) = state.bus.send(WorkflowEvent::JobQueued { job_id: job.id }).await {
        error!(job_id = %job.id, error = %e, "Failed to enqueue job");
    }

    info!(
        job_id = %job.id,
        user = %user.user_id,
        size = validated.size_bytes,
        "Upload accepted"
    );

    Json(UploadResponse {
        success: true,
        file: UploadedFile {
            path,
            url,
            size: validated.size_bytes,
        },
        production_id,
        job_id: job.id,
    })
    .into_response()
}

/// POST /api/upload/signed-url
async fn create_signed_url(
    user: AuthUser,
    State(state): State<ServerState>,
    Json(body): Json<SignedUrlBody>,
) -> Response {
    let Some(filename) = body.filename.filter(|f| !f.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Filename required");
    };

    if let Some(content_type) = body.content_type.as_deref() {
        if !state.limits.is_allowed(content_type) {
            let e = ValidationError::InvalidMimeType {
                mime_type: content_type.to_string(),
            };
            return validation_response(&e, &state.limits);
        }
    }

    let path = object_path(&user.user_id, &filename);
    match state.storage.create_signed_upload_url(&path).await {
        Ok(signed) => {
            debug!(path = %signed.path, "Issued signed upload URL");
            Json::<SignedUpload>(signed).into_response()
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to create signed URL");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate signed URL",
            )
        }
    }
}

/// GET /api/upload/list
async fn list_uploads(user: AuthUser, State(state): State<ServerState>) -> Response {
    match state.storage.list(&user.user_id).await {
        Ok(files) => Json(ListResponse { files }).into_response(),
        Err(e) => {
            error!(user = %user.user_id, error = %e, "Failed to list files");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list files")
        }
    }
}

/// Load a job the caller owns
async fn owned_job(state: &ServerState, user: &AuthUser, id: &str) -> Result<UploadJob, Response> {
    let job_id = Uuid::parse_str(id)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid job id"))?;

    match state.orchestrator.get_job(job_id).await {
        Ok(job) if job.user_id == user.user_id => Ok(job),
        Ok(_) => Err(error_response(StatusCode::NOT_FOUND, "Job not found")),
        Err(e) => {
            debug!(%job_id, error = %e, "Job lookup failed");
            Err(error_response(StatusCode::NOT_FOUND, "Job not found"))
        }
    }
}

/// GET /api/jobs/{id}
async fn get_job(
    user: AuthUser,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    match owned_job(&state, &user, &id).await {
        Ok(job) => Json(JobResponse { job }).into_response(),
        Err(response) => response,
    }
}

/// POST /api/jobs/{id}/poll
async fn poll_job(
    user: AuthUser,
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    let job = match owned_job(&state, &user, &id).await {
        Ok(job) => job,
        Err(response) => return response,
    };

    let outcome = match state.orchestrator.poll(job.id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(job_id = %job.id, error = %e, "Poll failed");
            return error_response(StatusCode::BAD_GATEWAY, "Provider status unavailable");
        }
    };
    debug!(job_id = %job.id, ?outcome, "Polled job");

    match state.orchestrator.get_job(job.id).await {
        Ok(job) => Json(JobResponse { job }).into_response(),
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Failed to reload job");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load job")
        }
    }
}

/// GET /api/upload/allowed-types
async fn allowed_types(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(json!({
        "allowedTypes": state.limits.allowed_mime_types,
        "maxFileSize": state.limits.max_file_bytes,
    }))
}

pub fn upload_routes(max_file_bytes: u64) -> Router<ServerState> {
    let body_limit = usize::try_from(max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_HEADROOM);

    let upload_route = Router::new()
        .route("/api/upload", post(upload_file))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .merge(upload_route)
        .route("/api/upload/signed-url", post(create_signed_url))
        .route("/api/upload/list", get(list_uploads))
        .route("/api/upload/allowed-types", get(allowed_types))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/poll", post(poll_job))
}
