//! HTTP Ingress Tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`.

mod support;

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

use support::{settings, MemoryStorage, MockFetcher, MockProvider};
use tilawa::adapters::LocalObjectStorage;
use tilawa::core::{ChannelEventBus, IngestLimits, WorkflowEvent};
use tilawa::domain::{JobStatus, ProductionStatus};
use tilawa::server::{make_app, ServerState};

const TOKEN: &str = "token-1";
const OTHER_TOKEN: &str = "token-2";
const BOUNDARY: &str = "tilawa-test-boundary";

struct TestServer {
    app: Router,
    rx: mpsc::Receiver<WorkflowEvent>,
    provider: Arc<MockProvider>,
    _dir: TempDir,
}

fn server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::default());

    let orchestrator = Arc::new(support::orchestrator(
        &dir.path().join("jobs"),
        provider.clone(),
        Arc::new(MemoryStorage::default()),
        Arc::new(MockFetcher::default()),
        settings(),
    ));
    let storage = Arc::new(LocalObjectStorage::new(
        dir.path().join("storage"),
        "recitations",
        "http://localhost:9000",
    ));
    let (bus, rx) = ChannelEventBus::new();

    let tokens = HashMap::from([
        (TOKEN.to_string(), "user-1".to_string()),
        (OTHER_TOKEN.to_string(), "user-2".to_string()),
    ]);
    let state = ServerState::new(
        orchestrator,
        storage,
        Arc::new(bus),
        IngestLimits::default(),
        tokens,
    );

    TestServer {
        app: make_app(state),
        rx,
        provider,
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn multipart_upload(filename: &str, content_type: &str, data: &[u8], preset: &str) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: {ct}\r\n\r\n",
            b = BOUNDARY,
            f = filename,
            ct = content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(
        format!(
            "\r\n--{b}\r\nContent-Disposition: form-data; name=\"enhancement\"\r\n\r\n{p}\r\n--{b}--\r\n",
            b = BOUNDARY,
            p = preset
        )
        .as_bytes(),
    );

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let s = server();
    let response = send(&s.app, get("/health", None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_user_routes_require_token() {
    let s = server();

    let response = send(&s.app, get("/api/upload/list", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Unauthorized");

    let response = send(&s.app, get("/api/upload/list", Some("nope"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_upload_stores_file_and_enqueues_job() {
    let mut s = server();
    let audio = vec![7u8; 2048];

    let response = send(
        &s.app,
        multipart_upload("al fatiha.mp3", "audio/mpeg", &audio, "mosque_light"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["productionId"], "prod-1");
    assert_eq!(body["file"]["size"], 2048);
    let path = body["file"]["path"].as_str().unwrap().to_string();
    assert!(path.starts_with("user-1/"));
    assert!(path.ends_with("-al_fatiha.mp3"));

    // Stored object is publicly readable
    let response = send(&s.app, get(&format!("/storage/recitations/{}", path), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "audio/mpeg"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 2048);

    // The job is queued for the worker
    let job_id = body["jobId"].as_str().unwrap().to_string();
    match s.rx.recv().await.unwrap() {
        WorkflowEvent::JobQueued { job_id: queued } => assert_eq!(queued.to_string(), job_id),
        other => panic!("unexpected event: {:?}", other),
    }

    // The provider saw the preset's reverb
    let requests = s.provider.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].algorithms.reverb.is_some());
    assert_eq!(s.provider.starts.load(Ordering::SeqCst), 1);

    // The owner can read the job; nobody else can
    let response = send(&s.app, get(&format!("/api/jobs/{}", job_id), Some(TOKEN))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    let status: JobStatus = serde_json::from_value(job["job"]["status"].clone()).unwrap();
    assert_eq!(status, JobStatus::AwaitingCompletion);

    let response = send(
        &s.app,
        get(&format!("/api/jobs/{}", job_id), Some(OTHER_TOKEN)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Listing shows the upload
    let response = send(&s.app, get("/api/upload/list", Some(TOKEN))).await;
    let files = body_json(response).await["files"].as_array().unwrap().len();
    assert_eq!(files, 1);
}

#[tokio::test]
async fn test_repeated_upload_of_same_file_succeeds() {
    let s = server();
    let audio = vec![3u8; 1024];

    let mut paths = Vec::new();
    for _ in 0..2 {
        let response = send(
            &s.app,
            multipart_upload("ikhlas.mp3", "audio/mpeg", &audio, "clean"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        paths.push(body["file"]["path"].as_str().unwrap().to_string());
    }

    assert_ne!(paths[0], paths[1]);
    let response = send(&s.app, get("/api/upload/list", Some(TOKEN))).await;
    assert_eq!(body_json(response).await["files"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_upload_rejects_non_audio() {
    let s = server();

    let response = send(
        &s.app,
        multipart_upload("clip.mp4", "video/mp4", &[0u8; 64], "studio"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["reason"], "InvalidMimeType");
    assert!(body["allowedTypes"]
        .as_array()
        .unwrap()
        .contains(&json!("audio/mpeg")));
}

#[tokio::test]
async fn test_signed_upload_round() {
    let s = server();

    let response = send(
        &s.app,
        post_json(
            "/api/upload/signed-url",
            Some(TOKEN),
            json!({ "filename": "baqarah.m4a", "contentType": "audio/m4a" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let signed = body_json(response).await;
    let token = signed["token"].as_str().unwrap().to_string();
    assert!(signed["signedUrl"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/storage/signed/{}", token)));

    let put = |token: &str| {
        Request::builder()
            .method("PUT")
            .uri(format!("/storage/signed/{}", token))
            .header(header::CONTENT_TYPE, "audio/m4a")
            .body(Body::from(vec![1u8; 512]))
            .unwrap()
    };

    let response = send(&s.app, put(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["path"], signed["path"]);

    // Tokens are single use
    let response = send(&s.app, put(&token)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_signed_url_rejects_bad_content_type() {
    let s = server();

    let response = send(
        &s.app,
        post_json(
            "/api/upload/signed-url",
            Some(TOKEN),
            json!({ "filename": "notes.txt", "contentType": "text/plain" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &s.app,
        post_json("/api/upload/signed-url", Some(TOKEN), json!({})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_acknowledges_and_forwards() {
    let mut s = server();

    let response = send(
        &s.app,
        post_json(
            "/api/auphonic/webhook",
            None,
            json!({
                "uuid": "prod-9",
                "status_string": "Done",
                "output_files": [{ "download_url": "https://provider.example/out/x.mp3" }]
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "success": true }));

    match s.rx.recv().await.unwrap() {
        WorkflowEvent::ProductionFinished {
            external_id,
            status,
            output_files,
        } => {
            assert_eq!(external_id, "prod-9");
            assert_eq!(status, ProductionStatus::Done);
            assert_eq!(output_files[0].url, "https://provider.example/out/x.mp3");
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_webhook_without_uuid_is_rejected() {
    let mut s = server();

    let response = send(
        &s.app,
        post_json("/api/auphonic/webhook", None, json!({ "status": 3 })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(s.rx.try_recv().is_err());
}

#[tokio::test]
async fn test_storage_rejects_other_bucket_and_traversal() {
    let s = server();

    let response = send(&s.app, get("/storage/other/user-1/a.mp3", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&s.app, get("/storage/recitations/user-1/missing.mp3", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
