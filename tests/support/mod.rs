#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use smash_cloud::{
    config::Settings,
    db::{open_in_memory, seed_defaults},
    router, AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const ADMIN_EMAIL: &str = "admin@smash.cloud";
pub const ADMIN_PASSWORD: &str = "admin123";

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    // Held so the directories outlive the app.
    pub dir: TempDir,
}

/// Settings whose upstreams point at a closed local port.
pub fn offline_settings(dir: &TempDir) -> Settings {
    let nowhere = "http://127.0.0.1:9".to_string();
    Settings {
        static_dir: dir.path().join("static"),
        storage_dir: dir.path().join("files"),
        ollama_host: nowhere.clone(),
        whisper_host: nowhere.clone(),
        piper_host: nowhere,
        upstream_timeout: Duration::from_secs(2),
        health_timeout: Duration::from_millis(500),
        ..Settings::default()
    }
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut Settings)) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = offline_settings(&dir);
    configure(&mut settings);

    let db = open_in_memory().expect("in-memory db");
    seed_defaults(&db, &settings).await.expect("seed");
    let state = AppState::new(settings, db).expect("state");
    TestApp {
        app: router(state.clone()),
        state,
        dir,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Serves the router on an ephemeral local port for clients that need a
/// real socket, such as WebSocket tests.
pub async fn serve(app: &Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = app.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

pub async fn send_request(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));
    (status, body)
}

pub async fn send_raw(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, headers, body.to_vec())
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

pub fn delete_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request")
}

const BOUNDARY: &str = "smash-test-boundary";

/// A single-file `multipart/form-data` request.
pub fn multipart_request(uri: &str, token: Option<&str>, field: &str, filename: &str, data: &[u8]) -> Request<Body> {
    multipart_files(uri, token, &[(field, filename, data)])
}

/// A `multipart/form-data` request with one part per `(field, filename, data)`.
pub fn multipart_files(uri: &str, token: Option<&str>, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (field, filename, data) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n").as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"));
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).expect("request")
}

pub async fn login(app: &Router, email: &str, password: &str) -> String {
    let (status, body) = send_request(
        app,
        json_request("POST", "/api/auth/login", None, json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["token"].as_str().expect("token").to_string()
}

pub async fn admin_token(app: &Router) -> String {
    login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await
}
