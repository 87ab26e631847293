#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use transmute_core::{App, AppBuilder, AppHandle, Intake, ServiceConfig};
use transmute_server::config::ServerConfig;
use transmute_server::router::build_app_router;
use transmute_server::state::AppState;

pub const UPLOAD_LIMIT: u64 = 16 * 1024;
const BOUNDARY: &str = "transmute-test-boundary";

/// Build a test `ServerConfig` with small limits and fast timers.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        storage_dir: PathBuf::from("unused"),
        ffmpeg_path: None,
        service: ServiceConfig {
            max_upload_bytes: UPLOAD_LIMIT,
            workers: 2,
            pop_timeout: Duration::from_millis(20),
            lease_check_interval: Duration::from_millis(20),
            ..ServiceConfig::default()
        },
    }
}

/// Wired app with in-memory stores and the built-in converters.
pub fn build_app(config: &ServerConfig) -> App {
    AppBuilder::new(config.service.clone())
        .with_builtin_converters()
        .unwrap()
        .build()
        .unwrap()
}

pub fn build_router(intake: Intake, config: ServerConfig) -> Router {
    let state = AppState {
        intake,
        config: Arc::new(config),
    };
    build_app_router(state).unwrap()
}

/// Router over a running app. Call `handle.shutdown()` at the end of the test.
pub fn build_test_app() -> (Router, AppHandle) {
    let config = test_config();
    let handle = build_app(&config).start();
    (build_router(handle.intake(), config), handle)
}

/// Router over an app whose workers never run, so jobs stay queued.
pub fn build_idle_app() -> (Router, App) {
    let config = test_config();
    let app = build_app(&config);
    (build_router(app.intake(), config), app)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        name: &'a str,
        filename: &'a str,
        data: &'a [u8],
    },
}

pub fn file<'a>(filename: &'a str, data: &'a [u8]) -> Part<'a> {
    Part::File {
        name: "file",
        filename,
        data,
    }
}

pub fn output_format(format: &str) -> Part<'_> {
    Part::Text("output_format", format)
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File {
                name,
                filename,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Submit a conversion and return the job id.
pub async fn submit(app: &Router, filename: &str, data: &[u8], format: &str) -> String {
    let response = send(
        app,
        multipart_request("/convert", &[file(filename, data), output_format(format)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    json["job_id"].as_str().unwrap().to_string()
}

/// Poll `/progress` until the job is finished or failed.
pub async fn wait_terminal(app: &Router, job_id: &str) -> serde_json::Value {
    let poll = async {
        loop {
            let json = body_json(get(app, &format!("/progress/{job_id}")).await).await;
            if json["status"] == "finished" || json["status"] == "failed" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), poll)
        .await
        .expect("job did not finish in time")
}
