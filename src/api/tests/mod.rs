use super::*;
use crate::pipeline::test_helpers::{create_test_service_with, put, seed_resource};
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

mod system;

/// Router over a fresh service; the tempdir must be kept alive
async fn create_test_app(
    tweak: impl FnOnce(&mut Config),
) -> (Router, Arc<DownloadService>, tempfile::TempDir) {
    let (service, temp_dir) = create_test_service_with(tweak).await;
    let config = Arc::new(service.config().clone());
    let app = create_router(service.clone(), config);
    (app, service, temp_dir)
}

async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_with(app: &Router, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let (service, _temp_dir) = create_test_service_with(|_| {}).await;
    let mut config = service.config().clone();
    config.server.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let config = Arc::new(config);

    let api_handle = tokio::spawn({
        let service = service.clone();
        let config = config.clone();
        async move { start_api_server(service, config).await }
    });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished());
    api_handle.abort();
}

#[tokio::test]
async fn test_cors_headers_present_when_enabled() {
    let (app, _service, _temp_dir) = create_test_app(|_| {}).await;
    let response = get_with(&app, "/health", &[("Origin", "http://example.com")]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_headers_absent_when_disabled() {
    let (app, _service, _temp_dir) =
        create_test_app(|config| config.server.api.cors_enabled = false).await;
    let response = get_with(&app, "/health", &[("Origin", "http://example.com")]).await;
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_api_key_guards_downloads() {
    let (app, service, _temp_dir) =
        create_test_app(|config| config.server.api.api_key = Some("s3cret".to_string())).await;
    seed_resource(&service, "res1", true).await;
    put(&service, "res1/data/contents/myfile.txt", b"hello").await;

    let response = get(&app, "/download/res1/data/contents/myfile.txt").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get_with(
        &app,
        "/download/res1/data/contents/myfile.txt",
        &[("X-Api-Key", "s3cret")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(get(&app, "/health").await.status(), StatusCode::OK);
}
