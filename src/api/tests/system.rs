use super::*;
use crate::api::routes::event_name;
use crate::types::{Event, TaskId, TaskKind};

#[tokio::test]
async fn test_health_check() {
    let (app, _service, _temp_dir) = create_test_app(|_| {}).await;

    let response = get(&app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["active_tasks"], 0);
}

#[tokio::test]
async fn test_openapi_json_served() {
    let (app, _service, _temp_dir) = create_test_app(|_| {}).await;

    let response = get(&app, "/openapi.json").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/rest_download/{path}"].is_object());
}

#[tokio::test]
async fn test_swagger_ui_toggle() {
    let (app, _service, _temp_dir) = create_test_app(|_| {}).await;
    assert_ne!(get(&app, "/swagger-ui/").await.status(), StatusCode::NOT_FOUND);

    let (app, _service, _temp_dir) =
        create_test_app(|config| config.server.api.swagger_ui = false).await;
    assert_eq!(get(&app, "/swagger-ui/").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_events_endpoint_is_sse() {
    let (app, _service, _temp_dir) = create_test_app(|_| {}).await;

    let response = get(&app, "/events").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[axum::http::header::CONTENT_TYPE],
        "text/event-stream"
    );
}

#[test]
fn test_event_names_are_snake_case() {
    let task_id = TaskId::new();
    assert_eq!(
        event_name(&Event::TaskQueued {
            task_id,
            kind: TaskKind::Bag,
            resource_id: "r".to_string()
        }),
        "task_queued"
    );
    assert_eq!(
        event_name(&Event::ArtifactExpired {
            path: "zips/x.zip".to_string()
        }),
        "artifact_expired"
    );
    assert_eq!(event_name(&Event::Shutdown), "shutdown");
}
