//! Task polling handlers.

use super::TaskStatusResponse;
use crate::api::AppState;
use crate::error::DownloadError;
use crate::types::{TaskId, TaskStatus};
use crate::{Error, Result};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /task_status/:task_id - Poll a background build (interactive)
#[utoipa::path(
    get,
    path = "/task_status/{task_id}",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Task id from the landing-page redirect")),
    responses(
        (status = 200, description = "Pending (status null) or succeeded (status \"true\")", body = TaskStatusResponse),
        (status = 404, description = "Unknown task", body = crate::error::ApiError),
        (status = 500, description = "Task failed (status \"false\")", body = TaskStatusResponse)
    )
)]
pub async fn task_status(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match poll(&state, &task_id).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// GET /rest_task_status/:task_id - Poll a background build (REST)
#[utoipa::path(
    get,
    path = "/rest_task_status/{task_id}",
    tag = "tasks",
    params(("task_id" = String, Path, description = "Task id from a not-ready response")),
    responses(
        (status = 200, description = "Pending (status null) or succeeded (status \"true\")", body = TaskStatusResponse),
        (status = 404, description = "Unknown task", body = crate::error::ApiError),
        (status = 500, description = "Task failed (status \"false\")", body = TaskStatusResponse)
    )
)]
pub async fn rest_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    match poll(&state, &task_id).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn poll(state: &AppState, raw_task_id: &str) -> Result<Response> {
    let task_id: TaskId = raw_task_id.parse().map_err(|_| {
        Error::Download(DownloadError::TaskNotFound {
            task_id: raw_task_id.to_string(),
        })
    })?;

    let status = state.service.poll_task(task_id).await?;
    let code = match status {
        TaskStatus::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    Ok((code, Json(TaskStatusResponse::from(&status))).into_response())
}
