//! Download handlers: interactive (`/download`) and REST (`/rest_download`).

use super::NotReadyResponse;
use crate::api::AppState;
use crate::api::auth::principal_from_headers;
use crate::api::error_response::interactive_error_response;
use crate::pipeline::{DownloadOptions, DownloadOutcome};
use crate::types::{DownloadFlags, TaskId};
use crate::Result;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use std::collections::HashMap;
use tracing::debug;

/// GET /download/*path - Interactive download
///
/// Streams the file, or redirects the browser to the resource landing page
/// with a task handle while an archive is built.
#[utoipa::path(
    get,
    path = "/download/{path}",
    tag = "download",
    params(
        ("path" = String, Path, description = "Public path: <rid>/data/contents/..., bags/<rid>.zip or zips/..."),
        ("zipped" = Option<bool>, Query, description = "Deliver a zip of the target"),
        ("aggregation" = Option<bool>, Query, description = "The path names an aggregation"),
        ("url_download" = Option<bool>, Query, description = "Serve a reference aggregation's file instead of redirecting")
    ),
    responses(
        (status = 200, description = "File stream (or empty body with X-Accel-Redirect)"),
        (status = 302, description = "Reference aggregation redirect"),
        (status = 303, description = "Archive build started, redirect to landing page"),
        (status = 401, description = "No view permission (HTML page)"),
        (status = 404, description = "Path does not exist", body = crate::error::ApiError),
        (status = 500, description = "Synchronous build failed", body = crate::error::ApiError)
    )
)]
pub async fn download(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    match serve(&state, &path, &query, &headers, false).await {
        Ok(response) => response,
        Err(e) => interactive_error_response(e),
    }
}

/// GET /rest_download/*path - REST download
///
/// Same pipeline as `/download`, but a pending build answers with JSON and
/// every error is JSON.
#[utoipa::path(
    get,
    path = "/rest_download/{path}",
    tag = "download",
    params(
        ("path" = String, Path, description = "Public path: <rid>/data/contents/..., bags/<rid>.zip or zips/..."),
        ("zipped" = Option<bool>, Query, description = "Deliver a zip of the target"),
        ("aggregation" = Option<bool>, Query, description = "The path names an aggregation"),
        ("url_download" = Option<bool>, Query, description = "Serve a reference aggregation's file instead of redirecting")
    ),
    responses(
        (status = 200, description = "File stream, or build pending", body = NotReadyResponse),
        (status = 302, description = "Reference aggregation redirect"),
        (status = 401, description = "No view permission", body = crate::error::ApiError),
        (status = 404, description = "Path does not exist", body = crate::error::ApiError),
        (status = 500, description = "Synchronous build failed", body = crate::error::ApiError)
    )
)]
pub async fn rest_download(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    match serve(&state, &path, &query, &headers, true).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn serve(
    state: &AppState,
    path: &str,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    rest_call: bool,
) -> Result<Response> {
    let principal = principal_from_headers(headers, &state.config.server.api.user_header);
    let options = DownloadOptions {
        rest_call,
        use_async: state.config.download.use_async,
        use_reverse_proxy: true,
        via_proxy: headers.contains_key(state.config.proxy.trust_header.as_str()),
    };
    let flags = DownloadFlags::from_query(query);

    let outcome = state
        .service
        .download(&principal, path, flags, options)
        .await?;

    match outcome {
        DownloadOutcome::Redirect(url) => {
            debug!(url = %url, "redirecting to referenced content");
            Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
        }
        DownloadOutcome::Pending {
            kind,
            task_id,
            resource_id,
            download_path,
        } => {
            if rest_call {
                Ok(Json(NotReadyResponse::new(kind, task_id.to_string(), download_path))
                    .into_response())
            } else {
                let location = landing_page_location(state, &resource_id, task_id, &download_path);
                Ok(Redirect::to(&location).into_response())
            }
        }
        DownloadOutcome::Ready {
            resource,
            output_path,
        } => state.service.stream(&resource, &output_path, options).await,
    }
}

/// Landing page URL carrying the task handle for the page to poll
fn landing_page_location(
    state: &AppState,
    resource_id: &str,
    task_id: TaskId,
    download_path: &str,
) -> String {
    format!(
        "{}/{}/?task_id={}&download_path={}",
        state.config.download.landing_root.trim_end_matches('/'),
        resource_id,
        task_id,
        urlencoding::encode(download_path)
    )
}
