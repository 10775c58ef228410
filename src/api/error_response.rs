//! HTTP error response handling for the API
//!
//! REST callers get `{"error": {code, message, details}}` JSON with the
//! status from [`ToHttpStatus`]. Interactive callers get the same, except a
//! permission failure renders the plain HTML page browsers expect.

use crate::error::{ApiError, DownloadError, Error, ToHttpStatus};
use axum::{
    Json,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

/// Body of the interactive 401 page
pub const PERMISSION_DENIED_HTML: &str =
    "<h1>You do not have permission to download this resource!</h1>";

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let api_error: ApiError = self.into();

        (status_code, Json(api_error)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Without the originating Error there is no better status than 500
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// Error response for the interactive (browser) endpoints
pub fn interactive_error_response(error: Error) -> Response {
    match error {
        Error::Download(DownloadError::PermissionDenied { .. }) => {
            (StatusCode::UNAUTHORIZED, Html(PERMISSION_DENIED_HTML)).into_response()
        }
        other => other.into_response(),
    }
}
