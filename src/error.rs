//! Error types for irods-stage
//!
//! This module provides error handling for the download pipeline, including:
//! - Domain-specific error types (storage, download validation, archive builds)
//! - HTTP status code mapping for the download and task-status endpoints
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for irods-stage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for irods-stage
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "storage.root")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Object store error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Download request rejected (authorization or validation)
    #[error("{0}")]
    Download(#[from] DownloadError),

    /// Archive or bag construction failed
    #[error("{0}")]
    Build(#[from] BuildError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip writer error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Generic not-found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Object store errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// No object or folder at the logical path
    #[error("object {path} does not exist")]
    ObjectNotFound {
        /// Logical path that was looked up
        path: String,
    },

    /// Logical path escapes the store root or is otherwise unusable
    #[error("invalid storage path {path}: {reason}")]
    InvalidPath {
        /// The offending logical path
        path: String,
        /// Why the path was rejected
        reason: String,
    },

    /// Reading an object failed
    #[error("failed to read {path}: {reason}")]
    ReadFailed {
        /// Logical path being read
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// Writing or publishing an object failed
    #[error("failed to write {path}: {reason}")]
    WriteFailed {
        /// Logical path being written
        path: String,
        /// Underlying cause
        reason: String,
    },
}

/// Download request errors detected before any state is mutated
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Caller lacks view permission, or the resource does not exist
    #[error("You do not have permission to download this resource!")]
    PermissionDenied {
        /// The resource the caller asked for
        resource_id: String,
    },

    /// The request path could not be parsed
    #[error("invalid download path {path}: {reason}")]
    InvalidPath {
        /// The raw request path
        path: String,
        /// Why the path was rejected
        reason: String,
    },

    /// The request path names neither a file nor a folder
    #[error("file path {path} does not exist")]
    TargetNotFound {
        /// The public path that was requested
        path: String,
    },

    /// The aggregation named by the path does not exist in the resource
    #[error("aggregation {name} not found in resource {resource_id}")]
    AggregationNotFound {
        /// Resource that was searched
        resource_id: String,
        /// Aggregation name derived from the path
        name: String,
    },

    /// Polling an unknown task id
    #[error("task {task_id} not found")]
    TaskNotFound {
        /// The task id that was polled
        task_id: String,
    },
}

/// Build failures reported to callers
///
/// Messages are deliberately generic; the detailed cause is logged where the
/// failure happened.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Synchronous zip creation failed
    #[error("Zip could not be created.")]
    ZipFailed {
        /// Logical output path of the zip
        output_path: String,
    },

    /// Synchronous bag creation failed
    #[error("Bag cannot be created successfully. Check log for details.")]
    BagFailed {
        /// Resource whose bag failed
        resource_id: String,
    },
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "permission_denied",
///     "message": "You do not have permission to download this resource!",
///     "details": { "resource_id": "abc123" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "permission_denied")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,

            // 401 - authorization failures never reach storage
            Error::Download(DownloadError::PermissionDenied { .. }) => 401,

            // 400 - unparseable request path
            Error::Download(DownloadError::InvalidPath { .. }) => 400,

            // 404 Not Found
            Error::NotFound(_) => 404,
            Error::Download(DownloadError::TargetNotFound { .. }) => 404,
            Error::Download(DownloadError::AggregationNotFound { .. }) => 404,
            Error::Download(DownloadError::TaskNotFound { .. }) => 404,
            Error::Storage(StorageError::ObjectNotFound { .. }) => 404,
            Error::Storage(StorageError::InvalidPath { .. }) => 400,

            // 500 Internal Server Error
            Error::Build(_) => 500,
            Error::Storage(_) => 500,
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Zip(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 503 Service Unavailable
            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Storage(e) => match e {
                StorageError::ObjectNotFound { .. } => "object_not_found",
                StorageError::InvalidPath { .. } => "invalid_storage_path",
                StorageError::ReadFailed { .. } => "storage_read_failed",
                StorageError::WriteFailed { .. } => "storage_write_failed",
            },
            Error::Download(e) => match e {
                DownloadError::PermissionDenied { .. } => "permission_denied",
                DownloadError::InvalidPath { .. } => "invalid_path",
                DownloadError::TargetNotFound { .. } => "not_found",
                DownloadError::AggregationNotFound { .. } => "aggregation_not_found",
                DownloadError::TaskNotFound { .. } => "task_not_found",
            },
            Error::Build(e) => match e {
                BuildError::ZipFailed { .. } => "zip_failed",
                BuildError::BagFailed { .. } => "bag_failed",
            },
            Error::Io(_) => "io_error",
            Error::Zip(_) => "zip_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl Error {
    /// Message that is safe to show to a caller
    ///
    /// Server-side failures collapse to a generic message so internal details
    /// (paths on the vault, SQL errors) never leak into responses.
    pub fn public_message(&self) -> String {
        match self {
            Error::Download(_) | Error::Build(_) | Error::NotFound(_) | Error::ShuttingDown => {
                self.to_string()
            }
            Error::Storage(StorageError::ObjectNotFound { path }) => {
                format!("file path {} does not exist", path)
            }
            Error::Config { .. } => self.to_string(),
            _ => "internal server error".to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.public_message();

        let details = match &error {
            Error::Download(DownloadError::PermissionDenied { resource_id }) => {
                Some(serde_json::json!({
                    "resource_id": resource_id,
                }))
            }
            Error::Download(DownloadError::AggregationNotFound { resource_id, name }) => {
                Some(serde_json::json!({
                    "resource_id": resource_id,
                    "aggregation": name,
                }))
            }
            Error::Download(DownloadError::TaskNotFound { task_id }) => Some(serde_json::json!({
                "task_id": task_id,
            })),
            Error::Download(DownloadError::TargetNotFound { path }) => Some(serde_json::json!({
                "path": path,
            })),
            _ => None,
        };

        match details {
            Some(details) => ApiError::with_details(code, message, details),
            None => ApiError::new(code, message),
        }
    }
}
