//! Route handlers for the REST API
//!
//! - [`download`]: interactive and REST download endpoints
//! - [`tasks`]: background task polling
//! - [`system`]: health, OpenAPI, events

use crate::types::{TaskKind, TaskStatus};
use serde::{Deserialize, Serialize};

mod download;
mod system;
mod tasks;

pub use download::*;
pub use system::*;
pub use tasks::*;

/// Value of `zip_status` / `bag_status` while a build is running
pub const NOT_READY: &str = "Not ready";

/// REST response when the artifact is still being built
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NotReadyResponse {
    /// Set for zip builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_status: Option<String>,
    /// Set for bag builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bag_status: Option<String>,
    /// Task to poll at `/rest_task_status/{task_id}`
    pub task_id: String,
    /// Where the artifact can be fetched once the task succeeds
    pub download_path: String,
}

impl NotReadyResponse {
    /// Response for a pending task of `kind`
    pub fn new(kind: TaskKind, task_id: String, download_path: String) -> Self {
        let status = Some(NOT_READY.to_string());
        let (zip_status, bag_status) = match kind {
            TaskKind::Zip => (status, None),
            TaskKind::Bag => (None, status),
        };
        Self {
            zip_status,
            bag_status,
            task_id,
            download_path,
        }
    }
}

/// Task polling response
///
/// `status` is `null` while pending, `"true"` on success (with `payload`),
/// `"false"` on failure.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TaskStatusResponse {
    /// `null`, `"true"` or `"false"`
    pub status: Option<String>,
    /// Stringified task result, on success only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl From<&TaskStatus> for TaskStatusResponse {
    fn from(status: &TaskStatus) -> Self {
        match status {
            TaskStatus::Pending => Self {
                status: None,
                payload: None,
            },
            TaskStatus::Succeeded { payload } => Self {
                status: Some("true".to_string()),
                payload: Some(payload.clone()),
            },
            TaskStatus::Failed { .. } => Self {
                status: Some("false".to_string()),
                payload: None,
            },
        }
    }
}
