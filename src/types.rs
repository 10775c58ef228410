//! Core types for irods-stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for a background archive or bag task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random task id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What a background task builds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Temporary zip of a file, folder or aggregation
    Zip,
    /// Canonical resource bag
    Bag,
}

impl TaskKind {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Zip => "zip",
            TaskKind::Bag => "bag",
        }
    }

    /// Parse the database representation (unknown values read as zip)
    pub fn from_db(value: &str) -> Self {
        match value {
            "bag" => TaskKind::Bag,
            _ => TaskKind::Zip,
        }
    }
}

/// Persisted lifecycle state of a task row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Submitted, not finished
    Pending,
    /// Finished and the artifact exists
    Succeeded,
    /// Finished with an error; no artifact
    Failed,
}

impl TaskState {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
        }
    }

    /// Parse the database representation
    pub fn from_db(value: &str) -> Self {
        match value {
            "succeeded" => TaskState::Succeeded,
            "failed" => TaskState::Failed,
            _ => TaskState::Pending,
        }
    }
}

/// Result of polling a task
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Not finished yet
    Pending,
    /// Finished; payload is the stringified task result
    Succeeded {
        /// Stringified result value
        payload: String,
    },
    /// Finished with an error. The error text is for server-side logging only.
    Failed {
        /// Internal failure description
        error: String,
    },
}

/// Explicit three-valued staleness flag
///
/// `Unknown` means the value was never computed. It is treated like `Dirty`
/// for every rebuild decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FlagState {
    /// Never computed
    #[default]
    Unknown,
    /// Known to be up to date
    Clean,
    /// Known to be stale
    Dirty,
}

impl FlagState {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagState::Unknown => "unknown",
            FlagState::Clean => "clean",
            FlagState::Dirty => "dirty",
        }
    }

    /// Parse the database representation; NULL and unrecognized values are `Unknown`
    pub fn from_db(value: Option<&str>) -> Self {
        match value {
            Some("clean") => FlagState::Clean,
            Some("dirty") => FlagState::Dirty,
            _ => FlagState::Unknown,
        }
    }

    /// Whether this flag demands regeneration
    pub fn needs_work(&self) -> bool {
        !matches!(self, FlagState::Clean)
    }
}

/// Resource variants, distinguished by capability
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Composite resource: may contain aggregations
    Composite,
    /// Any other resource type
    Simple,
}

impl ResourceKind {
    /// Whether aggregation requests are meaningful for this resource
    pub fn supports_aggregations(&self) -> bool {
        matches!(self, ResourceKind::Composite)
    }

    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Composite => "composite",
            ResourceKind::Simple => "simple",
        }
    }

    /// Parse the database representation
    pub fn from_db(value: &str) -> Self {
        match value {
            "composite" => ResourceKind::Composite,
            _ => ResourceKind::Simple,
        }
    }
}

/// Access level on a resource, ordered from weakest to strongest
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// May view and download
    View,
    /// May change content and metadata
    Edit,
    /// Full control
    Own,
}

impl Permission {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Edit => "edit",
            Permission::Own => "own",
        }
    }

    /// Parse the database representation
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "view" => Some(Permission::View),
            "edit" => Some(Permission::Edit),
            "own" => Some(Permission::Own),
            _ => None,
        }
    }

    /// Whether holding `self` satisfies a request for `needed`
    pub fn allows(&self, needed: Permission) -> bool {
        *self >= needed
    }
}

/// Who is asking
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// No authenticated user
    Anonymous,
    /// Authenticated user name, as asserted by the front end
    User(String),
}

impl Principal {
    /// User name, if authenticated
    pub fn username(&self) -> Option<&str> {
        match self {
            Principal::Anonymous => None,
            Principal::User(name) => Some(name),
        }
    }
}

/// A resource as seen by the download pipeline
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Resource {
    /// Short id, also the first segment of every content path
    pub id: String,
    /// Capability variant
    pub kind: ResourceKind,
    /// Display title (used in bag-info.txt)
    pub title: String,
    /// Publicly viewable without a grant
    pub public: bool,
    /// Content lives on a federated zone with no local vault mount
    pub federated: bool,
    /// Whether the stored bag is stale
    pub bag_modified: FlagState,
    /// Whether the metadata documents are stale
    pub metadata_dirty: FlagState,
    /// Incremented on every change that stales the bag
    pub bag_generation: i64,
    /// Number of completed downloads served
    pub download_count: i64,
}

impl Resource {
    /// Prefix under which user content is stored (`<id>/data/contents`)
    pub fn file_path(&self) -> String {
        format!("{}/data/contents", self.id)
    }

    /// Logical path of the resource's canonical bag
    pub fn bag_path(&self) -> String {
        format!("bags/{}.zip", self.id)
    }
}

/// A named logical grouping of files inside a composite resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Aggregation {
    /// Owning resource
    pub resource_id: String,
    /// Name relative to the resource content folder
    pub name: String,
    /// Main file, relative to the resource content folder
    pub main_file: String,
    /// Additional member files, relative to the resource content folder
    pub files: Vec<String>,
    /// External target for reference-type aggregations
    pub redirect_url: Option<String>,
}

/// Query flags of a download request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DownloadFlags {
    /// Caller asked for a zip
    pub zipped: bool,
    /// Path names an aggregation
    pub aggregation: bool,
    /// Caller wants the raw file of a reference aggregation, not the redirect
    pub url_download: bool,
}

/// Events emitted by the pipeline
///
/// Subscribers receive these through [`crate::DownloadService::subscribe`]
/// and the `/events` SSE stream.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A background task was submitted
    TaskQueued {
        /// Task id
        task_id: TaskId,
        /// Task kind
        kind: TaskKind,
        /// Resource the task belongs to
        resource_id: String,
    },
    /// A background task finished and its artifact is available
    TaskSucceeded {
        /// Task id
        task_id: TaskId,
        /// Task kind
        kind: TaskKind,
        /// Resource the task belongs to
        resource_id: String,
    },
    /// A background task failed
    TaskFailed {
        /// Task id
        task_id: TaskId,
        /// Task kind
        kind: TaskKind,
        /// Resource the task belongs to
        resource_id: String,
    },
    /// A regular file download was requested (tracking)
    FileDownloaded {
        /// Resource the file belongs to
        resource_id: String,
        /// Last path segment of the requested file
        file_name: String,
    },
    /// A staged zip passed its retention window and was purged
    ArtifactExpired {
        /// Logical path of the purged artifact
        path: String,
    },
    /// The service is shutting down
    Shutdown,
}

/// Persisted task record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveTask {
    /// Task id
    pub task_id: TaskId,
    /// What is being built
    pub kind: TaskKind,
    /// Owning resource
    pub resource_id: String,
    /// Logical source path (file, folder, or resource root for bags)
    pub source_path: String,
    /// Logical output path of the artifact
    pub output_path: String,
    /// Aggregation being zipped, if any
    pub aggregation_name: Option<String>,
    /// Source is a single file
    pub single_file: bool,
    /// Lifecycle state
    pub state: TaskState,
    /// Stringified result on success
    pub payload: Option<String>,
    /// Internal error description on failure
    pub error: Option<String>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Completion time
    pub finished_at: Option<DateTime<Utc>>,
}

impl ArchiveTask {
    /// Status as reported to pollers
    pub fn status(&self) -> TaskStatus {
        match self.state {
            TaskState::Pending => TaskStatus::Pending,
            TaskState::Succeeded => TaskStatus::Succeeded {
                payload: self.payload.clone().unwrap_or_default(),
            },
            TaskState::Failed => TaskStatus::Failed {
                error: self.error.clone().unwrap_or_default(),
            },
        }
    }
}
