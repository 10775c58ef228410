//! Database layer for irods-stage
//!
//! Handles SQLite persistence for resources (bag/metadata flags, download
//! counts), access grants, aggregations, background tasks and zip expiry
//! timers.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`resources`] — Resources, grants, aggregations, bag flags
//! - [`tasks`] — Archive/bag task records and bag deduplication
//! - [`expirations`] — Deletion timers for staged zips

use crate::types::{
    Aggregation, ArchiveTask, FlagState, Resource, ResourceKind, TaskId, TaskKind, TaskState,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod expirations;
mod migrations;
mod resources;
mod tasks;

/// New resource to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewResource {
    /// Short id
    pub id: String,
    /// Capability variant
    pub kind: ResourceKind,
    /// Display title
    pub title: String,
    /// Viewable without a grant
    pub public: bool,
    /// Lives on a federated zone
    pub federated: bool,
}

/// Resource record from database
#[derive(Debug, Clone, FromRow)]
pub struct ResourceRow {
    /// Short id
    pub id: String,
    /// "composite" or "simple"
    pub kind: String,
    /// Display title
    pub title: String,
    /// 0 = private, 1 = public
    pub public: i32,
    /// 0 = local vault, 1 = federated zone
    pub federated: i32,
    /// "clean", "dirty" or NULL (unknown)
    pub bag_modified: Option<String>,
    /// "clean", "dirty" or NULL (unknown)
    pub metadata_dirty: Option<String>,
    /// Bag staleness generation counter
    pub bag_generation: i64,
    /// Downloads served
    pub download_count: i64,
}

impl From<ResourceRow> for Resource {
    fn from(row: ResourceRow) -> Self {
        Resource {
            id: row.id,
            kind: ResourceKind::from_db(&row.kind),
            title: row.title,
            public: row.public != 0,
            federated: row.federated != 0,
            bag_modified: FlagState::from_db(row.bag_modified.as_deref()),
            metadata_dirty: FlagState::from_db(row.metadata_dirty.as_deref()),
            bag_generation: row.bag_generation,
            download_count: row.download_count,
        }
    }
}

/// Aggregation record from database
#[derive(Debug, Clone, FromRow)]
pub struct AggregationRow {
    /// Owning resource
    pub resource_id: String,
    /// Aggregation name
    pub name: String,
    /// Main file relative to the content folder
    pub main_file: String,
    /// JSON array of member files
    pub files: String,
    /// External redirect target
    pub redirect_url: Option<String>,
}

impl From<AggregationRow> for Aggregation {
    fn from(row: AggregationRow) -> Self {
        let files = serde_json::from_str(&row.files).unwrap_or_else(|e| {
            tracing::warn!(
                resource_id = %row.resource_id,
                aggregation = %row.name,
                error = %e,
                "Unreadable aggregation file list, treating as empty"
            );
            Vec::new()
        });
        Aggregation {
            resource_id: row.resource_id,
            name: row.name,
            main_file: row.main_file,
            files,
            redirect_url: row.redirect_url,
        }
    }
}

/// New task to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Task id
    pub task_id: TaskId,
    /// What is being built
    pub kind: TaskKind,
    /// Owning resource
    pub resource_id: String,
    /// Logical source path
    pub source_path: String,
    /// Logical output path
    pub output_path: String,
    /// Aggregation being zipped
    pub aggregation_name: Option<String>,
    /// Source is a single file
    pub single_file: bool,
}

/// Task record from database
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    /// Task id (simple-form uuid)
    pub task_id: String,
    /// "zip" or "bag"
    pub kind: String,
    /// Owning resource
    pub resource_id: String,
    /// Logical source path
    pub source_path: String,
    /// Logical output path
    pub output_path: String,
    /// Aggregation being zipped
    pub aggregation_name: Option<String>,
    /// 0 = folder/bag, 1 = single file
    pub single_file: i32,
    /// "pending", "succeeded" or "failed"
    pub status: String,
    /// Stringified result
    pub payload: Option<String>,
    /// Internal failure description
    pub error: Option<String>,
    /// Unix timestamp of submission
    pub created_at: i64,
    /// Unix timestamp of completion
    pub finished_at: Option<i64>,
}

impl TryFrom<TaskRow> for ArchiveTask {
    type Error = crate::Error;

    fn try_from(row: TaskRow) -> crate::Result<Self> {
        let task_id = row.task_id.parse().map_err(|e| {
            crate::Error::Database(crate::error::DatabaseError::QueryFailed(format!(
                "Corrupt task id {}: {}",
                row.task_id, e
            )))
        })?;
        Ok(ArchiveTask {
            task_id,
            kind: TaskKind::from_db(&row.kind),
            resource_id: row.resource_id,
            source_path: row.source_path,
            output_path: row.output_path,
            aggregation_name: row.aggregation_name,
            single_file: row.single_file != 0,
            state: TaskState::from_db(&row.status),
            payload: row.payload,
            error: row.error,
            created_at: timestamp(row.created_at),
            finished_at: row.finished_at.map(timestamp),
        })
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

/// Database handle for irods-stage
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
