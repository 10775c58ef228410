//! Task records and bag build deduplication.

use crate::error::DatabaseError;
use crate::types::{ArchiveTask, TaskId, TaskKind, TaskState};
use crate::{Error, Result};

use super::{Database, NewTask, TaskRow};

/// Attempts at the insert-or-find dance before giving up
const BAG_CLAIM_ATTEMPTS: usize = 3;

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{}: {}", what, e)))
}

impl Database {
    /// Insert a new pending task
    pub async fn insert_task(&self, task: &NewTask) -> Result<()> {
        self.try_insert_task(task, false).await.map(|_| ())
    }

    /// Insert a pending bag task unless one is already pending for the resource
    ///
    /// Returns the id of the pending task and whether it was created by this
    /// call. Enforced by the partial unique index on pending bag tasks, so two
    /// concurrent callers can never both create one.
    pub async fn insert_bag_task_if_absent(&self, task: &NewTask) -> Result<(TaskId, bool)> {
        for _ in 0..BAG_CLAIM_ATTEMPTS {
            if self.try_insert_task(task, true).await? {
                return Ok((task.task_id, true));
            }
            // The pending task may finish between the failed insert and this
            // lookup; retry the insert in that case.
            if let Some(existing) = self.pending_bag_task(&task.resource_id).await? {
                return Ok((existing, false));
            }
        }

        Err(Error::Database(DatabaseError::QueryFailed(format!(
            "Could not claim bag task for resource {}",
            task.resource_id
        ))))
    }

    async fn try_insert_task(&self, task: &NewTask, ignore_conflict: bool) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let verb = if ignore_conflict {
            "INSERT OR IGNORE"
        } else {
            "INSERT"
        };
        let sql = format!(
            r#"
            {} INTO tasks (
                task_id, kind, resource_id, source_path, output_path,
                aggregation_name, single_file, status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            verb
        );

        let result = sqlx::query(&sql)
            .bind(task.task_id.to_string())
            .bind(task.kind.as_str())
            .bind(&task.resource_id)
            .bind(&task.source_path)
            .bind(&task.output_path)
            .bind(&task.aggregation_name)
            .bind(task.single_file as i32)
            .bind(TaskState::Pending.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to insert task", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Id of the pending bag task for a resource, if any
    pub async fn pending_bag_task(&self, resource_id: &str) -> Result<Option<TaskId>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT task_id FROM tasks WHERE resource_id = ? AND kind = ? AND status = ?",
        )
        .bind(resource_id)
        .bind(TaskKind::Bag.as_str())
        .bind(TaskState::Pending.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to look up pending bag task", e))?;

        value
            .map(|id| {
                id.parse().map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Corrupt task id {}: {}",
                        id, e
                    )))
                })
            })
            .transpose()
    }

    /// Get a task by id
    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<ArchiveTask>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT
                task_id, kind, resource_id, source_path, output_path,
                aggregation_name, single_file, status, payload, error,
                created_at, finished_at
            FROM tasks
            WHERE task_id = ?
            "#,
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get task", e))?;

        row.map(ArchiveTask::try_from).transpose()
    }

    /// Every task recorded for a resource, oldest first
    pub async fn tasks_for_resource(&self, resource_id: &str) -> Result<Vec<ArchiveTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT
                task_id, kind, resource_id, source_path, output_path,
                aggregation_name, single_file, status, payload, error,
                created_at, finished_at
            FROM tasks
            WHERE resource_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to list tasks", e))?;

        rows.into_iter().map(ArchiveTask::try_from).collect()
    }

    /// Record successful completion
    pub async fn complete_task(&self, task_id: TaskId, payload: &str) -> Result<()> {
        self.finish_task(task_id, TaskState::Succeeded, Some(payload), None)
            .await
    }

    /// Record failure; the error text stays server-side
    pub async fn fail_task(&self, task_id: TaskId, error: &str) -> Result<()> {
        self.finish_task(task_id, TaskState::Failed, None, Some(error))
            .await
    }

    async fn finish_task(
        &self,
        task_id: TaskId,
        state: TaskState,
        payload: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, payload = ?, error = ?, finished_at = ?
            WHERE task_id = ? AND status = ?
            "#,
        )
        .bind(state.as_str())
        .bind(payload)
        .bind(error)
        .bind(now)
        .bind(task_id.to_string())
        .bind(TaskState::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to finish task", e))?;

        Ok(())
    }

    /// Fail every task left pending by a previous process
    ///
    /// Returns the number of tasks marked failed.
    pub async fn fail_interrupted_tasks(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?, error = 'interrupted by restart', finished_at = ?
            WHERE status = ?
            "#,
        )
        .bind(TaskState::Failed.as_str())
        .bind(now)
        .bind(TaskState::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to fail interrupted tasks", e))?;

        Ok(result.rows_affected())
    }
}
