//! Deletion timers for staged zips.

use crate::error::DatabaseError;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

use super::Database;

impl Database {
    /// Schedule deletion of `path` at `due_at`, replacing any earlier timer
    pub async fn schedule_expiration(&self, path: &str, due_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO zip_expirations (path, due_at) VALUES (?, ?)")
            .bind(path)
            .bind(due_at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to schedule expiration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Paths whose deletion time is at or before `now`, oldest first
    pub async fn due_expirations(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar(
            "SELECT path FROM zip_expirations WHERE due_at <= ? ORDER BY due_at ASC",
        )
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to query due expirations: {}",
                e
            )))
        })?;

        Ok(paths)
    }

    /// Drop the timer for `path`
    pub async fn remove_expiration(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM zip_expirations WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to remove expiration: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
