//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: Create initial schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            Self::create_resources_schema(conn).await?;
            Self::create_tasks_schema(conn).await?;
            Self::create_expirations_table(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    async fn execute_ddl(conn: &mut SqliteConnection, what: &str, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    /// Resources, grants and aggregations
    async fn create_resources_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            "resources table",
            r#"
            CREATE TABLE resources (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                public INTEGER NOT NULL DEFAULT 0,
                federated INTEGER NOT NULL DEFAULT 0,
                bag_modified TEXT,
                metadata_dirty TEXT,
                bag_generation INTEGER NOT NULL DEFAULT 0,
                download_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "resource_grants table",
            r#"
            CREATE TABLE resource_grants (
                resource_id TEXT NOT NULL,
                username TEXT NOT NULL,
                permission TEXT NOT NULL,
                PRIMARY KEY (resource_id, username),
                FOREIGN KEY (resource_id) REFERENCES resources(id) ON DELETE CASCADE
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "aggregations table",
            r#"
            CREATE TABLE aggregations (
                resource_id TEXT NOT NULL,
                name TEXT NOT NULL,
                main_file TEXT NOT NULL,
                files TEXT NOT NULL DEFAULT '[]',
                redirect_url TEXT,
                PRIMARY KEY (resource_id, name),
                FOREIGN KEY (resource_id) REFERENCES resources(id) ON DELETE CASCADE
            )
            "#,
        )
        .await
    }

    /// Background task records
    async fn create_tasks_schema(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            "tasks table",
            r#"
            CREATE TABLE tasks (
                task_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                source_path TEXT NOT NULL,
                output_path TEXT NOT NULL,
                aggregation_name TEXT,
                single_file INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                payload TEXT,
                error TEXT,
                created_at INTEGER NOT NULL,
                finished_at INTEGER
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "task status index",
            "CREATE INDEX idx_tasks_status ON tasks(status)",
        )
        .await?;

        // At most one in-flight bag build per resource
        Self::execute_ddl(
            conn,
            "pending bag index",
            r#"
            CREATE UNIQUE INDEX idx_tasks_one_pending_bag
            ON tasks(resource_id)
            WHERE kind = 'bag' AND status = 'pending'
            "#,
        )
        .await
    }

    /// Deletion timers for staged zips
    async fn create_expirations_table(conn: &mut SqliteConnection) -> Result<()> {
        Self::execute_ddl(
            conn,
            "zip_expirations table",
            r#"
            CREATE TABLE zip_expirations (
                path TEXT PRIMARY KEY,
                due_at INTEGER NOT NULL
            )
            "#,
        )
        .await?;

        Self::execute_ddl(
            conn,
            "expiry index",
            "CREATE INDEX idx_zip_expirations_due ON zip_expirations(due_at)",
        )
        .await
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
