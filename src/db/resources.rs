//! Resources, access grants, aggregations and bag staleness flags.

use crate::error::DatabaseError;
use crate::types::{Aggregation, FlagState, Permission, Resource};
use crate::{Error, Result};

use super::{AggregationRow, Database, NewResource, ResourceRow};

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{}: {}", what, e)))
}

impl Database {
    /// Insert a new resource with both staleness flags unknown
    pub async fn insert_resource(&self, resource: &NewResource) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO resources (id, kind, title, public, federated, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&resource.id)
        .bind(resource.kind.as_str())
        .bind(&resource.title)
        .bind(resource.public as i32)
        .bind(resource.federated as i32)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to insert resource", e))?;

        Ok(())
    }

    /// Get a resource by short id
    pub async fn get_resource(&self, id: &str) -> Result<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT
                id, kind, title, public, federated, bag_modified,
                metadata_dirty, bag_generation, download_count
            FROM resources
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get resource", e))?;

        Ok(row.map(Resource::from))
    }

    /// Make a resource public or private
    pub async fn set_resource_public(&self, id: &str, public: bool) -> Result<()> {
        sqlx::query("UPDATE resources SET public = ? WHERE id = ?")
            .bind(public as i32)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to update resource visibility", e))?;

        Ok(())
    }

    /// Grant (or replace) a user's permission on a resource
    pub async fn grant_permission(
        &self,
        resource_id: &str,
        username: &str,
        permission: Permission,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resource_grants (resource_id, username, permission)
            VALUES (?, ?, ?)
            ON CONFLICT(resource_id, username) DO UPDATE SET permission = excluded.permission
            "#,
        )
        .bind(resource_id)
        .bind(username)
        .bind(permission.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to grant permission", e))?;

        Ok(())
    }

    /// The permission a user holds on a resource, if any
    pub async fn get_permission(
        &self,
        resource_id: &str,
        username: &str,
    ) -> Result<Option<Permission>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT permission FROM resource_grants WHERE resource_id = ? AND username = ?",
        )
        .bind(resource_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get permission", e))?;

        Ok(value.as_deref().and_then(Permission::from_db))
    }

    /// Insert or replace an aggregation
    pub async fn insert_aggregation(&self, aggregation: &Aggregation) -> Result<()> {
        let files = serde_json::to_string(&aggregation.files)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO aggregations (resource_id, name, main_file, files, redirect_url)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&aggregation.resource_id)
        .bind(&aggregation.name)
        .bind(&aggregation.main_file)
        .bind(files)
        .bind(&aggregation.redirect_url)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to insert aggregation", e))?;

        Ok(())
    }

    /// Look up an aggregation by name
    pub async fn get_aggregation(&self, resource_id: &str, name: &str) -> Result<Option<Aggregation>> {
        let row = sqlx::query_as::<_, AggregationRow>(
            r#"
            SELECT resource_id, name, main_file, files, redirect_url
            FROM aggregations
            WHERE resource_id = ? AND name = ?
            "#,
        )
        .bind(resource_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to get aggregation", e))?;

        Ok(row.map(Aggregation::from))
    }

    /// Record a content or metadata change
    ///
    /// Marks both flags dirty and bumps the bag generation so an in-flight
    /// build cannot later claim the bag is clean.
    pub async fn mark_resource_modified(&self, id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resources
            SET bag_modified = 'dirty',
                metadata_dirty = 'dirty',
                bag_generation = bag_generation + 1
            WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark resource modified", e))?;

        Ok(())
    }

    /// Record that metadata documents were regenerated
    ///
    /// Metadata becomes clean; the bag becomes dirty since its tag files are now stale.
    pub async fn mark_metadata_regenerated(&self, id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resources
            SET metadata_dirty = 'clean',
                bag_modified = 'dirty',
                bag_generation = bag_generation + 1
            WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark metadata regenerated", e))?;

        Ok(())
    }

    /// Mark the bag clean if nothing changed since `generation` was read
    ///
    /// Returns false when a concurrent modification bumped the generation; the
    /// flag then stays dirty and the next request rebuilds.
    pub async fn mark_bag_built(&self, id: &str, generation: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resources
            SET bag_modified = ?
            WHERE id = ? AND bag_generation = ?
            "#,
        )
        .bind(FlagState::Clean.as_str())
        .bind(id)
        .bind(generation)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark bag built", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Count one served download
    pub async fn increment_download_count(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE resources SET download_count = download_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to increment download count", e))?;

        Ok(())
    }
}
