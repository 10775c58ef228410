//! Resource lookup and authorization
//!
//! The pipeline never reads resource records directly; everything goes
//! through [`ResourceGateway`] so a deployment can back it with whatever owns
//! resources. [`DbResourceGateway`] is the SQLite-backed implementation.

use crate::Result;
use crate::db::Database;
use crate::error::DownloadError;
use crate::types::{Aggregation, Permission, Principal, Resource};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Resource lookup, authorization and bookkeeping
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    /// Load the resource and check that `principal` holds `needed` on it
    ///
    /// A missing resource is reported as [`DownloadError::PermissionDenied`]
    /// so callers cannot probe for resource ids.
    async fn authorize(
        &self,
        principal: &Principal,
        resource_id: &str,
        needed: Permission,
    ) -> Result<Resource>;

    /// Load a resource without authorization
    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>>;

    /// Find an aggregation by its name relative to the content folder
    async fn get_aggregation(&self, resource_id: &str, name: &str) -> Result<Option<Aggregation>>;

    /// Metadata documents were rewritten: metadata clean, bag dirty
    async fn mark_metadata_regenerated(&self, resource_id: &str) -> Result<()>;

    /// Mark the bag clean if the generation did not move; see [`Database::mark_bag_built`]
    async fn mark_bag_built(&self, resource_id: &str, generation: i64) -> Result<bool>;

    /// Count one served download
    async fn increment_download_count(&self, resource_id: &str) -> Result<()>;
}

/// [`ResourceGateway`] over the service database
pub struct DbResourceGateway {
    db: Arc<Database>,
}

impl DbResourceGateway {
    /// Wrap a database handle
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResourceGateway for DbResourceGateway {
    async fn authorize(
        &self,
        principal: &Principal,
        resource_id: &str,
        needed: Permission,
    ) -> Result<Resource> {
        let denied = || {
            DownloadError::PermissionDenied {
                resource_id: resource_id.to_string(),
            }
            .into()
        };

        let Some(resource) = self.db.get_resource(resource_id).await? else {
            debug!(resource_id, "authorization failed: no such resource");
            return Err(denied());
        };

        if needed == Permission::View && resource.public {
            return Ok(resource);
        }

        let Some(username) = principal.username() else {
            debug!(resource_id, "authorization failed: anonymous caller");
            return Err(denied());
        };

        match self.db.get_permission(resource_id, username).await? {
            Some(held) if held.allows(needed) => Ok(resource),
            _ => {
                debug!(resource_id, username, needed = needed.as_str(), "authorization failed");
                Err(denied())
            }
        }
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>> {
        self.db.get_resource(resource_id).await
    }

    async fn get_aggregation(&self, resource_id: &str, name: &str) -> Result<Option<Aggregation>> {
        self.db.get_aggregation(resource_id, name).await
    }

    async fn mark_metadata_regenerated(&self, resource_id: &str) -> Result<()> {
        self.db.mark_metadata_regenerated(resource_id).await
    }

    async fn mark_bag_built(&self, resource_id: &str, generation: i64) -> Result<bool> {
        self.db.mark_bag_built(resource_id, generation).await
    }

    async fn increment_download_count(&self, resource_id: &str) -> Result<()> {
        self.db.increment_download_count(resource_id).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::db::NewResource;
    use crate::types::ResourceKind;

    async fn gateway() -> (DbResourceGateway, Arc<Database>, tempfile::NamedTempFile) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(file.path()).await.unwrap());
        for (id, public) in [("pub", true), ("priv", false)] {
            db.insert_resource(&NewResource {
                id: id.to_string(),
                kind: ResourceKind::Composite,
                title: id.to_string(),
                public,
                federated: false,
            })
            .await
            .unwrap();
        }
        db.grant_permission("priv", "alice", Permission::View)
            .await
            .unwrap();
        (DbResourceGateway::new(db.clone()), db, file)
    }

    fn is_denied(result: Result<Resource>) -> bool {
        matches!(
            result,
            Err(Error::Download(DownloadError::PermissionDenied { .. }))
        )
    }

    #[tokio::test]
    async fn public_resources_are_viewable_by_anyone() {
        let (gateway, _db, _file) = gateway().await;
        let resource = gateway
            .authorize(&Principal::Anonymous, "pub", Permission::View)
            .await
            .unwrap();
        assert_eq!(resource.id, "pub");
    }

    #[tokio::test]
    async fn private_resources_need_a_grant() {
        let (gateway, _db, _file) = gateway().await;
        assert!(is_denied(
            gateway
                .authorize(&Principal::Anonymous, "priv", Permission::View)
                .await
        ));
        assert!(is_denied(
            gateway
                .authorize(&Principal::User("bob".into()), "priv", Permission::View)
                .await
        ));
        assert!(
            gateway
                .authorize(&Principal::User("alice".into()), "priv", Permission::View)
                .await
                .is_ok()
        );
        assert!(is_denied(
            gateway
                .authorize(&Principal::User("alice".into()), "priv", Permission::Edit)
                .await
        ));
    }

    #[tokio::test]
    async fn missing_resource_looks_like_denial() {
        let (gateway, _db, _file) = gateway().await;
        assert!(is_denied(
            gateway
                .authorize(&Principal::User("alice".into()), "ghost", Permission::View)
                .await
        ));
    }
}
