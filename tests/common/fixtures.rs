//! Service, router and vault fixtures

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use irods_stage::db::NewResource;
use irods_stage::{Config, DownloadService, ResourceKind};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// A running service, its router and the temp dir backing both
pub struct TestEnv {
    pub service: Arc<DownloadService>,
    pub app: Router,
    /// Owned when the env created it; kept alive for the env's lifetime
    pub dir: Option<TempDir>,
}

/// Config rooted in `dir`, no bag debounce
pub fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.root = dir.join("vault");
    config.storage.staging_dir = dir.join("staging");
    config.persistence.database_path = dir.join("irods-stage.db");
    config.download.bag_build_delay = Duration::ZERO;
    config
}

/// Fresh service and router with config tweaks applied
pub async fn test_env(tweak: impl FnOnce(&mut Config)) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);
    env_from_config(config, Some(dir)).await
}

/// Service and router over an explicit config
pub async fn env_from_config(config: Config, dir: Option<TempDir>) -> TestEnv {
    let service = Arc::new(DownloadService::new(config.clone()).await.unwrap());
    let app = irods_stage::api::create_router(service.clone(), Arc::new(config));
    TestEnv { service, app, dir }
}

impl TestEnv {
    /// Insert a composite resource
    pub async fn resource(&self, id: &str, public: bool) {
        self.service
            .db
            .insert_resource(&NewResource {
                id: id.to_string(),
                kind: ResourceKind::Composite,
                title: format!("Resource {}", id),
                public,
                federated: false,
            })
            .await
            .unwrap();
    }

    /// Write an object into the vault
    pub async fn put(&self, path: &str, bytes: &[u8]) {
        self.service
            .store()
            .put_bytes(path, bytes.to_vec())
            .await
            .unwrap();
    }

    /// GET `uri` with optional headers
    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

/// Collect a response body
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

/// Parse a response body as JSON
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
