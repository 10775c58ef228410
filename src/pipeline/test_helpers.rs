//! Shared test helpers for building DownloadService instances in tests.

use crate::config::Config;
use crate::db::{Database, NewResource};
use crate::gateway::DbResourceGateway;
use crate::metadata::XmlMetadataWriter;
use crate::pipeline::DownloadService;
use crate::storage::{LocalObjectStore, ObjectReader, ObjectStore};
use crate::types::{ResourceKind, TaskId, TaskStatus};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;

/// Config rooted in `dir` with no bag debounce
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.root = dir.join("vault");
    config.storage.staging_dir = dir.join("staging");
    config.persistence.database_path = dir.join("test.db");
    config.download.bag_build_delay = Duration::ZERO;
    config
}

/// Service over a temp dir. The tempdir must be kept alive.
pub(crate) async fn create_test_service() -> (Arc<DownloadService>, tempfile::TempDir) {
    create_test_service_with(|_| {}).await
}

/// Service over a temp dir with config tweaks applied
pub(crate) async fn create_test_service_with(
    tweak: impl FnOnce(&mut Config),
) -> (Arc<DownloadService>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    tweak(&mut config);
    let service = DownloadService::new(config).await.unwrap();
    (Arc::new(service), temp_dir)
}

/// Service whose object store counts every call
pub(crate) async fn create_counting_service() -> (
    Arc<DownloadService>,
    Arc<CountingStore>,
    tempfile::TempDir,
) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let inner = LocalObjectStore::new(config.storage.root.clone())
        .await
        .unwrap();
    let store = Arc::new(CountingStore::new(inner));
    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let gateway = Arc::new(DbResourceGateway::new(db.clone()));
    let metadata = Arc::new(XmlMetadataWriter::new(store.clone()));
    let service = DownloadService::with_collaborators(config, db, store.clone(), gateway, metadata)
        .await
        .unwrap();
    (Arc::new(service), store, temp_dir)
}

/// Insert a composite resource
pub(crate) async fn seed_resource(service: &DownloadService, id: &str, public: bool) {
    service
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

/// Write an object into the service's store
pub(crate) async fn put(service: &DownloadService, path: &str, bytes: &[u8]) {
    service
        .store()
        .put_bytes(path, bytes.to_vec())
        .await
        .unwrap();
}

/// Poll until the task leaves pending (5s limit)
pub(crate) async fn wait_for_task(service: &DownloadService, task_id: TaskId) -> TaskStatus {
    for _ in 0..100 {
        let status = service.poll_task(task_id).await.unwrap();
        if status != TaskStatus::Pending {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {} still pending after 5s", task_id);
}

/// Object store wrapper counting every trait call
pub(crate) struct CountingStore {
    inner: LocalObjectStore,
    calls: AtomicUsize,
}

impl CountingStore {
    fn new(inner: LocalObjectStore) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        self.hit();
        self.inner.exists(path).await
    }

    async fn is_folder(&self, path: &str) -> Result<bool> {
        self.hit();
        self.inner.is_folder(path).await
    }

    async fn size(&self, path: &str) -> Result<u64> {
        self.hit();
        self.inner.size(path).await
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        self.hit();
        self.inner.list_files(prefix).await
    }

    async fn open_read(&self, path: &str) -> Result<ObjectReader> {
        self.hit();
        self.inner.open_read(path).await
    }

    async fn get_file(&self, path: &str, local: &Path) -> Result<()> {
        self.hit();
        self.inner.get_file(path, local).await
    }

    async fn put_file(&self, local: &Path, path: &str) -> Result<()> {
        self.hit();
        self.inner.put_file(local, path).await
    }

    async fn put_bytes(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.hit();
        self.inner.put_bytes(path, bytes).await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        self.hit();
        self.inner.delete(path).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}
