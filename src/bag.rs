//! Resource bag construction
//!
//! A bag is the canonical BagIt-style export of a whole resource, published
//! at `bags/<rid>.zip`. Freshness is tracked with two flags on the resource:
//! `metadata_dirty` (the generated metadata documents are stale) and
//! `bag_modified` (the published bag is stale).
//!
//! Work is split in two halves:
//! - [`BagBuilder::prepare`] runs on the request path. It regenerates
//!   metadata if needed and decides whether a build is required.
//! - [`BagBuilder::build`] runs as a background task (or inline in sync mode)
//!   and writes the archive.

use crate::archive::{EntrySource, StagingDir, ZipEntry, write_zip};
use crate::gateway::ResourceGateway;
use crate::metadata::MetadataWriter;
use crate::storage::ObjectStore;
use crate::types::Resource;
use crate::{Error, Result};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const BAGIT_TXT: &str = "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n";

/// Outcome of [`BagBuilder::prepare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BagPlan {
    /// The published bag is stale or missing and must be rebuilt
    pub needs_build: bool,
    /// No bag exists at the canonical path
    pub bag_missing: bool,
    /// Metadata documents were regenerated during preparation
    pub metadata_regenerated: bool,
}

/// Builds and refreshes resource bags
pub struct BagBuilder {
    store: Arc<dyn ObjectStore>,
    gateway: Arc<dyn ResourceGateway>,
    metadata: Arc<dyn MetadataWriter>,
    staging_root: PathBuf,
}

impl BagBuilder {
    /// Create a bag builder
    pub fn new(
        store: Arc<dyn ObjectStore>,
        gateway: Arc<dyn ResourceGateway>,
        metadata: Arc<dyn MetadataWriter>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            gateway,
            metadata,
            staging_root: staging_root.into(),
        }
    }

    /// Rewrite the resource's metadata documents and persist the flag change
    ///
    /// Afterwards `metadata_dirty` is clean and `bag_modified` is dirty.
    pub async fn refresh_metadata(&self, resource: &Resource) -> Result<()> {
        self.metadata.write_metadata(resource).await?;
        self.gateway.mark_metadata_regenerated(&resource.id).await?;
        info!(resource_id = %resource.id, "metadata documents regenerated");
        Ok(())
    }

    /// Decide whether the bag must be rebuilt, regenerating metadata on the way
    ///
    /// Checks, in order:
    /// 1. A bag missing from the store forces a rebuild even when
    ///    `bag_modified` says clean, so an out-of-band deletion heals itself.
    /// 2. Stale or never-computed metadata is regenerated and persisted before
    ///    anything lists the resource's files; this dirties the bag.
    /// 3. Otherwise the `bag_modified` flag decides.
    pub async fn prepare(&self, resource: &Resource) -> Result<BagPlan> {
        let bag_missing = !self.store.exists(&resource.bag_path()).await?;
        if bag_missing {
            debug!(resource_id = %resource.id, "bag missing from store, forcing rebuild");
        }

        let metadata_regenerated = if resource.metadata_dirty.needs_work() {
            self.refresh_metadata(resource).await?;
            true
        } else {
            false
        };

        Ok(BagPlan {
            needs_build: bag_missing || metadata_regenerated || resource.bag_modified.needs_work(),
            bag_missing,
            metadata_regenerated,
        })
    }

    /// Build and publish the bag for `resource_id`
    ///
    /// Returns false on failure (logged here). On success the bag is marked
    /// clean unless the resource changed while the build was running.
    pub async fn build(&self, resource_id: &str) -> bool {
        match self.try_build(resource_id).await {
            Ok(files) => {
                info!(resource_id, files, "bag published");
                true
            }
            Err(e) => {
                error!(resource_id, error = %e, "bag could not be created");
                false
            }
        }
    }

    /// Prepare and, if needed, build in one step
    pub async fn ensure_fresh(&self, resource: &Resource) -> bool {
        match self.prepare(resource).await {
            Ok(plan) if !plan.needs_build => true,
            Ok(_) => self.build(&resource.id).await,
            Err(e) => {
                error!(resource_id = %resource.id, error = %e, "bag preparation failed");
                false
            }
        }
    }

    async fn try_build(&self, resource_id: &str) -> Result<usize> {
        let resource = self
            .gateway
            .get_resource(resource_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("resource {}", resource_id)))?;
        let generation = resource.bag_generation;

        let data_prefix = format!("{}/data", resource.id);
        let files = self.store.list_files(&data_prefix).await?;

        let staging = StagingDir::create(&self.staging_root, "bag").await?;
        let result = self
            .stage_and_publish(&staging, &resource, &files)
            .await;
        staging.cleanup().await;
        result?;

        if self.gateway.mark_bag_built(&resource.id, generation).await? {
            debug!(resource_id, generation, "bag marked clean");
        } else {
            warn!(
                resource_id,
                generation, "resource changed during bag build, leaving bag dirty"
            );
        }
        Ok(files.len())
    }

    async fn stage_and_publish(
        &self,
        staging: &StagingDir,
        resource: &Resource,
        files: &[String],
    ) -> Result<()> {
        let mut payload = Vec::with_capacity(files.len());
        for (index, logical) in files.iter().enumerate() {
            let local = staging.path().join("payload").join(index.to_string());
            self.store.get_file(logical, &local).await?;
            // Payload paths are relative to the bag root, e.g. "data/contents/x"
            let relative = logical[resource.id.len() + 1..].to_string();
            payload.push((relative, local));
        }

        let zip_path = staging.path().join("bag.zip");
        let zip_path_owned = zip_path.clone();
        let root = resource.id.clone();
        let bag_info = BagInfo {
            resource_id: resource.id.clone(),
            title: resource.title.clone(),
            date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
        };

        tokio::task::spawn_blocking(move || -> Result<()> {
            let entries = bag_entries(&root, &bag_info, payload)?;
            write_zip(&zip_path_owned, &entries)
        })
        .await
        .map_err(|e| Error::Other(format!("bag writer panicked: {}", e)))??;

        self.store.put_file(&zip_path, &resource.bag_path()).await
    }
}

struct BagInfo {
    resource_id: String,
    title: String,
    date: String,
}

fn md5_file(path: &std::path::Path) -> Result<(String, u64)> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", context.compute()), size))
}

/// Payload plus BagIt tag files, all under `<root>/`
fn bag_entries(
    root: &str,
    info: &BagInfo,
    payload: Vec<(String, PathBuf)>,
) -> Result<Vec<ZipEntry>> {
    let mut manifest = String::new();
    let mut octets = 0u64;
    let count = payload.len();
    let mut entries = Vec::with_capacity(count + 4);

    for (relative, local) in payload {
        let (digest, size) = md5_file(&local)?;
        octets += size;
        manifest.push_str(&format!("{}  {}\n", digest, relative));
        entries.push(ZipEntry {
            name: format!("{}/{}", root, relative),
            source: EntrySource::File(local),
        });
    }

    let bag_info = format!(
        "Bag-Software-Agent: irods-stage {}\nBagging-Date: {}\nExternal-Identifier: {}\nExternal-Description: {}\nPayload-Oxum: {}.{}\n",
        env!("CARGO_PKG_VERSION"),
        info.date,
        info.resource_id,
        info.title.replace('\n', " "),
        octets,
        count
    );

    let mut tag_manifest = String::new();
    for (name, content) in [
        ("bagit.txt", BAGIT_TXT),
        ("bag-info.txt", bag_info.as_str()),
        ("manifest-md5.txt", manifest.as_str()),
    ] {
        tag_manifest.push_str(&format!("{:x}  {}\n", md5::compute(content), name));
    }

    for (name, content) in [
        ("bagit.txt", BAGIT_TXT.to_string()),
        ("bag-info.txt", bag_info),
        ("manifest-md5.txt", manifest),
        ("tagmanifest-md5.txt", tag_manifest),
    ] {
        entries.push(ZipEntry {
            name: format!("{}/{}", root, name),
            source: EntrySource::Bytes(content.into_bytes()),
        });
    }

    Ok(entries)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewResource};
    use crate::gateway::DbResourceGateway;
    use crate::metadata::XmlMetadataWriter;
    use crate::storage::LocalObjectStore;
    use crate::types::{FlagState, ResourceKind};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts writes, delegating to the XML writer
    struct CountingWriter {
        inner: XmlMetadataWriter,
        writes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetadataWriter for CountingWriter {
        async fn write_metadata(&self, resource: &Resource) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.write_metadata(resource).await
        }
    }

    struct Fixture {
        builder: BagBuilder,
        db: Arc<Database>,
        store: Arc<LocalObjectStore>,
        writer: Arc<CountingWriter>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("db.sqlite")).await.unwrap());
        db.insert_resource(&NewResource {
            id: "res1".to_string(),
            kind: ResourceKind::Composite,
            title: "Test".to_string(),
            public: true,
            federated: false,
        })
        .await
        .unwrap();

        let store = Arc::new(LocalObjectStore::new(dir.path().join("vault")).await.unwrap());
        store
            .put_bytes("res1/data/contents/a.txt", b"hello".to_vec())
            .await
            .unwrap();

        let writer = Arc::new(CountingWriter {
            inner: XmlMetadataWriter::new(store.clone()),
            writes: AtomicUsize::new(0),
        });
        let builder = BagBuilder::new(
            store.clone(),
            Arc::new(DbResourceGateway::new(db.clone())),
            writer.clone(),
            dir.path().join("staging"),
        );
        Fixture {
            builder,
            db,
            store,
            writer,
            _dir: dir,
        }
    }

    async fn resource(db: &Database) -> Resource {
        db.get_resource("res1").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn first_build_regenerates_metadata_and_publishes_bag() {
        let f = fixture().await;
        assert!(f.builder.ensure_fresh(&resource(&f.db).await).await);

        assert_eq!(f.writer.writes.load(Ordering::SeqCst), 1);
        let r = resource(&f.db).await;
        assert_eq!(r.metadata_dirty, FlagState::Clean);
        assert_eq!(r.bag_modified, FlagState::Clean);

        let file = std::fs::File::open(f.store.root().join("bags/res1.zip")).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "res1/bag-info.txt",
                "res1/bagit.txt",
                "res1/data/contents/a.txt",
                "res1/data/resourcemap.xml",
                "res1/data/resourcemetadata.xml",
                "res1/manifest-md5.txt",
                "res1/tagmanifest-md5.txt",
            ]
        );

        let mut manifest = String::new();
        archive
            .by_name("res1/manifest-md5.txt")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        assert!(manifest.contains(&format!("{:x}  data/contents/a.txt", md5::compute(b"hello"))));
    }

    #[tokio::test]
    async fn second_ensure_fresh_is_a_no_op() {
        let f = fixture().await;
        assert!(f.builder.ensure_fresh(&resource(&f.db).await).await);

        let plan = f.builder.prepare(&resource(&f.db).await).await.unwrap();
        assert!(!plan.needs_build);
        assert!(!plan.metadata_regenerated);
        assert_eq!(f.writer.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_bag_forces_rebuild_even_when_clean() {
        let f = fixture().await;
        assert!(f.builder.ensure_fresh(&resource(&f.db).await).await);
        f.store.delete("bags/res1.zip").await.unwrap();

        let r = resource(&f.db).await;
        assert_eq!(r.bag_modified, FlagState::Clean);
        let plan = f.builder.prepare(&r).await.unwrap();
        assert!(plan.bag_missing);
        assert!(plan.needs_build);
        assert!(!plan.metadata_regenerated);
    }

    #[tokio::test]
    async fn dirty_metadata_dirties_bag() {
        let f = fixture().await;
        assert!(f.builder.ensure_fresh(&resource(&f.db).await).await);
        f.db.mark_resource_modified("res1").await.unwrap();

        let plan = f.builder.prepare(&resource(&f.db).await).await.unwrap();
        assert!(plan.metadata_regenerated);
        assert!(plan.needs_build);
        let r = resource(&f.db).await;
        assert_eq!(r.metadata_dirty, FlagState::Clean);
        assert_eq!(r.bag_modified, FlagState::Dirty);
    }

    #[tokio::test]
    async fn build_of_unknown_resource_fails() {
        let f = fixture().await;
        assert!(!f.builder.build("ghost").await);
        assert!(!f.store.exists("bags/ghost.zip").await.unwrap());
    }
}
