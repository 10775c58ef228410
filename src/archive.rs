//! Zip archive construction
//!
//! Archives are assembled in a private directory under the staging area and
//! only then published into the object store, so a reader never sees a
//! half-written zip at the output path.

use crate::error::StorageError;
use crate::storage::{ObjectStore, basename, file_stem, parent};
use crate::types::Aggregation;
use crate::{Error, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Where an archive entry's bytes come from
#[derive(Debug, Clone)]
pub(crate) enum EntrySource {
    /// A staged local file
    File(PathBuf),
    /// Generated content
    Bytes(Vec<u8>),
}

/// One entry of a zip being written
#[derive(Debug, Clone)]
pub(crate) struct ZipEntry {
    /// Name inside the archive
    pub name: String,
    /// Entry content
    pub source: EntrySource,
}

/// Write `entries` into a new zip at `zip_path`
///
/// Blocking; call through `spawn_blocking`.
pub(crate) fn write_zip(zip_path: &Path, entries: &[ZipEntry]) -> Result<()> {
    let file = std::fs::File::create(zip_path)?;
    let mut writer = zip::ZipWriter::new(std::io::BufWriter::new(file));
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in entries {
        writer.start_file(entry.name.as_str(), options)?;
        match &entry.source {
            EntrySource::File(path) => {
                let mut input = std::fs::File::open(path)?;
                std::io::copy(&mut input, &mut writer)?;
            }
            EntrySource::Bytes(bytes) => writer.write_all(bytes)?,
        }
    }

    let mut inner = writer.finish()?;
    inner.flush()?;
    Ok(())
}

/// Private scratch directory, removed by [`StagingDir::cleanup`]
pub(crate) struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    /// Create a fresh uniquely named directory under `root`
    pub async fn create(root: &Path, label: &str) -> Result<Self> {
        let path = root.join(format!("{}-{}", label, uuid::Uuid::new_v4().as_simple()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn cleanup(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            debug!(path = ?self.path, error = %e, "failed to remove staging directory");
        }
    }
}

/// What to zip
#[derive(Debug, Clone, Copy)]
pub struct ZipSpec<'a> {
    /// Logical path of the file or folder to archive
    pub source_path: &'a str,
    /// Logical path the finished zip is published at
    pub output_path: &'a str,
    /// Aggregation whose members are packaged alongside the main file
    pub aggregation: Option<&'a Aggregation>,
    /// `source_path` is a single file rather than a folder
    pub single_file: bool,
}

/// Builds zip archives of object-store content
pub struct ArchiveBuilder {
    store: Arc<dyn ObjectStore>,
    staging_root: PathBuf,
}

impl ArchiveBuilder {
    /// Builder reading from and publishing into `store`, staging under `staging_root`
    pub fn new(store: Arc<dyn ObjectStore>, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            staging_root: staging_root.into(),
        }
    }

    /// Build the zip described by `spec`
    ///
    /// Returns false on any failure; the cause is logged here and the output
    /// path is left as it was before the attempt.
    pub async fn build(&self, spec: ZipSpec<'_>) -> bool {
        match self.try_build(spec).await {
            Ok(count) => {
                info!(
                    source = spec.source_path,
                    output = spec.output_path,
                    entries = count,
                    "zip archive published"
                );
                true
            }
            Err(e) => {
                error!(
                    source = spec.source_path,
                    output = spec.output_path,
                    aggregation = spec.aggregation.map(|a| a.name.as_str()),
                    error = %e,
                    "zip archive could not be created"
                );
                false
            }
        }
    }

    async fn try_build(&self, spec: ZipSpec<'_>) -> Result<usize> {
        let members = if spec.single_file {
            self.single_file_members(spec.source_path, spec.aggregation)
                .await?
        } else {
            self.folder_members(spec.source_path).await?
        };

        // An existing empty folder still yields a valid, empty archive
        let missing = if spec.single_file {
            members.is_empty()
        } else {
            members.is_empty() && !self.store.is_folder(spec.source_path).await?
        };
        if missing {
            return Err(StorageError::ObjectNotFound {
                path: spec.source_path.to_string(),
            }
            .into());
        }

        let staging = StagingDir::create(&self.staging_root, "zip").await?;
        let result = self.stage_and_publish(&staging, &members, spec.output_path).await;
        staging.cleanup().await;
        result.map(|()| members.len())
    }

    async fn stage_and_publish(
        &self,
        staging: &StagingDir,
        members: &[(String, String)],
        output_path: &str,
    ) -> Result<()> {
        let mut entries = Vec::with_capacity(members.len());
        for (index, (logical, name)) in members.iter().enumerate() {
            let local = staging.path().join("objects").join(index.to_string());
            self.store.get_file(logical, &local).await?;
            entries.push(ZipEntry {
                name: name.clone(),
                source: EntrySource::File(local),
            });
        }

        let zip_path = staging.path().join("archive.zip");
        let zip_path_owned = zip_path.clone();
        tokio::task::spawn_blocking(move || write_zip(&zip_path_owned, &entries))
            .await
            .map_err(|e| Error::Other(format!("zip writer panicked: {}", e)))??;

        self.store.put_file(&zip_path, output_path).await
    }

    /// Every file under the folder, named relative to the folder's parent
    async fn folder_members(&self, folder: &str) -> Result<Vec<(String, String)>> {
        let base = parent(folder);
        let files = self.store.list_files(folder).await?;
        Ok(files
            .into_iter()
            .map(|path| {
                let name = if base.is_empty() {
                    path.clone()
                } else {
                    path[base.len() + 1..].to_string()
                };
                (path, name)
            })
            .collect())
    }

    /// Main file, its metadata sidecars and the aggregation's member files
    async fn single_file_members(
        &self,
        main_file: &str,
        aggregation: Option<&Aggregation>,
    ) -> Result<Vec<(String, String)>> {
        if !self.store.exists(main_file).await? {
            return Ok(Vec::new());
        }

        let dir = parent(main_file);
        let stem = file_stem(main_file);
        let sibling = |name: String| {
            if dir.is_empty() {
                name
            } else {
                format!("{}/{}", dir, name)
            }
        };

        let mut candidates = vec![
            sibling(format!("{}_meta.xml", stem)),
            sibling(format!("{}_resmap.xml", stem)),
        ];
        if let Some(aggregation) = aggregation {
            candidates.extend(
                aggregation
                    .files
                    .iter()
                    .map(|f| format!("{}/data/contents/{}", aggregation.resource_id, f)),
            );
        }

        let mut members = vec![(main_file.to_string(), basename(main_file).to_string())];
        let mut seen: HashSet<String> = HashSet::from([main_file.to_string()]);
        for path in candidates {
            if seen.contains(&path) {
                continue;
            }
            if self.store.exists(&path).await? && !self.store.is_folder(&path).await? {
                let name = basename(&path).to_string();
                seen.insert(path.clone());
                members.push((path, name));
            }
        }
        Ok(members)
    }
}
