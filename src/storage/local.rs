//! Filesystem-backed object store

use super::traits::{ObjectReader, ObjectStore, validate_logical_path};
use crate::error::StorageError;
use crate::{Error, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix of in-flight publish files; never listed, never served
const TEMP_PREFIX: &str = ".irods-stage-tmp-";

/// Object store backed by a vault directory on the local filesystem
///
/// Logical path `a/b/c` maps to `<root>/a/b/c`. This is the layout nginx
/// serves through its internal `/irods-data` location.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create vault root '{}': {}", root.display(), e),
            ))
        })?;
        Ok(Self { root })
    }

    /// Vault root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_logical_path(path)?;
        Ok(self.root.join(path))
    }

    fn read_error(path: &str, e: std::io::Error) -> Error {
        if e.kind() == ErrorKind::NotFound {
            StorageError::ObjectNotFound {
                path: path.to_string(),
            }
            .into()
        } else {
            StorageError::ReadFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }
            .into()
        }
    }

    fn write_error(path: &str, e: std::io::Error) -> Error {
        StorageError::WriteFailed {
            path: path.to_string(),
            reason: e.to_string(),
        }
        .into()
    }

    /// Hidden sibling of `target` used as the pre-publish location
    fn temp_sibling(target: &Path) -> PathBuf {
        let name = format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4().as_simple());
        match target.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    async fn ensure_parent(path: &str, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::write_error(path, e))?;
        }
        Ok(())
    }

    /// Move a fully written temp file into place, cleaning up on failure
    async fn publish(path: &str, temp: &Path, target: &Path) -> Result<()> {
        if let Err(e) = tokio::fs::rename(temp, target).await {
            tokio::fs::remove_file(temp).await.ok();
            return Err(Self::write_error(path, e));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| Self::read_error(path, e))
    }

    async fn is_folder(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::read_error(path, e)),
        }
    }

    async fn size(&self, path: &str) -> Result<u64> {
        let full = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .map_err(|e| Self::read_error(path, e))?;
        if meta.is_dir() {
            return Err(StorageError::ReadFailed {
                path: path.to_string(),
                reason: "is a folder".to_string(),
            }
            .into());
        }
        Ok(meta.len())
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let base = self.resolve(prefix)?;
        let root = self.root.clone();
        let prefix_owned = prefix.to_string();

        let files = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            if !base.exists() {
                return Ok(Vec::new());
            }
            let mut files = Vec::new();
            for entry in walkdir::WalkDir::new(&base).follow_links(false) {
                let entry = entry.map_err(|e| StorageError::ReadFailed {
                    path: prefix_owned.clone(),
                    reason: e.to_string(),
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with(TEMP_PREFIX)
                {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&root) else {
                    continue;
                };
                let logical: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(logical.join("/"));
            }
            files.sort();
            Ok(files)
        })
        .await
        .map_err(|e| Error::Other(format!("listing task panicked: {}", e)))??;

        debug!(prefix, count = files.len(), "listed objects");
        Ok(files)
    }

    async fn open_read(&self, path: &str) -> Result<ObjectReader> {
        let full = self.resolve(path)?;
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| Self::read_error(path, e))?;
        Ok(Box::new(file))
    }

    async fn get_file(&self, path: &str, local: &Path) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&full, local)
            .await
            .map_err(|e| Self::read_error(path, e))?;
        Ok(())
    }

    async fn put_file(&self, local: &Path, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        Self::ensure_parent(path, &target).await?;

        let temp = Self::temp_sibling(&target);
        if let Err(e) = tokio::fs::copy(local, &temp).await {
            tokio::fs::remove_file(&temp).await.ok();
            return Err(Self::write_error(path, e));
        }
        Self::publish(path, &temp, &target).await?;

        debug!(path, store = self.name(), "published object");
        Ok(())
    }

    async fn put_bytes(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let target = self.resolve(path)?;
        Self::ensure_parent(path, &target).await?;

        let temp = Self::temp_sibling(&target);
        if let Err(e) = tokio::fs::write(&temp, bytes).await {
            tokio::fs::remove_file(&temp).await.ok();
            return Err(Self::write_error(path, e));
        }
        Self::publish(path, &temp, &target).await
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::write_error(path, e)),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
