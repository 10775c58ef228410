//! The object store contract

use crate::Result;
use crate::error::StorageError;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncRead;

/// Live read stream over an object's bytes
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Remote bulk file store addressed by logical paths
///
/// Logical paths are relative, slash-separated and never contain `.` or `..`
/// segments; implementations reject anything else with
/// [`StorageError::InvalidPath`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether a file or folder exists at `path`
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Whether `path` is an existing folder (collection)
    async fn is_folder(&self, path: &str) -> Result<bool>;

    /// Size of the object at `path` in bytes, without reading it
    async fn size(&self, path: &str) -> Result<u64>;

    /// All files below `prefix`, recursively, as sorted logical paths
    ///
    /// A missing prefix yields an empty list.
    async fn list_files(&self, prefix: &str) -> Result<Vec<String>>;

    /// Open a streaming reader on the object at `path`
    async fn open_read(&self, path: &str) -> Result<ObjectReader>;

    /// Copy the object at `path` into the local file `local`
    async fn get_file(&self, path: &str, local: &Path) -> Result<()>;

    /// Publish the local file `local` at `path`, replacing any previous object
    ///
    /// The new object becomes visible atomically.
    async fn put_file(&self, local: &Path, path: &str) -> Result<()>;

    /// Publish `bytes` at `path`, replacing any previous object
    async fn put_bytes(&self, path: &str, bytes: Vec<u8>) -> Result<()>;

    /// Delete the object at `path`; returns false if there was nothing to delete
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Implementation name for logging
    fn name(&self) -> &'static str;
}

/// Check that `path` is a usable logical path
pub fn validate_logical_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(StorageError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
        .into())
    };

    if path.is_empty() {
        return invalid("empty path");
    }
    if path.starts_with('/') || path.contains('\\') {
        return invalid("path must be relative and slash-separated");
    }
    for segment in path.split('/') {
        match segment {
            "" => return invalid("empty path segment"),
            "." | ".." => return invalid("relative segments are not allowed"),
            _ => {}
        }
    }
    Ok(())
}
