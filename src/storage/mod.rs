//! Object store access
//!
//! Content, bags and staged zips all live in a bulk object store addressed by
//! slash-separated logical paths (`<rid>/data/contents/...`, `bags/<rid>.zip`,
//! `zips/<date>/<token>/...`). The pipeline only talks to the store through
//! the [`ObjectStore`] trait:
//!
//! - [`LocalObjectStore`]: a vault mounted on the local filesystem (the same
//!   mount nginx serves for `X-Accel-Redirect`)
//!
//! Writes go through [`ObjectStore::put_file`] / [`ObjectStore::put_bytes`],
//! which publish atomically: readers see either the previous object or the
//! complete new one.

mod local;
mod traits;

pub use local::LocalObjectStore;
pub use traits::{ObjectReader, ObjectStore, validate_logical_path};

/// Last segment of a logical path
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Everything before the last segment of a logical path ("" for top-level names)
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// File name without its final extension
pub fn file_stem(path: &str) -> &str {
    let name = basename(path);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}
