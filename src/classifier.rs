//! Download request classification
//!
//! Turns a public download path plus its query flags into a
//! [`ResolvedTarget`]: which mode applies, what to read, and where the
//! artifact to stream lives. Parsing ([`parse_download_path`]) is pure and
//! runs before authorization; [`Classifier::classify`] consults the object
//! store and the aggregation table but never mutates anything.

use crate::error::DownloadError;
use crate::gateway::ResourceGateway;
use crate::metadata::is_resource_metadata_path;
use crate::storage::{ObjectStore, file_stem, validate_logical_path};
use crate::types::{DownloadFlags, Resource};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Top-level segment of bag paths
pub const BAGS_PREFIX: &str = "bags";

/// Top-level segment of staged zip paths
pub const ZIPS_PREFIX: &str = "zips";

/// Which of the three download shapes a request has
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadMode {
    /// Content inside a resource (file, folder, aggregation, metadata document)
    Regular,
    /// `bags/<rid>.zip`
    Bag,
    /// `zips/<date>/<token>/<path>.zip`, following up on an earlier zip request
    ZipFollowup,
}

/// Result of [`parse_download_path`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPath {
    /// Path with trailing empty segments removed
    pub path: String,
    /// Mode implied by the first segment
    pub mode: DownloadMode,
    /// Resource the path belongs to
    pub resource_id: String,
}

impl ParsedPath {
    /// Last segment of the path
    pub fn file_name(&self) -> &str {
        crate::storage::basename(&self.path)
    }
}

/// Split a raw download path into mode and resource id
///
/// No I/O. Fails with [`DownloadError::InvalidPath`] when the path is empty,
/// contains relative segments, or is too short for its mode.
pub fn parse_download_path(raw: &str) -> Result<ParsedPath> {
    let invalid = |reason: &str| -> crate::Error {
        DownloadError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    let mut segments: Vec<&str> = raw.trim_start_matches('/').split('/').collect();
    while segments.last().is_some_and(|s| s.is_empty()) {
        segments.pop();
    }
    if segments.is_empty() {
        return Err(invalid("empty path"));
    }

    let path = segments.join("/");
    validate_logical_path(&path).map_err(|_| invalid("malformed path"))?;

    let (mode, resource_id) = match segments[0] {
        BAGS_PREFIX => {
            let Some(name) = segments.get(1) else {
                return Err(invalid("bag path must be bags/<resource-id>.zip"));
            };
            (DownloadMode::Bag, file_stem(name).to_string())
        }
        ZIPS_PREFIX => {
            let Some(rid) = segments.get(3) else {
                return Err(invalid("zip path must be zips/<date>/<token>/<path>"));
            };
            (DownloadMode::ZipFollowup, rid.to_string())
        }
        rid => (DownloadMode::Regular, rid.to_string()),
    };

    Ok(ParsedPath {
        path,
        mode,
        resource_id,
    })
}

/// Interpret a query flag: only a case-insensitive `true` is true
pub fn parse_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

impl DownloadFlags {
    /// Read `zipped`, `aggregation` and `url_download` from query parameters
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self {
            zipped: parse_flag(query.get("zipped").map(String::as_str)),
            aggregation: parse_flag(query.get("aggregation").map(String::as_str)),
            url_download: parse_flag(query.get("url_download").map(String::as_str)),
        }
    }
}

/// Random 32-hex-digit token separating concurrent zips of the same path
pub fn new_zip_token() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Output path of a staged zip: `zips/<YYYY-MM-DD>/<token>/<path>.zip`
pub fn zip_output_path(path: &str, date: chrono::NaiveDate, token: &str) -> String {
    format!(
        "{}/{}/{}/{}.zip",
        ZIPS_PREFIX,
        date.format("%Y-%m-%d"),
        token,
        path
    )
}

fn fresh_zip_output_path(path: &str) -> String {
    zip_output_path(path, chrono::Utc::now().date_naive(), &new_zip_token())
}

/// A fully classified download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Download shape
    pub mode: DownloadMode,
    /// Owning resource
    pub resource_id: String,
    /// Logical path of the content to read or archive
    pub source_path: String,
    /// Logical path of the artifact that will be streamed
    pub output_path: String,
    /// Source is a single file (regular mode only)
    pub is_single_file: bool,
    /// Source is a folder (regular mode only)
    pub is_folder: bool,
    /// The source must be zipped before streaming
    pub zip: bool,
    /// Aggregation the request resolved through
    pub aggregation_name: Option<String>,
}

/// What to do with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Send the caller to an external URL (reference aggregations)
    Redirect(String),
    /// Serve, zip or bag the target
    Resolved(ResolvedTarget),
}

/// Classifies parsed download paths against the store and aggregation table
pub struct Classifier {
    store: Arc<dyn ObjectStore>,
    gateway: Arc<dyn ResourceGateway>,
}

impl Classifier {
    /// Create a classifier
    pub fn new(store: Arc<dyn ObjectStore>, gateway: Arc<dyn ResourceGateway>) -> Self {
        Self { store, gateway }
    }

    /// Classify `parsed` for an already authorized `resource`
    pub async fn classify(
        &self,
        parsed: &ParsedPath,
        flags: DownloadFlags,
        resource: &Resource,
    ) -> Result<Classification> {
        match parsed.mode {
            DownloadMode::Bag => Ok(Classification::Resolved(ResolvedTarget {
                mode: DownloadMode::Bag,
                resource_id: resource.id.clone(),
                source_path: resource.id.clone(),
                output_path: resource.bag_path(),
                is_single_file: false,
                is_folder: false,
                zip: false,
                aggregation_name: None,
            })),
            DownloadMode::ZipFollowup => Ok(Classification::Resolved(ResolvedTarget {
                mode: DownloadMode::ZipFollowup,
                resource_id: resource.id.clone(),
                source_path: parsed.path.clone(),
                output_path: parsed.path.clone(),
                is_single_file: false,
                is_folder: false,
                zip: false,
                aggregation_name: None,
            })),
            DownloadMode::Regular => self.classify_regular(parsed, flags, resource).await,
        }
    }

    async fn classify_regular(
        &self,
        parsed: &ParsedPath,
        flags: DownloadFlags,
        resource: &Resource,
    ) -> Result<Classification> {
        let mut path = parsed.path.clone();
        let mut zip = flags.zipped;
        let mut aggregation_name = None;

        if flags.aggregation && resource.kind.supports_aggregations() {
            let prefix = resource.file_path();
            let name = path
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or_default()
                .to_string();

            let aggregation = if name.is_empty() {
                None
            } else {
                self.gateway.get_aggregation(&resource.id, &name).await?
            };
            let Some(aggregation) = aggregation else {
                return Err(DownloadError::AggregationNotFound {
                    resource_id: resource.id.clone(),
                    name,
                }
                .into());
            };

            if !flags.zipped && !flags.url_download {
                if let Some(target) = aggregation.redirect_url.as_deref() {
                    match url::Url::parse(target) {
                        Ok(url) if matches!(url.scheme(), "http" | "https") => {
                            debug!(resource_id = %resource.id, aggregation = %name, "redirecting to referenced url");
                            return Ok(Classification::Redirect(url.to_string()));
                        }
                        _ => {
                            warn!(
                                resource_id = %resource.id,
                                aggregation = %name,
                                redirect_url = target,
                                "ignoring unusable aggregation redirect url"
                            );
                        }
                    }
                }
            }

            path = format!("{}/{}", prefix, aggregation.main_file);
            zip = true;
            aggregation_name = Some(name);
        }

        let (is_folder, is_single_file) = if self.store.is_folder(&path).await? {
            debug!(path = %path, "folder requested, zipping");
            zip = true;
            (true, false)
        } else if self.store.exists(&path).await?
            || is_resource_metadata_path(&resource.id, &path)
        {
            (false, true)
        } else {
            return Err(DownloadError::TargetNotFound {
                path: parsed.path.clone(),
            }
            .into());
        };

        let output_path = if zip {
            fresh_zip_output_path(&path)
        } else {
            path.clone()
        };

        Ok(Classification::Resolved(ResolvedTarget {
            mode: DownloadMode::Regular,
            resource_id: resource.id.clone(),
            source_path: path,
            output_path,
            is_single_file,
            is_folder,
            zip,
            aggregation_name,
        }))
    }
}
