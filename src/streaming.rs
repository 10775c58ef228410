//! Streaming finished artifacts to the caller
//!
//! Two ways out:
//! - **proxy**: an empty response carrying `X-Accel-Redirect`, so the nginx
//!   front end streams the bytes from its own vault mount;
//! - **direct**: the object is read from the store and piped into the body.
//!
//! Either way the response has an exact `Content-Length` and an attachment
//! `Content-Disposition`, and the resource's download count goes up by one.

use crate::config::ProxyConfig;
use crate::error::DownloadError;
use crate::gateway::ResourceGateway;
use crate::storage::{ObjectStore, basename};
use crate::types::Resource;
use crate::{Error, Result};
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::Response;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Header instructing nginx to serve an internal location
pub const X_ACCEL_REDIRECT: HeaderName = HeaderName::from_static("x-accel-redirect");

/// Generic type for unknown suffixes
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const CONTENT_TYPES: &[(&str, &str)] = &[
    (".zip", "application/zip"),
    (".gz", "application/gzip"),
    (".tar", "application/x-tar"),
    (".json", "application/json"),
    (".geojson", "application/geo+json"),
    (".xml", "application/xml"),
    (".rdf", "application/rdf+xml"),
    (".pdf", "application/pdf"),
    (".nc", "application/x-netcdf"),
    (".txt", "text/plain"),
    (".csv", "text/csv"),
    (".md", "text/markdown"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".py", "text/x-python"),
    (".r", "text/x-r"),
    (".tif", "image/tiff"),
    (".tiff", "image/tiff"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".gif", "image/gif"),
];

/// Guess a content type from the path suffix
pub fn guess_content_type(path: &str) -> &'static str {
    let lower = basename(path).to_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(suffix, _)| lower.ends_with(suffix))
        .map(|(_, content_type)| *content_type)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Per-request routing inputs
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// The request carried the proxy's trust header
    pub via_proxy: bool,
    /// The caller allows proxy delegation
    pub use_reverse_proxy: bool,
}

/// Streams artifacts either through nginx or directly
pub struct StreamingResponder {
    store: Arc<dyn ObjectStore>,
    gateway: Arc<dyn ResourceGateway>,
    proxy: ProxyConfig,
}

impl StreamingResponder {
    /// Create a responder
    pub fn new(
        store: Arc<dyn ObjectStore>,
        gateway: Arc<dyn ResourceGateway>,
        proxy: ProxyConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            proxy,
        }
    }

    /// Whether the proxy path applies
    ///
    /// Requires proxy delegation to be enabled, the request to have come
    /// through the proxy, no caller opt-out, and a resource whose content
    /// sits on the locally mounted vault.
    pub fn should_proxy(&self, options: StreamOptions, resource: &Resource) -> bool {
        self.proxy.sendfile_on
            && options.via_proxy
            && options.use_reverse_proxy
            && !resource.federated
    }

    /// Build the response for `output_path`
    pub async fn respond(
        &self,
        resource: &Resource,
        output_path: &str,
        options: StreamOptions,
    ) -> Result<Response> {
        if self.should_proxy(options, resource) {
            self.proxied(resource, output_path).await
        } else {
            self.direct(resource, output_path).await
        }
    }

    async fn proxied(&self, resource: &Resource, output_path: &str) -> Result<Response> {
        // A dangling X-Accel-Redirect target makes nginx hang
        if !self.store.exists(output_path).await? {
            return Err(DownloadError::TargetNotFound {
                path: output_path.to_string(),
            }
            .into());
        }
        let length = self.store.size(output_path).await?;
        self.count_download(resource).await;

        let target = format!(
            "{}/{}",
            self.proxy.data_uri.trim_end_matches('/'),
            output_path
        );
        debug!(resource_id = %resource.id, target = %target, "delegating to reverse proxy");

        let mut response = base_response(output_path, length, Body::empty())?;
        response
            .headers_mut()
            .insert(X_ACCEL_REDIRECT, header_value(&target)?);
        Ok(response)
    }

    async fn direct(&self, resource: &Resource, output_path: &str) -> Result<Response> {
        let length = self.store.size(output_path).await?;
        let reader = self.store.open_read(output_path).await?;
        self.count_download(resource).await;

        debug!(resource_id = %resource.id, path = output_path, length, "streaming directly");
        base_response(
            output_path,
            length,
            Body::from_stream(ReaderStream::new(reader)),
        )
    }

    async fn count_download(&self, resource: &Resource) {
        if let Err(e) = self.gateway.increment_download_count(&resource.id).await {
            warn!(resource_id = %resource.id, error = %e, "failed to record download");
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Other(format!("invalid header value {:?}: {}", value, e)))
}

fn base_response(output_path: &str, length: u64, body: Body) -> Result<Response> {
    let file_name = basename(output_path).replace('"', "");
    let disposition = format!("attachment; filename=\"{}\"", file_name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, guess_content_type(output_path))
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_DISPOSITION, header_value(&disposition)?)
        .body(body)
        .map_err(|e| Error::Other(format!("failed to build response: {}", e)))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewResource};
    use crate::gateway::DbResourceGateway;
    use crate::storage::LocalObjectStore;
    use crate::types::ResourceKind;

    #[test]
    fn content_type_from_suffix() {
        assert_eq!(guess_content_type("a/b/data.csv"), "text/csv");
        assert_eq!(guess_content_type("zips/x/y/folder.zip"), "application/zip");
        assert_eq!(guess_content_type("r/data/contents/IMG.TIF"), "image/tiff");
        assert_eq!(guess_content_type("r/data/contents/blob.bin"), DEFAULT_CONTENT_TYPE);
        assert_eq!(guess_content_type("r/data/contents/README"), DEFAULT_CONTENT_TYPE);
    }

    struct Fixture {
        db: Arc<Database>,
        store: Arc<LocalObjectStore>,
        gateway: Arc<DbResourceGateway>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(federated: bool) -> (Fixture, Resource) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("db.sqlite")).await.unwrap());
        db.insert_resource(&NewResource {
            id: "res1".to_string(),
            kind: ResourceKind::Composite,
            title: "t".to_string(),
            public: true,
            federated,
        })
        .await
        .unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path().join("vault")).await.unwrap());
        store
            .put_bytes("res1/data/contents/myfile.txt", b"hello world".to_vec())
            .await
            .unwrap();
        let gateway = Arc::new(DbResourceGateway::new(db.clone()));
        let resource = db.get_resource("res1").await.unwrap().unwrap();
        (
            Fixture {
                db,
                store,
                gateway,
                _dir: dir,
            },
            resource,
        )
    }

    fn responder(f: &Fixture, sendfile_on: bool) -> StreamingResponder {
        StreamingResponder::new(
            f.store.clone(),
            f.gateway.clone(),
            ProxyConfig {
                sendfile_on,
                ..Default::default()
            },
        )
    }

    const VIA_PROXY: StreamOptions = StreamOptions {
        via_proxy: true,
        use_reverse_proxy: true,
    };

    #[tokio::test]
    async fn direct_stream_sets_framing_and_counts() {
        let (f, resource) = fixture(false).await;
        let response = responder(&f, false)
            .respond(&resource, "res1/data/contents/myfile.txt", VIA_PROXY)
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/plain");
        assert_eq!(headers[header::CONTENT_LENGTH], "11");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"myfile.txt\""
        );
        assert!(headers.get(X_ACCEL_REDIRECT).is_none());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello world");
        assert_eq!(
            f.db.get_resource("res1").await.unwrap().unwrap().download_count,
            1
        );
    }

    #[tokio::test]
    async fn proxy_path_sends_empty_body_with_redirect_header() {
        let (f, resource) = fixture(false).await;
        let response = responder(&f, true)
            .respond(&resource, "res1/data/contents/myfile.txt", VIA_PROXY)
            .await
            .unwrap();

        assert_eq!(
            response.headers()[X_ACCEL_REDIRECT],
            "/irods-data/res1/data/contents/myfile.txt"
        );
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "11");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
        assert_eq!(
            f.db.get_resource("res1").await.unwrap().unwrap().download_count,
            1
        );
    }

    #[tokio::test]
    async fn proxy_path_404s_on_missing_artifact_without_counting() {
        let (f, resource) = fixture(false).await;
        let err = responder(&f, true)
            .respond(&resource, "zips/d/t/res1/data/contents/x.zip", VIA_PROXY)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Download(DownloadError::TargetNotFound { .. })
        ));
        assert_eq!(
            f.db.get_resource("res1").await.unwrap().unwrap().download_count,
            0
        );
    }

    #[tokio::test]
    async fn proxy_requires_every_condition() {
        let (f, resource) = fixture(false).await;
        let on = responder(&f, true);
        let off = responder(&f, false);

        assert!(on.should_proxy(VIA_PROXY, &resource));
        assert!(!off.should_proxy(VIA_PROXY, &resource));
        assert!(!on.should_proxy(
            StreamOptions {
                via_proxy: false,
                use_reverse_proxy: true
            },
            &resource
        ));
        assert!(!on.should_proxy(
            StreamOptions {
                via_proxy: true,
                use_reverse_proxy: false
            },
            &resource
        ));

        let (f, federated) = fixture(true).await;
        assert!(!responder(&f, true).should_proxy(VIA_PROXY, &federated));
    }
}
