//! Configuration types for irods-stage

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Object store configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct StorageConfig {
    /// Root of the vault that logical paths resolve against (default: "./vault")
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Local scratch space for assembling archives (default: "./staging")
    ///
    /// Archives are built here and only then published into the vault, so
    /// readers never see a half-written zip.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            staging_dir: default_staging_dir(),
        }
    }
}

/// Download pipeline behavior
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// How long a staged zip lives before the expiry sweeper purges it (default: 24h)
    #[serde(default = "default_zip_retention", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub zip_retention: Duration,

    /// Settle delay before a bag build starts (default: 3s)
    #[serde(default = "default_bag_build_delay", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub bag_build_delay: Duration,

    /// Interval between expiry sweeps (default: 60s)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub sweep_interval: Duration,

    /// Build zips and bags in the background (default: true)
    ///
    /// When false, the HTTP handlers block until the archive exists.
    #[serde(default = "default_true")]
    pub use_async: bool,

    /// URL prefix of resource landing pages, used for interactive not-ready redirects
    #[serde(default = "default_landing_root")]
    pub landing_root: String,

    /// Public URL prefix of the REST download endpoint, reported in not-ready responses
    #[serde(default = "default_rest_download_root")]
    pub rest_download_root: String,

    /// Public URL prefix of the interactive download endpoint
    #[serde(default = "default_download_root")]
    pub download_root: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            zip_retention: default_zip_retention(),
            bag_build_delay: default_bag_build_delay(),
            sweep_interval: default_sweep_interval(),
            use_async: true,
            landing_root: default_landing_root(),
            rest_download_root: default_rest_download_root(),
            download_root: default_download_root(),
        }
    }
}

/// Reverse-proxy (X-Accel-Redirect) delegation
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProxyConfig {
    /// Deployment has an nginx front end able to serve the vault directly (default: false)
    #[serde(default)]
    pub sendfile_on: bool,

    /// Internal nginx location mapped onto the vault (default: "/irods-data")
    #[serde(default = "default_data_uri")]
    pub data_uri: String,

    /// Header that only the trusted proxy sets on forwarded requests
    #[serde(default = "default_trust_header")]
    pub trust_header: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sendfile_on: false,
            data_uri: default_data_uri(),
            trust_header: default_trust_header(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./irods-stage.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// API and external server integration configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ServerIntegrationConfig {
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Header carrying the authenticated user name, set by the front end
    #[serde(default = "default_user_header")]
    pub user_header: String,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            user_header: default_user_header(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Main configuration for the download service
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Object store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Pipeline behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Reverse-proxy delegation
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Database settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerIntegrationConfig,
}

impl Config {
    /// Load a JSON configuration file; missing keys take their defaults
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse {}: {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.zip_retention.is_zero() {
            return Err(Error::Config {
                message: "zip retention must be positive".to_string(),
                key: Some("download.zip_retention".to_string()),
            });
        }
        if self.download.sweep_interval.is_zero() {
            return Err(Error::Config {
                message: "sweep interval must be positive".to_string(),
                key: Some("download.sweep_interval".to_string()),
            });
        }
        if self.proxy.trust_header.trim().is_empty() {
            return Err(Error::Config {
                message: "proxy trust header must not be empty".to_string(),
                key: Some("proxy.trust_header".to_string()),
            });
        }
        if self.server.api.user_header.trim().is_empty() {
            return Err(Error::Config {
                message: "user header must not be empty".to_string(),
                key: Some("server.api.user_header".to_string()),
            });
        }
        Ok(())
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./vault")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./irods-stage.db")
}

fn default_true() -> bool {
    true
}

fn default_zip_retention() -> Duration {
    Duration::from_secs(60 * 60 * 24)
}

fn default_bag_build_delay() -> Duration {
    Duration::from_secs(3)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_landing_root() -> String {
    "/resource".to_string()
}

fn default_download_root() -> String {
    "/download".to_string()
}

fn default_rest_download_root() -> String {
    "/rest_download".to_string()
}

fn default_data_uri() -> String {
    "/irods-data".to_string()
}

fn default_trust_header() -> String {
    "x-django-reverse-proxy".to_string()
}

fn default_user_header() -> String {
    "x-remote-user".to_string()
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
