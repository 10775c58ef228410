//! Application state for the API server

use crate::{Config, DownloadService};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned per request (Arc clones only).
#[derive(Clone)]
pub struct AppState {
    /// The download pipeline
    pub service: Arc<DownloadService>,

    /// Configuration, read-only at runtime
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: Arc<DownloadService>, config: Arc<Config>) -> Self {
        Self { service, config }
    }
}
