//! # irods-stage
//!
//! Download and zip-staging pipeline for resources held in an iRODS-style
//! object store.
//!
//! Per request the pipeline decides whether content is streamed directly,
//! zipped in the background, or served as a (re)generated BagIt archive.
//! Heavy work runs as tracked background tasks that callers poll; finished
//! artifacts are streamed either directly or through an nginx
//! `X-Accel-Redirect`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use irods_stage::{Config, DownloadFlags, DownloadOptions, DownloadOutcome, DownloadService, Principal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = DownloadService::new(Config::default()).await?;
//!
//!     let mut events = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcome = service
//!         .download(
//!             &Principal::Anonymous,
//!             "bags/abc123.zip",
//!             DownloadFlags::default(),
//!             DownloadOptions::default(),
//!         )
//!         .await?;
//!     if let DownloadOutcome::Pending { task_id, .. } = outcome {
//!         println!("poll {}", task_id);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// HTTP API
pub mod api;
/// Zip archive construction
pub mod archive;
/// BagIt archive freshness and construction
pub mod bag;
/// Request path parsing and classification
pub mod classifier;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Resource lookup and authorization
pub mod gateway;
/// Resource-level metadata documents
pub mod metadata;
/// Request orchestration
pub mod pipeline;
/// Object store abstraction
pub mod storage;
/// Response streaming
pub mod streaming;
/// Background task coordination
pub mod tasks;
/// Core types and events
pub mod types;

pub use config::Config;
pub use db::Database;
pub use error::{
    ApiError, BuildError, DatabaseError, DownloadError, Error, ErrorDetail, Result, StorageError,
    ToHttpStatus,
};
pub use gateway::{DbResourceGateway, ResourceGateway};
pub use metadata::{MetadataWriter, XmlMetadataWriter};
pub use pipeline::{DownloadOptions, DownloadOutcome, DownloadService};
pub use storage::{LocalObjectStore, ObjectStore};
pub use types::{
    Aggregation, DownloadFlags, Event, FlagState, Permission, Principal, Resource, ResourceKind,
    TaskId, TaskKind, TaskStatus,
};

/// Wait for a termination signal, then shut the service down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// ```no_run
/// use irods_stage::{Config, DownloadService, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = DownloadService::new(Config::default()).await?;
///     run_with_shutdown(service).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: DownloadService) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
