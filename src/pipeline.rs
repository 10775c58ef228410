//! The download pipeline
//!
//! [`DownloadService`] wires the classifier, builders, task coordinator and
//! streaming responder together and implements the request flow:
//!
//! 1. parse the path (no I/O)
//! 2. authorize VIEW on the resource; nothing else runs if this fails
//! 3. classify against the store and aggregation table
//! 4. zip, bag or regular branch
//! 5. hand the finished artifact to the streaming responder

use crate::archive::ArchiveBuilder;
use crate::bag::BagBuilder;
use crate::classifier::{Classification, Classifier, DownloadMode, parse_download_path};
use crate::config::Config;
use crate::db::Database;
use crate::error::BuildError;
use crate::gateway::{DbResourceGateway, ResourceGateway};
use crate::metadata::{MetadataWriter, XmlMetadataWriter, is_resource_metadata_path};
use crate::storage::{LocalObjectStore, ObjectStore};
use crate::streaming::{StreamOptions, StreamingResponder};
use crate::tasks::{CoordinatorParams, TaskCoordinator, ZipJob};
use crate::types::{DownloadFlags, Event, Permission, Principal, Resource, TaskId, TaskKind, TaskStatus};
use crate::{Error, Result};
use axum::response::Response;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Per-request switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Request came through the REST endpoint
    pub rest_call: bool,
    /// Build archives in the background instead of blocking the request
    pub use_async: bool,
    /// Allow delegation to the reverse proxy
    pub use_reverse_proxy: bool,
    /// Request carried the proxy trust header
    pub via_proxy: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            rest_call: false,
            use_async: true,
            use_reverse_proxy: true,
            via_proxy: false,
        }
    }
}

/// What the caller should get
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Send the caller elsewhere (reference aggregation)
    Redirect(String),
    /// A background build was queued; poll `task_id` and fetch `download_path` later
    Pending {
        /// Zip or bag
        kind: TaskKind,
        /// Task to poll
        task_id: TaskId,
        /// Resource the build belongs to
        resource_id: String,
        /// Public URL path of the artifact once ready
        download_path: String,
    },
    /// The artifact exists and can be streamed
    Ready {
        /// Authorized resource
        resource: Resource,
        /// Logical path of the artifact
        output_path: String,
    },
}

/// Download pipeline service (cloneable, all state shared)
#[derive(Clone)]
pub struct DownloadService {
    /// Database handle, public for integration tests and embedding applications
    pub db: Arc<Database>,
    config: Arc<Config>,
    store: Arc<dyn ObjectStore>,
    gateway: Arc<dyn ResourceGateway>,
    classifier: Arc<Classifier>,
    bags: Arc<BagBuilder>,
    tasks: TaskCoordinator,
    streaming: Arc<StreamingResponder>,
    event_tx: broadcast::Sender<Event>,
}

impl DownloadService {
    /// Create a service with the local vault store and database-backed gateway
    ///
    /// Opens (and migrates) the database, fails tasks interrupted by a
    /// previous run, and starts the expiry sweeper.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn ObjectStore> =
            Arc::new(LocalObjectStore::new(config.storage.root.clone()).await?);
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let gateway: Arc<dyn ResourceGateway> = Arc::new(DbResourceGateway::new(db.clone()));
        let metadata: Arc<dyn MetadataWriter> = Arc::new(XmlMetadataWriter::new(store.clone()));

        Self::with_collaborators(config, db, store, gateway, metadata).await
    }

    /// Create a service over caller-supplied collaborators
    pub async fn with_collaborators(
        config: Config,
        db: Arc<Database>,
        store: Arc<dyn ObjectStore>,
        gateway: Arc<dyn ResourceGateway>,
        metadata: Arc<dyn MetadataWriter>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.staging_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create staging directory '{}': {}",
                        config.storage.staging_dir.display(),
                        e
                    ),
                ))
            })?;

        // Buffer of 1000 events per subscriber before lagging
        let (event_tx, _rx) = broadcast::channel(1000);

        let staging = config.storage.staging_dir.clone();
        let archive = Arc::new(ArchiveBuilder::new(store.clone(), staging.clone()));
        let bags = Arc::new(BagBuilder::new(
            store.clone(),
            gateway.clone(),
            metadata,
            staging,
        ));
        let tasks = TaskCoordinator::new(CoordinatorParams {
            db: db.clone(),
            gateway: gateway.clone(),
            store: store.clone(),
            archive,
            bags: bags.clone(),
            event_tx: event_tx.clone(),
            zip_retention: config.download.zip_retention,
            bag_build_delay: config.download.bag_build_delay,
            sweep_interval: config.download.sweep_interval,
        });
        let classifier = Arc::new(Classifier::new(store.clone(), gateway.clone()));
        let streaming = Arc::new(StreamingResponder::new(
            store.clone(),
            gateway.clone(),
            config.proxy.clone(),
        ));

        tasks.recover_interrupted().await?;
        tasks.spawn_sweeper();

        info!(
            store = store.name(),
            use_async = config.download.use_async,
            sendfile_on = config.proxy.sendfile_on,
            "download service started"
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            store,
            gateway,
            classifier,
            bags,
            tasks,
            streaming,
            event_tx,
        })
    }

    /// Service configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Object store the service reads and publishes through
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Task coordinator, for sweeps and inspection
    pub fn tasks(&self) -> &TaskCoordinator {
        &self.tasks
    }

    /// Subscribe to pipeline events
    ///
    /// Each subscriber receives every event; one that falls more than 1000
    /// events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Run the pipeline for one request
    pub async fn download(
        &self,
        principal: &Principal,
        raw_path: &str,
        flags: DownloadFlags,
        options: DownloadOptions,
    ) -> Result<DownloadOutcome> {
        let parsed = parse_download_path(raw_path)?;
        let resource = self
            .gateway
            .authorize(principal, &parsed.resource_id, Permission::View)
            .await?;

        let target = match self.classifier.classify(&parsed, flags, &resource).await? {
            Classification::Redirect(url) => return Ok(DownloadOutcome::Redirect(url)),
            Classification::Resolved(target) => target,
        };
        debug!(
            resource_id = %resource.id,
            mode = ?target.mode,
            source = %target.source_path,
            output = %target.output_path,
            zip = target.zip,
            "download classified"
        );

        match target.mode {
            DownloadMode::Regular if target.zip => {
                let job = ZipJob {
                    resource_id: resource.id.clone(),
                    source_path: target.source_path,
                    output_path: target.output_path,
                    aggregation_name: target.aggregation_name,
                    single_file: target.is_single_file,
                };

                if options.use_async {
                    let task_id = self.tasks.submit_zip(job.clone()).await?;
                    return Ok(DownloadOutcome::Pending {
                        kind: TaskKind::Zip,
                        task_id,
                        resource_id: resource.id,
                        download_path: self.download_path(&job.output_path, options),
                    });
                }

                if !self.tasks.run_zip_now(&job).await? {
                    return Err(BuildError::ZipFailed {
                        output_path: job.output_path,
                    }
                    .into());
                }
                Ok(DownloadOutcome::Ready {
                    resource,
                    output_path: job.output_path,
                })
            }
            DownloadMode::Bag => {
                let plan = self.bags.prepare(&resource).await?;
                if plan.needs_build {
                    if options.use_async {
                        let task_id = self.tasks.submit_bag(&resource.id).await?;
                        return Ok(DownloadOutcome::Pending {
                            kind: TaskKind::Bag,
                            task_id,
                            download_path: self.download_path(&target.output_path, options),
                            resource_id: resource.id,
                        });
                    }
                    if !self.tasks.run_bag_now(&resource.id).await? {
                        return Err(BuildError::BagFailed {
                            resource_id: resource.id,
                        }
                        .into());
                    }
                }
                Ok(DownloadOutcome::Ready {
                    resource,
                    output_path: target.output_path,
                })
            }
            DownloadMode::Regular => {
                if is_resource_metadata_path(&resource.id, &target.source_path)
                    && resource.metadata_dirty.needs_work()
                {
                    self.bags.refresh_metadata(&resource).await?;
                }
                let _ = self.event_tx.send(Event::FileDownloaded {
                    resource_id: resource.id.clone(),
                    file_name: parsed.file_name().to_string(),
                });
                Ok(DownloadOutcome::Ready {
                    resource,
                    output_path: target.output_path,
                })
            }
            DownloadMode::ZipFollowup => Ok(DownloadOutcome::Ready {
                resource,
                output_path: target.output_path,
            }),
        }
    }

    /// Stream a ready artifact
    pub async fn stream(
        &self,
        resource: &Resource,
        output_path: &str,
        options: DownloadOptions,
    ) -> Result<Response> {
        self.streaming
            .respond(
                resource,
                output_path,
                StreamOptions {
                    via_proxy: options.via_proxy,
                    use_reverse_proxy: options.use_reverse_proxy,
                },
            )
            .await
    }

    /// Status of a background task
    pub async fn poll_task(&self, task_id: TaskId) -> Result<TaskStatus> {
        self.tasks.poll(task_id).await
    }

    /// Public URL path of an artifact for the endpoint the request used
    pub fn download_path(&self, output_path: &str, options: DownloadOptions) -> String {
        let root = if options.rest_call {
            &self.config.download.rest_download_root
        } else {
            &self.config.download.download_root
        };
        format!("{}/{}", root.trim_end_matches('/'), output_path)
    }

    /// Stop accepting work and wait for running builds
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown");
        self.tasks.shutdown().await;
        let _ = self.event_tx.send(Event::Shutdown);
        info!("Graceful shutdown complete");
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
