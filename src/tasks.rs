//! Background task coordination
//!
//! Zip and bag builds run as spawned tokio tasks whose state lives in the
//! `tasks` table, so a poller only needs the task id. Every zip output gets a
//! deletion timer in `zip_expirations`; the sweeper loop started by
//! [`TaskCoordinator::spawn_sweeper`] purges artifacts whose timer is due.

use crate::archive::{ArchiveBuilder, ZipSpec};
use crate::bag::BagBuilder;
use crate::db::{Database, NewTask};
use crate::error::DownloadError;
use crate::gateway::ResourceGateway;
use crate::storage::ObjectStore;
use crate::types::{Event, TaskId, TaskKind, TaskStatus};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for running builds
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Polling interval of a sync bag request waiting on a pending build
const BAG_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on how long a sync bag request waits on a pending build
const BAG_WAIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A zip build request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipJob {
    /// Owning resource
    pub resource_id: String,
    /// Logical path of the file or folder to archive
    pub source_path: String,
    /// Logical path of the finished zip
    pub output_path: String,
    /// Aggregation whose members are packaged with the main file
    pub aggregation_name: Option<String>,
    /// Source is a single file
    pub single_file: bool,
}

/// Collaborators of a [`TaskCoordinator`]
pub struct CoordinatorParams {
    /// Task and timer persistence
    pub db: Arc<Database>,
    /// Aggregation lookup for zip jobs
    pub gateway: Arc<dyn ResourceGateway>,
    /// Store the sweeper deletes from
    pub store: Arc<dyn ObjectStore>,
    /// Zip builder
    pub archive: Arc<ArchiveBuilder>,
    /// Bag builder
    pub bags: Arc<BagBuilder>,
    /// Event broadcast sender
    pub event_tx: broadcast::Sender<Event>,
    /// Lifetime of staged zips
    pub zip_retention: Duration,
    /// Settle delay before a bag build starts
    pub bag_build_delay: Duration,
    /// Interval between expiry sweeps
    pub sweep_interval: Duration,
}

/// Submits, tracks and expires background builds (cloneable, all state shared)
#[derive(Clone)]
pub struct TaskCoordinator {
    db: Arc<Database>,
    gateway: Arc<dyn ResourceGateway>,
    store: Arc<dyn ObjectStore>,
    archive: Arc<ArchiveBuilder>,
    bags: Arc<BagBuilder>,
    event_tx: broadcast::Sender<Event>,
    zip_retention: Duration,
    bag_build_delay: Duration,
    sweep_interval: Duration,
    /// Cleared during shutdown; submissions are refused afterwards
    accepting_new: Arc<AtomicBool>,
    /// Builds currently running
    active_tasks: Arc<AtomicUsize>,
    /// Stops the sweeper
    cancel_token: CancellationToken,
}

/// Decrements the active-task counter when a build ends, even by panic
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskCoordinator {
    /// Create a coordinator
    pub fn new(params: CoordinatorParams) -> Self {
        Self {
            db: params.db,
            gateway: params.gateway,
            store: params.store,
            archive: params.archive,
            bags: params.bags,
            event_tx: params.event_tx,
            zip_retention: params.zip_retention,
            bag_build_delay: params.bag_build_delay,
            sweep_interval: params.sweep_interval,
            accepting_new: Arc::new(AtomicBool::new(true)),
            active_tasks: Arc::new(AtomicUsize::new(0)),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Fail tasks a previous process left pending
    ///
    /// Without this a dead pending bag task would block bag builds for its
    /// resource forever.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let count = self.db.fail_interrupted_tasks().await?;
        if count > 0 {
            warn!(count, "marked tasks interrupted by restart as failed");
        }
        Ok(count)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.accepting_new.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    async fn schedule_deletion(&self, output_path: &str) -> Result<()> {
        let due_at = chrono::Duration::from_std(self.zip_retention)
            .ok()
            .and_then(|retention| Utc::now().checked_add_signed(retention))
            .ok_or_else(|| {
                Error::Other(format!(
                    "zip retention out of range: {:?}",
                    self.zip_retention
                ))
            })?;
        self.db.schedule_expiration(output_path, due_at).await
    }

    fn bag_task_row(resource_id: &str) -> NewTask {
        NewTask {
            task_id: TaskId::new(),
            kind: TaskKind::Bag,
            resource_id: resource_id.to_string(),
            source_path: resource_id.to_string(),
            output_path: format!("bags/{}.zip", resource_id),
            aggregation_name: None,
            single_file: false,
        }
    }

    /// Queue a zip build and return its task id immediately
    ///
    /// The deletion timer for the output is scheduled whatever the outcome,
    /// and before the task row exists: a task is never left pending without
    /// its timer.
    pub async fn submit_zip(&self, job: ZipJob) -> Result<TaskId> {
        self.ensure_accepting()?;
        self.schedule_deletion(&job.output_path).await?;

        let task_id = TaskId::new();
        self.db
            .insert_task(&NewTask {
                task_id,
                kind: TaskKind::Zip,
                resource_id: job.resource_id.clone(),
                source_path: job.source_path.clone(),
                output_path: job.output_path.clone(),
                aggregation_name: job.aggregation_name.clone(),
                single_file: job.single_file,
            })
            .await?;

        info!(
            task_id = %task_id,
            resource_id = %job.resource_id,
            output = %job.output_path,
            "zip task queued"
        );
        self.emit(Event::TaskQueued {
            task_id,
            kind: TaskKind::Zip,
            resource_id: job.resource_id.clone(),
        });

        let coordinator = self.clone();
        let guard = self.begin_task();
        tokio::spawn(async move {
            let _guard = guard;
            let ok = coordinator.build_zip(&job).await;
            coordinator
                .finish(task_id, TaskKind::Zip, &job.resource_id, ok, &job.output_path)
                .await;
        });

        Ok(task_id)
    }

    /// Build a zip inline; returns whether the artifact was published
    pub async fn run_zip_now(&self, job: &ZipJob) -> Result<bool> {
        self.ensure_accepting()?;
        self.schedule_deletion(&job.output_path).await?;
        let _guard = self.begin_task();
        Ok(self.build_zip(job).await)
    }

    async fn build_zip(&self, job: &ZipJob) -> bool {
        let aggregation = match job.aggregation_name.as_deref() {
            Some(name) => match self.gateway.get_aggregation(&job.resource_id, name).await {
                Ok(aggregation) => aggregation,
                Err(e) => {
                    error!(
                        resource_id = %job.resource_id,
                        aggregation = name,
                        error = %e,
                        "aggregation lookup failed"
                    );
                    return false;
                }
            },
            None => None,
        };

        self.archive
            .build(ZipSpec {
                source_path: &job.source_path,
                output_path: &job.output_path,
                aggregation: aggregation.as_ref(),
                single_file: job.single_file,
            })
            .await
    }

    /// Queue a bag build unless one is already pending for the resource
    ///
    /// Concurrent callers for the same resource all receive the same task id.
    pub async fn submit_bag(&self, resource_id: &str) -> Result<TaskId> {
        self.ensure_accepting()?;

        let candidate = Self::bag_task_row(resource_id);
        let (task_id, created) = self.db.insert_bag_task_if_absent(&candidate).await?;

        if !created {
            debug!(task_id = %task_id, resource_id, "bag build already pending, reusing task");
            return Ok(task_id);
        }

        info!(task_id = %task_id, resource_id, "bag task queued");
        self.emit(Event::TaskQueued {
            task_id,
            kind: TaskKind::Bag,
            resource_id: resource_id.to_string(),
        });

        let coordinator = self.clone();
        let guard = self.begin_task();
        let resource_id = resource_id.to_string();
        let output_path = candidate.output_path;
        tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(coordinator.bag_build_delay).await;
            let ok = coordinator.bags.build(&resource_id).await;
            coordinator
                .finish(task_id, TaskKind::Bag, &resource_id, ok, &output_path)
                .await;
        });

        Ok(task_id)
    }

    /// Build a bag inline; returns whether the bag was published
    ///
    /// Claims the resource's pending bag task like [`Self::submit_bag`]. If
    /// another build already holds it, waits for that build instead of
    /// starting a second one.
    pub async fn run_bag_now(&self, resource_id: &str) -> Result<bool> {
        self.ensure_accepting()?;

        let candidate = Self::bag_task_row(resource_id);
        let (task_id, created) = self.db.insert_bag_task_if_absent(&candidate).await?;

        if !created {
            debug!(task_id = %task_id, resource_id, "bag build already pending, waiting for it");
            return self.wait_for_bag(task_id, resource_id).await;
        }

        info!(task_id = %task_id, resource_id, "bag build running inline");
        self.emit(Event::TaskQueued {
            task_id,
            kind: TaskKind::Bag,
            resource_id: resource_id.to_string(),
        });

        let _guard = self.begin_task();
        let ok = self.bags.build(resource_id).await;
        self.finish(task_id, TaskKind::Bag, resource_id, ok, &candidate.output_path)
            .await;
        Ok(ok)
    }

    async fn wait_for_bag(&self, task_id: TaskId, resource_id: &str) -> Result<bool> {
        match tokio::time::timeout(BAG_WAIT_TIMEOUT, self.bag_outcome(task_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(task_id = %task_id, resource_id, "gave up waiting for pending bag build");
                Ok(false)
            }
        }
    }

    /// Poll a bag task until it leaves pending; true if it succeeded
    async fn bag_outcome(&self, task_id: TaskId) -> Result<bool> {
        loop {
            match self.db.get_task(task_id).await?.map(|task| task.status()) {
                Some(TaskStatus::Pending) => tokio::time::sleep(BAG_WAIT_INTERVAL).await,
                Some(TaskStatus::Succeeded { .. }) => return Ok(true),
                Some(TaskStatus::Failed { .. }) | None => return Ok(false),
            }
        }
    }

    fn begin_task(&self) -> ActiveGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(self.active_tasks.clone())
    }

    async fn finish(
        &self,
        task_id: TaskId,
        kind: TaskKind,
        resource_id: &str,
        ok: bool,
        output_path: &str,
    ) {
        let recorded = if ok {
            self.db.complete_task(task_id, output_path).await
        } else {
            self.db
                .fail_task(task_id, &format!("{} build failed, see server log", kind.as_str()))
                .await
        };
        if let Err(e) = recorded {
            error!(task_id = %task_id, error = %e, "failed to record task result");
        }

        let event = if ok {
            Event::TaskSucceeded {
                task_id,
                kind,
                resource_id: resource_id.to_string(),
            }
        } else {
            Event::TaskFailed {
                task_id,
                kind,
                resource_id: resource_id.to_string(),
            }
        };
        self.emit(event);
    }

    /// Current status of a task
    ///
    /// Failures are logged here with full context; the returned status carries
    /// the stored error only for server-side use.
    pub async fn poll(&self, task_id: TaskId) -> Result<TaskStatus> {
        let task = self
            .db
            .get_task(task_id)
            .await?
            .ok_or_else(|| DownloadError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let status = task.status();
        if let TaskStatus::Failed { error } = &status {
            error!(
                task_id = %task_id,
                kind = task.kind.as_str(),
                resource_id = %task.resource_id,
                source = %task.source_path,
                output = %task.output_path,
                error = %error,
                "polled failed task"
            );
        }
        Ok(status)
    }

    /// Delete every artifact whose deletion timer is due at `now`
    ///
    /// Missing artifacts are not an error. Returns how many timers were retired.
    pub async fn sweep_expired(&self, now: chrono::DateTime<Utc>) -> Result<usize> {
        let due = self.db.due_expirations(now).await?;
        let mut retired = 0;

        for path in due {
            match self.store.delete(&path).await {
                Ok(deleted) => {
                    self.db.remove_expiration(&path).await?;
                    retired += 1;
                    if deleted {
                        debug!(path = %path, "expired zip deleted");
                        self.emit(Event::ArtifactExpired { path });
                    }
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "failed to delete expired zip, will retry");
                }
            }
        }

        Ok(retired)
    }

    /// Start the expiry sweeper loop; it stops on [`TaskCoordinator::shutdown`]
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = coordinator.cancel_token.cancelled() => {
                        debug!("expiry sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        match coordinator.sweep_expired(Utc::now()).await {
                            Ok(0) => {}
                            Ok(count) => info!(count, "expired zips purged"),
                            Err(e) => warn!(error = %e, "expiry sweep failed"),
                        }
                    }
                }
            }
        })
    }

    /// Number of builds currently running
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Stop accepting work, stop the sweeper and wait for running builds
    pub async fn shutdown(&self) {
        self.accepting_new.store(false, Ordering::SeqCst);
        self.cancel_token.cancel();

        let wait = async {
            while self.active_tasks() > 0 {
                debug!(active = self.active_tasks(), "waiting for builds to finish");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, wait).await.is_err() {
            warn!(
                active = self.active_tasks(),
                "timeout waiting for builds, they will be failed on next start"
            );
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
