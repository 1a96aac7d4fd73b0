//! Background migration jobs.
//!
//! Each job runs one [`Orchestrator::migrate_with_cancel`] call on its own
//! tokio task. At most one job per database UUID runs at a time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use dbview_core::DatabaseStatus;

use crate::error::{MigrationError, Result};
use crate::pipeline::{MigrationRequest, Orchestrator};
use crate::progress::TableProgress;
use crate::source::SiardSource;

/// Builds a fresh source for each run of a job.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn SiardSource> + Send + Sync>;

/// Identifies a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobKey {
    /// Database UUID.
    pub database_uuid: String,
    /// Table UUID for single-table jobs.
    pub table_uuid: Option<String>,
}

impl From<&MigrationRequest> for JobKey {
    fn from(request: &MigrationRequest) -> Self {
        Self {
            database_uuid: request.database_uuid.clone(),
            table_uuid: request.table_uuid.clone(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table_uuid {
            Some(table) => write!(f, "{}/{}", self.database_uuid, table),
            None => f.write_str(&self.database_uuid),
        }
    }
}

/// Job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Migration in progress.
    Running,
    /// Migration finished.
    Completed,
    /// Migration stopped by an error.
    Failed,
    /// Migration stopped on request.
    Cancelled,
}

/// Snapshot of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    /// Key.
    pub key: JobKey,
    /// State.
    pub status: JobStatus,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure message.
    pub error: Option<String>,
}

struct JobEntry {
    request: MigrationRequest,
    factory: SourceFactory,
    info: Arc<Mutex<JobInfo>>,
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl JobEntry {
    fn is_running(&self) -> bool {
        self.info.lock().status == JobStatus::Running
    }
}

/// Registry of migration jobs over one orchestrator.
pub struct JobRegistry {
    orchestrator: Arc<Orchestrator>,
    jobs: Mutex<HashMap<JobKey, JobEntry>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Orchestrator running the jobs.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Starts a migration in the background.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::AlreadyRunning`] if a job for the same
    /// database is running.
    pub fn start(&self, request: MigrationRequest, factory: SourceFactory) -> Result<JobInfo> {
        let mut jobs = self.jobs.lock();
        if jobs
            .values()
            .any(|job| job.request.database_uuid == request.database_uuid && job.is_running())
        {
            return Err(MigrationError::AlreadyRunning(request.database_uuid));
        }

        let key = JobKey::from(&request);
        let info = Arc::new(Mutex::new(JobInfo {
            key: key.clone(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }));
        let (cancel, cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(run_job(
            Arc::clone(&self.orchestrator),
            request.clone(),
            Arc::clone(&factory),
            Arc::clone(&info),
            cancel_rx,
        ));

        let snapshot = info.lock().clone();
        jobs.insert(
            key.clone(),
            JobEntry {
                request,
                factory,
                info,
                cancel,
                handle: Some(handle),
            },
        );
        info!(job = %key, "Started job");
        Ok(snapshot)
    }

    /// Asks a running job to stop. The job ends `CANCELLED` at its next
    /// cancellation check.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::JobNotFound`] or
    /// [`MigrationError::JobNotRunning`].
    pub fn stop(&self, key: &JobKey) -> Result<()> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(key)
            .ok_or_else(|| MigrationError::JobNotFound(key.to_string()))?;
        if !job.is_running() {
            return Err(MigrationError::JobNotRunning(key.to_string()));
        }
        job.cancel.send_replace(true);
        info!(job = %key, "Stop requested");
        Ok(())
    }

    /// Deletes everything the job wrote and runs it again from scratch.
    ///
    /// A running job is stopped and awaited first.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::JobNotFound`] for an unknown key, or the
    /// store error of the purge.
    pub async fn restart(&self, key: &JobKey) -> Result<JobInfo> {
        let (request, factory) = {
            let jobs = self.jobs.lock();
            let job = jobs
                .get(key)
                .ok_or_else(|| MigrationError::JobNotFound(key.to_string()))?;
            if job.is_running() {
                job.cancel.send_replace(true);
            }
            (job.request.clone(), Arc::clone(&job.factory))
        };
        self.wait(key).await?;

        let removed = self
            .orchestrator
            .manager()
            .delete_database(&request.database_uuid)
            .await?;
        self.orchestrator.tracker().remove(&request.database_uuid);
        info!(job = %key, collections = removed, "Purged database before restart");

        self.start(request, factory)
    }

    /// Snapshots of every job, oldest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobInfo> {
        let mut infos: Vec<JobInfo> = self
            .jobs
            .lock()
            .values()
            .map(|job| job.info.lock().clone())
            .collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.key.cmp(&b.key)));
        infos
    }

    /// Snapshot of one job.
    #[must_use]
    pub fn job(&self, key: &JobKey) -> Option<JobInfo> {
        self.jobs.lock().get(key).map(|job| job.info.lock().clone())
    }

    /// Per-table progress of a database; empty when unknown.
    #[must_use]
    pub fn progress(&self, database_uuid: &str) -> Vec<TableProgress> {
        self.orchestrator.progress(database_uuid)
    }

    /// Waits for a job to end and returns its final snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::JobNotFound`] for an unknown key.
    pub async fn wait(&self, key: &JobKey) -> Result<JobInfo> {
        let (handle, info) = {
            let mut jobs = self.jobs.lock();
            let job = jobs
                .get_mut(key)
                .ok_or_else(|| MigrationError::JobNotFound(key.to_string()))?;
            (job.handle.take(), Arc::clone(&job.info))
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(job = %key, error = %e, "Job task ended abnormally");
                let mut info = info.lock();
                if info.status == JobStatus::Running {
                    info.status = JobStatus::Failed;
                    info.finished_at = Some(Utc::now());
                    info.error = Some(e.to_string());
                }
            }
        }
        let snapshot = info.lock().clone();
        Ok(snapshot)
    }

    /// Marks databases left `INGESTING` by an earlier process as `ERROR`.
    ///
    /// Databases with a running job in this registry are left alone.
    /// Returns the UUIDs that were changed.
    pub async fn reconcile(&self) -> Result<Vec<String>> {
        let manager = self.orchestrator.manager();
        let mut changed = Vec::new();

        for uuid in manager.database_uuids().await? {
            if self.is_running(&uuid) {
                continue;
            }
            let Some(mut database) = manager.get_database(&uuid).await? else {
                continue;
            };
            if database.status() != DatabaseStatus::Ingesting {
                continue;
            }

            database.transition(DatabaseStatus::Error)?;
            manager.put_database(&database).await?;
            warn!(database = %uuid, "Interrupted migration marked as failed");
            changed.push(uuid);
        }
        Ok(changed)
    }

    fn is_running(&self, database_uuid: &str) -> bool {
        self.jobs
            .lock()
            .values()
            .any(|job| job.request.database_uuid == database_uuid && job.is_running())
    }
}

async fn run_job(
    orchestrator: Arc<Orchestrator>,
    request: MigrationRequest,
    factory: SourceFactory,
    info: Arc<Mutex<JobInfo>>,
    cancel: watch::Receiver<bool>,
) {
    let mut source = factory();
    let result = orchestrator
        .migrate_with_cancel(source.as_mut(), &request, Some(cancel))
        .await;

    let mut info = info.lock();
    info.finished_at = Some(Utc::now());
    match result {
        Ok(_) => info.status = JobStatus::Completed,
        Err(MigrationError::Cancelled) => info.status = JobStatus::Cancelled,
        Err(e) => {
            info.status = JobStatus::Failed;
            info.error = Some(e.to_string());
        }
    }
}
