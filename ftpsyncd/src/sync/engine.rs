use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use ftpsync_core::FtpError;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionManager, ConnectionSettings, ConnectionState};
use super::folder_cache::FolderCache;
use super::listing::collect_tree;
use super::paths::{
    PathError, folder_prefixes, normalize_listing_root, normalize_remote_path, parent_folder,
    validate_remote_target,
};
use super::queue::{RetrySchedule, SyncJob};
use super::session::{Dialer, RemoteSession};
use super::supervisor::ProcessSupervisor;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid remote path: {0}")]
    Path(#[from] PathError),
    #[error("local path is empty")]
    EmptyLocalPath,
    #[error("remote endpoint is not connected")]
    NotConnected,
    #[error("sync engine is stopping")]
    Stopping,
    #[error("remote error: {0}")]
    Remote(#[from] FtpError),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub connection: ConnectionSettings,
    pub idle_check_interval: Duration,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub connection: ConnectionState,
    pub cached_folders: usize,
    pub queued_jobs: usize,
    pub scheduled_jobs: usize,
    pub helper_pid: Option<u32>,
    pub stopping: bool,
}

struct Workers {
    cancel: CancellationToken,
    stop: oneshot::Sender<()>,
    scheduler: JoinHandle<()>,
    worker: JoinHandle<()>,
}

enum Lifecycle {
    Idle(mpsc::Receiver<SyncJob>),
    Running(Workers),
    Stopped,
}

/// Replicates local files to the remote endpoint.
///
/// All remote operations, including the worker's, go through one lock that
/// guards the connection and its folder cache together.
pub struct SyncEngine {
    config: EngineConfig,
    remote: Mutex<ConnectionManager>,
    supervisor: Arc<ProcessSupervisor>,
    schedule: RetrySchedule,
    jobs: mpsc::Sender<SyncJob>,
    stopping: AtomicBool,
    lifecycle: StdMutex<Lifecycle>,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        dialer: Arc<dyn Dialer>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        let (jobs, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let remote = ConnectionManager::new(
            config.connection.clone(),
            dialer,
            Arc::clone(&supervisor),
        );
        Self {
            config,
            remote: Mutex::new(remote),
            supervisor,
            schedule: RetrySchedule::default(),
            jobs,
            stopping: AtomicBool::new(false),
            lifecycle: StdMutex::new(Lifecycle::Idle(receiver)),
        }
    }

    /// Spawns the scheduler and the worker loop. Only the first call has an
    /// effect.
    pub fn start(self: &Arc<Self>) {
        let mut lifecycle = self.lock_lifecycle();
        let receiver = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Idle(receiver) => receiver,
            other => {
                *lifecycle = other;
                tracing::warn!("sync engine already started");
                return;
            }
        };

        let cancel = CancellationToken::new();
        let (stop, stop_rx) = oneshot::channel();
        let scheduler = tokio::spawn(Arc::clone(self).run_scheduler(cancel.clone()));
        let worker = tokio::spawn(Arc::clone(self).run_worker(receiver, stop_rx));
        *lifecycle = Lifecycle::Running(Workers {
            cancel,
            stop,
            scheduler,
            worker,
        });
        tracing::info!(
            queue_capacity = self.config.queue_capacity,
            idle_check = ?self.config.idle_check_interval,
            "sync engine started"
        );
    }

    /// Drains queued work, closes the connection and stops the helper.
    /// Effective once; later calls return immediately.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock_lifecycle(), Lifecycle::Stopped);
        if matches!(previous, Lifecycle::Stopped) {
            return;
        }
        self.stopping.store(true, Ordering::SeqCst);
        tracing::info!("sync engine stopping");

        match previous {
            Lifecycle::Running(workers) => {
                workers.cancel.cancel();
                if let Err(err) = workers.scheduler.await {
                    tracing::warn!("scheduler task failed: {err}");
                }
                let _ = workers.stop.send(());
                if let Err(err) = workers.worker.await {
                    tracing::warn!("worker task failed: {err}");
                }
            }
            Lifecycle::Idle(mut receiver) => self.drain(&mut receiver).await,
            Lifecycle::Stopped => {}
        }

        self.remote.lock().await.shut_down().await;
        self.supervisor.terminate().await;
        tracing::info!("sync engine stopped");
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Transfers `local` to `remote` before returning.
    ///
    /// `Ok(false)` means the transfer did not happen now; a retry may have
    /// been scheduled.
    pub async fn sync_now(&self, local: &Path, remote: &str) -> Result<bool, SyncError> {
        let normalized = validate_transfer(local, remote)?;
        if self.is_stopping() {
            return Err(SyncError::Stopping);
        }
        Ok(self.transfer(local, &normalized, 1).await)
    }

    /// Schedules a transfer after `delay` and returns at once. `Ok(false)`
    /// means the job was dropped: the retry limit is exceeded or the engine
    /// is stopping.
    pub fn sync_async(
        &self,
        local: &Path,
        remote: &str,
        attempt: u32,
        delay: Duration,
    ) -> Result<bool, SyncError> {
        let normalized = validate_transfer(local, remote)?;
        Ok(self.schedule_job(SyncJob::new(local, normalized, attempt), delay))
    }

    pub async fn list_remote(&self, folder: &str, recursive: bool) -> Result<Vec<String>, SyncError> {
        if folder.is_empty() {
            return Err(PathError::Empty.into());
        }
        let root = normalize_listing_root(folder);
        if self.is_stopping() {
            return Err(SyncError::Stopping);
        }

        let mut remote = self.remote.lock().await;
        if !remote.ensure_live().await {
            return Err(SyncError::NotConnected);
        }
        let Some((session, folders)) = remote.parts() else {
            return Err(SyncError::NotConnected);
        };
        match collect_tree(session, folders, &root, recursive).await {
            Ok(paths) => {
                tracing::debug!(folder = %root, recursive, count = paths.len(), "listed remote folder");
                Ok(paths)
            }
            Err(err) => {
                tracing::warn!(folder = %root, "listing failed: {err}");
                remote.observe_error(&err);
                Err(err.into())
            }
        }
    }

    pub async fn delete_remote(&self, path: &str) -> bool {
        if self.is_stopping() {
            tracing::warn!(path, "delete refused, sync engine stopping");
            return false;
        }
        let mut remote = self.remote.lock().await;
        if !remote.ensure_live().await {
            tracing::warn!(path, "delete skipped, ftp server unreachable");
            return false;
        }
        let Some((session, _)) = remote.parts() else {
            return false;
        };
        match session.delete(path).await {
            Ok(()) => {
                tracing::info!(path, "deleted remote file");
                true
            }
            Err(err) => {
                tracing::warn!(path, "delete failed: {err}");
                remote.observe_error(&err);
                false
            }
        }
    }

    /// `false` covers both "absent" and "could not ask".
    pub async fn exists_remote(&self, path: &str) -> bool {
        if self.is_stopping() {
            return false;
        }
        let mut remote = self.remote.lock().await;
        if !remote.ensure_live().await {
            return false;
        }
        let Some((session, _)) = remote.parts() else {
            return false;
        };
        match session.size(path).await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(path, "size check failed: {err}");
                remote.observe_error(&err);
                false
            }
        }
    }

    pub async fn try_idle_disconnect(&self) {
        self.remote.lock().await.try_idle_disconnect().await;
    }

    pub async fn status(&self) -> EngineStatus {
        let remote = self.remote.lock().await;
        EngineStatus {
            connection: remote.state(),
            cached_folders: remote.folders().len(),
            queued_jobs: self.jobs.max_capacity() - self.jobs.capacity(),
            scheduled_jobs: self.schedule.len(),
            helper_pid: self.supervisor.current().map(|handle| handle.pid),
            stopping: self.is_stopping(),
        }
    }

    fn schedule_job(&self, job: SyncJob, delay: Duration) -> bool {
        if job.attempt > self.config.max_retry_attempts {
            tracing::error!(
                local = %job.local_path.display(),
                remote = %job.remote_path,
                attempt = job.attempt,
                "sync gave up after too many attempts"
            );
            return false;
        }
        if self.is_stopping() {
            tracing::warn!(
                local = %job.local_path.display(),
                remote = %job.remote_path,
                attempt = job.attempt,
                "sync engine stopping, job dropped"
            );
            return false;
        }
        tracing::debug!(
            remote = %job.remote_path,
            attempt = job.attempt,
            delay = ?delay,
            "sync job scheduled"
        );
        self.schedule.push(job, Instant::now() + delay);
        true
    }

    async fn transfer(&self, local: &Path, remote_path: &str, attempt: u32) -> bool {
        let mut remote = self.remote.lock().await;
        if !remote.ensure_live().await {
            drop(remote);
            tracing::warn!(
                local = %local.display(),
                attempt,
                "sync failed, ftp server unreachable"
            );
            self.schedule_job(
                SyncJob::new(local, remote_path, attempt + 1),
                self.config.retry_delay,
            );
            return false;
        }
        let Some((session, folders)) = remote.parts() else {
            return false;
        };

        provision_parent(session, folders, remote_path, attempt > 1).await;

        let mut file = match tokio::fs::File::open(local).await {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(local = %local.display(), "open failed: {err}");
                return false;
            }
        };

        match session.store(remote_path, &mut file).await {
            Ok(bytes) => {
                tracing::info!(
                    local = %local.display(),
                    remote = remote_path,
                    bytes,
                    attempt,
                    "sync complete"
                );
                true
            }
            Err(err) => {
                tracing::warn!(
                    local = %local.display(),
                    remote = remote_path,
                    attempt,
                    "sync failed: {err}"
                );
                remote.observe_error(&err);
                drop(remote);
                self.schedule_job(SyncJob::new(local, remote_path, attempt + 1), Duration::ZERO);
                false
            }
        }
    }

    async fn process(&self, job: SyncJob) {
        self.transfer(&job.local_path, &job.remote_path, job.attempt)
            .await;
    }

    async fn run_scheduler(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            match self.schedule.next_due() {
                Some(due) if due <= Instant::now() => {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        permit = self.jobs.reserve() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return,
                        },
                    };
                    if let Some(job) = self.schedule.pop_due(Instant::now()) {
                        permit.send(job);
                    }
                }
                Some(due) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep_until(due) => {}
                        _ = self.schedule.changed() => {}
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        _ = self.schedule.changed() => {}
                    }
                }
            }
        }
    }

    async fn run_worker(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<SyncJob>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let period = self.config.idle_check_interval;
        let mut idle = tokio::time::interval_at(Instant::now() + period, period);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = idle.tick() => self.try_idle_disconnect().await,
                job = receiver.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => break,
                },
            }
        }

        self.drain(&mut receiver).await;
    }

    /// Attempts everything already queued or due once more; anything
    /// scheduled for later is discarded.
    async fn drain(&self, receiver: &mut mpsc::Receiver<SyncJob>) {
        let mut drained = 0usize;
        while let Ok(job) = receiver.try_recv() {
            self.process(job).await;
            drained += 1;
        }
        for job in self.schedule.drain_due(Instant::now()) {
            self.process(job).await;
            drained += 1;
        }
        for job in self.schedule.drain_all() {
            tracing::warn!(
                local = %job.local_path.display(),
                remote = %job.remote_path,
                attempt = job.attempt,
                "pending retry discarded at shutdown"
            );
        }
        tracing::info!(drained, "sync queue drained");
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_transfer(local: &Path, remote: &str) -> Result<String, SyncError> {
    if local.as_os_str().is_empty() {
        return Err(SyncError::EmptyLocalPath);
    }
    validate_remote_target(remote)?;
    Ok(normalize_remote_path(remote)?)
}

/// Creates the parent folder of `remote_path` one component at a time.
/// Errors other than "already exists" are logged and ignored; the transfer
/// itself reports the real problem.
async fn provision_parent(
    session: &mut dyn RemoteSession,
    folders: &mut FolderCache,
    remote_path: &str,
    force: bool,
) {
    let Some(parent) = parent_folder(remote_path) else {
        return;
    };
    if folders.knows(&parent) && !force {
        return;
    }
    for folder in folder_prefixes(&parent) {
        if folders.knows(&folder) && !force {
            continue;
        }
        match session.make_dir(&folder).await {
            Ok(()) => {
                tracing::info!(folder = %folder, "mkdir succeeded");
                folders.remember(folder);
            }
            Err(err) if err.is_already_exists() => {
                tracing::debug!(folder = %folder, "folder already exists");
                folders.remember(folder);
            }
            Err(err) => {
                tracing::warn!(folder = %folder, "mkdir failed: {err}");
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
