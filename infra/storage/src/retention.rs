//! Age-based cleanup of completed uploads and abandoned temp files.
//!
//! The sweep runs as one Tokio task per started [`FileStorage`](crate::FileStorage). It scans at
//! most once per [`RetentionPolicy::scan_interval`] and otherwise sleeps in slices of
//! [`RetentionPolicy::poll_interval`], racing every sleep against the stop signal so that
//! `stop()` never waits out a full slice.

use crate::error::{StorageError, StorageErrorExt};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const MINUTE: Duration = Duration::from_secs(60);

/// Timing knobs of the retention sweep. Defaults: scan every 10 minutes, poll the stop signal
/// every 60 seconds, back off 60 seconds after a failed scan, expire temp files after
/// 15 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub scan_interval: Duration,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub temp_max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            scan_interval: MINUTE * 10,
            poll_interval: MINUTE,
            error_backoff: MINUTE,
            temp_max_age: MINUTE * 15,
        }
    }
}

impl RetentionPolicy {
    #[must_use = "Sets how often the sweep scans the storage directories"]
    pub const fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    #[must_use = "Sets the longest wait between stop-signal checks"]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use = "Sets the pause after a failed scan"]
    pub const fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    #[must_use = "Sets the age after which temp files count as abandoned"]
    pub const fn with_temp_max_age(mut self, age: Duration) -> Self {
        self.temp_max_age = age;
        self
    }

    /// Rejects timings that would turn the sweep into a busy loop.
    ///
    /// `poll_interval` and `error_backoff` bound every wait of the sweep and must be non-zero.
    /// A zero `scan_interval` is fine: it only means "scan on every poll".
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidConfiguration`] naming the offending field.
    pub fn validate(&self) -> Result<(), StorageError> {
        let waits = [("poll_interval", self.poll_interval), ("error_backoff", self.error_backoff)];
        for (field, value) in waits {
            if value.is_zero() {
                return Err(StorageError::InvalidConfiguration {
                    message: format!("{field} must be greater than zero").into(),
                    context: None,
                });
            }
        }
        Ok(())
    }
}

/// Outcome of one retention scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files deleted because they outlived their window.
    pub removed: usize,
    /// Expired files that could not be deleted; they are retried on the next scan.
    pub failed: usize,
}

/// Where a sweep manager is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Everything a scan needs, owned so the sweep task holds no reference to the manager.
#[derive(Debug, Clone)]
pub(crate) struct RetentionScope {
    pub(crate) storage_directory: PathBuf,
    pub(crate) temp_directory: PathBuf,
    pub(crate) max_store_time: Duration,
    pub(crate) policy: RetentionPolicy,
}

impl RetentionScope {
    /// Deletes expired completed files, then expired temp files.
    ///
    /// Missing directories count as empty. A file that disappears mid-scan is ignored.
    pub(crate) async fn check(&self) -> Result<SweepReport, StorageError> {
        let scope = self.clone();
        tokio::task::spawn_blocking(move || -> Result<SweepReport, StorageError> {
            let now = SystemTime::now();
            let mut report = SweepReport::default();
            expire(&scope.storage_directory, scope.max_store_time, now, "file", &mut report)?;
            expire(&scope.temp_directory, scope.policy.temp_max_age, now, "temp file", &mut report)?;
            Ok(report)
        })
        .await
        .map_err(|e| StorageError::Internal {
            message: e.to_string().into(),
            context: Some("Retention scan task panicked".into()),
        })?
    }
}

/// Start/stop bookkeeping for the sweep task.
///
/// The join handle stays here until a `stop()` has actually joined it, so a cancelled `stop()`
/// can be finished by a later one and `launch` can reclaim a task that has already exited.
#[derive(Debug)]
pub(crate) struct Sweeper {
    state: LifecycleState,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub(crate) const fn new() -> Self {
        Self { state: LifecycleState::Created, shutdown: None, task: None }
    }

    pub(crate) const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Spawns the sweep task on the current Tokio runtime.
    pub(crate) fn launch(&mut self, scope: RetentionScope) -> Result<(), StorageError> {
        self.reclaim_finished();
        if matches!(self.state, LifecycleState::Started | LifecycleState::Stopping) {
            return Err(StorageError::InvalidState {
                message: format!("retention sweep is already {:?}", self.state).into(),
                context: None,
            });
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            StorageError::Internal {
                message: e.to_string().into(),
                context: Some("Starting the retention sweep requires a Tokio runtime".into()),
            }
        })?;

        let (shutdown, signal) = watch::channel(false);
        self.task = Some(runtime.spawn(run(scope, signal)));
        self.shutdown = Some(shutdown);
        self.state = LifecycleState::Started;
        Ok(())
    }

    /// A stop that was cancelled mid-join leaves `Stopping` behind; once the signalled task
    /// has exited there is nothing left to wait for.
    pub(crate) fn reclaim_finished(&mut self) {
        if self.state == LifecycleState::Stopping
            && self.task.as_ref().is_some_and(JoinHandle::is_finished)
        {
            self.task = None;
            self.state = LifecycleState::Stopped;
        }
    }

    /// Signals the task and hands out its handle for joining.
    fn begin_stop(&mut self) -> Option<JoinHandle<()>> {
        let task = self.task.take()?;
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send_replace(true);
        }
        self.state = LifecycleState::Stopping;
        Some(task)
    }
}

/// Finishes a stop even when the joining future is dropped half way.
struct JoinGuard<'a> {
    sweeper: &'a parking_lot::Mutex<Sweeper>,
    task: Option<JoinHandle<()>>,
}

impl Drop for JoinGuard<'_> {
    fn drop(&mut self) {
        let mut sweeper = self.sweeper.lock();
        match self.task.take() {
            Some(task) => sweeper.task = Some(task),
            None => sweeper.state = LifecycleState::Stopped,
        }
    }
}

/// Signals the sweep and waits until its task has exited.
///
/// The lock is only held to move state around, never across the join. If this future is
/// dropped before the join completes, the handle goes back to the sweeper and the state stays
/// `Stopping` until another `stop()` or a `start()` observes the exited task.
pub(crate) async fn shutdown(sweeper: &parking_lot::Mutex<Sweeper>) -> Result<(), StorageError> {
    let Some(task) = sweeper.lock().begin_stop() else {
        debug!("Retention sweep is not running");
        return Ok(());
    };

    let mut guard = JoinGuard { sweeper, task: Some(task) };
    let joined = match guard.task.as_mut() {
        Some(task) => task.await,
        None => Ok(()),
    };
    guard.task = None;
    drop(guard);

    joined.map_err(|e| StorageError::Internal {
        message: e.to_string().into(),
        context: Some("Retention sweep task failed".into()),
    })
}

async fn run(scope: RetentionScope, mut stop: watch::Receiver<bool>) {
    info!(path = %scope.storage_directory.display(), "Retention sweep started");
    let policy = scope.policy;
    let mut last_scan: Option<Instant> = None;

    loop {
        let mut pause = policy.poll_interval;

        if last_scan.is_none_or(|at| at.elapsed() > policy.scan_interval) {
            last_scan = Some(Instant::now());
            debug!("Checking for outdated files");
            match scope.check().await {
                Ok(SweepReport { removed: 0, failed: 0 }) => {},
                Ok(SweepReport { removed, failed }) if failed > 0 => {
                    error!(removed, failed, "Retention scan could not remove every outdated file");
                },
                Ok(SweepReport { removed, .. }) => info!(removed, "Removed outdated files"),
                Err(err) => {
                    error!(error = %err, "Retention scan failed");
                    pause = policy.error_backoff;
                },
            }
        }

        tokio::select! {
            () = tokio::time::sleep(pause) => {},
            _ = stop.changed() => {
                info!("Retention sweep received stop signal");
                break;
            },
        }
    }

    info!("Retention sweep finished");
}

/// Deletes regular files directly under `dir` that are older than `max_age`.
fn expire(
    dir: &Path,
    max_age: Duration,
    now: SystemTime,
    label: &'static str,
    report: &mut SweepReport,
) -> Result<(), StorageError> {
    if !dir.is_dir() {
        return Ok(());
    }

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from).context(format!("Failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let Some(age) = meta.modified().ok().and_then(|at| now.duration_since(at).ok()) else {
            continue;
        };
        if age <= max_age {
            continue;
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), size = meta.len(), kind = label, "Removed outdated file");
                report.removed += 1;
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Outdated file already removed");
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, kind = label, "Failed to remove outdated file");
                report.failed += 1;
            },
        }
    }

    Ok(())
}
