use crate::engine::{FileStorage, StorageInner, TEMP_DIR_NAME};
use crate::error::{StorageError, StorageErrorExt};
use crate::retention::{RetentionPolicy, Sweeper};
use parking_lot::Mutex;
use private::Sealed;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How long completed files are kept unless configured otherwise: one day.
pub const DEFAULT_MAX_STORE_TIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct FileStorageConfig {
    max_store_time: Duration,
    policy: RetentionPolicy,
    create: bool,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            max_store_time: DEFAULT_MAX_STORE_TIME,
            policy: RetentionPolicy::default(),
            create: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct NoDirectory;
#[derive(Debug)]
pub struct WithDirectory(PathBuf);

mod private {
    pub(super) trait Sealed {}
}
impl Sealed for NoDirectory {}
impl Sealed for WithDirectory {}

#[allow(private_bounds)]
#[derive(Debug, Default)]
pub struct FileStorageBuilder<S: Sealed = NoDirectory> {
    state: S,
    config: FileStorageConfig,
}

#[allow(private_bounds)]
impl<S: Sealed> FileStorageBuilder<S> {
    #[must_use = "Sets how long completed files are kept before the sweep removes them"]
    pub const fn max_store_time(mut self, max_store_time: Duration) -> Self {
        self.config.max_store_time = max_store_time;
        self
    }

    #[must_use = "Sets how long completed files are kept before the sweep removes them"]
    pub const fn max_store_time_seconds(self, seconds: u64) -> Self {
        self.max_store_time(Duration::from_secs(seconds))
    }

    #[must_use = "Sets the timing of the retention sweep"]
    pub const fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    #[must_use = "Sets whether the storage directories are created during build"]
    pub const fn create(mut self, enable: bool) -> Self {
        self.config.create = enable;
        self
    }

    fn transition<N: Sealed>(self, state: N) -> FileStorageBuilder<N> {
        FileStorageBuilder { state, config: self.config }
    }
}

impl FileStorageBuilder<NoDirectory> {
    #[must_use = "Creates a new storage builder with default configuration"]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "Sets the storage directory"]
    pub fn directory(self, path: impl Into<PathBuf>) -> FileStorageBuilder<WithDirectory> {
        self.transition(WithDirectory(path.into()))
    }
}

impl FileStorageBuilder<WithDirectory> {
    /// Consumes the configuration and creates the manager.
    ///
    /// The directory is made absolute against the current working directory without resolving
    /// symlinks. With `create(true)` (the default) the storage and temp directories are created
    /// right away; otherwise they are created on the first upload. The retention sweep is not
    /// running until [`FileStorage::start`] is called.
    ///
    /// # Errors
    /// * [`StorageError::InvalidConfiguration`] if the retention policy has a zero poll interval
    ///   or error backoff.
    /// * [`StorageError::Io`] if the path cannot be made absolute or the directories cannot be
    ///   created.
    pub async fn build(self) -> Result<FileStorage, StorageError> {
        self.config.policy.validate()?;

        let requested = &self.state.0;
        let storage_directory = std::path::absolute(requested)
            .context(format!("Failed to resolve storage directory: {}", requested.display()))?;
        let temp_directory = storage_directory.join(TEMP_DIR_NAME);

        let storage = FileStorage {
            inner: Arc::new(StorageInner {
                storage_directory,
                temp_directory,
                max_store_time: self.config.max_store_time,
                policy: self.config.policy,
                sweeper: Mutex::new(Sweeper::new()),
            }),
        };

        if self.config.create {
            storage.ensure_directories().await?;
        }

        info!(
            path = %storage.storage_directory().display(),
            max_store_time = self.config.max_store_time.as_secs(),
            "File storage created"
        );
        Ok(storage)
    }
}
