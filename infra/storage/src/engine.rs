//! The file storage manager.
//!
//! [`FileStorage`] owns one storage directory. Completed uploads live directly inside it under
//! their canonical names; uploads in progress live in its `incomplete` subdirectory under a
//! random hex prefix plus the canonical name, so two concurrent uploads of the same name never
//! share a temp file.

use crate::builder::FileStorageBuilder;
use crate::error::{StorageError, StorageErrorExt};
use crate::name::{self, CanonicalName};
use crate::retention::{self, LifecycleState, RetentionPolicy, RetentionScope, SweepReport, Sweeper};
use crate::writer::WriteHandle;
use parking_lot::Mutex;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// Name of the temp subdirectory inside the storage directory.
pub const TEMP_DIR_NAME: &str = "incomplete";

const TEMP_PREFIX_LEN: usize = 32;
const HEX_ALPHABET: [char; 16] =
    ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f'];

/// A completed upload as seen on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub disk_path: PathBuf,
    pub disk_name: CanonicalName,
    pub url_name: String,
    pub display_name: String,
    pub size: u64,
    pub modified: SystemTime,
}

impl StoredFile {
    pub(crate) fn new(
        disk_path: PathBuf,
        disk_name: CanonicalName,
        size: u64,
        modified: SystemTime,
    ) -> Self {
        let url_name = name::disk_to_url(&disk_name);
        let display_name = name::disk_to_display(&disk_name);
        Self { disk_path, disk_name, url_name, display_name, size, modified }
    }
}

/// Where a download should be served from.
///
/// Resolution does not touch the filesystem; the file may be gone by the time it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadTarget {
    pub storage_directory: PathBuf,
    pub disk_name: CanonicalName,
    pub display_name: String,
}

impl ReadTarget {
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.storage_directory.join(self.disk_name.as_str())
    }
}

/// The internal shared state of a [`FileStorage`] instance.
#[derive(Debug)]
pub struct StorageInner {
    pub(crate) storage_directory: PathBuf,
    pub(crate) temp_directory: PathBuf,
    pub(crate) max_store_time: Duration,
    pub(crate) policy: RetentionPolicy,
    pub(crate) sweeper: Mutex<Sweeper>,
}

/// A thread-safe handle to one storage directory.
///
/// Cloning is cheap and every clone drives the same directory and the same retention sweep.
///
/// ```rust
/// use limbo_storage::{FileStorage, StorageError};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), StorageError> {
///     # let tmp = tempfile::tempdir().unwrap();
///     let storage = FileStorage::builder()
///         .directory(tmp.path().join("uploads"))
///         .max_store_time(Duration::from_secs(3600))
///         .build()
///         .await?;
///
///     let mut upload = storage.open_file_writer("notes?.txt").await?;
///     upload.write(b"remember the milk").await?;
///     let stored = upload.commit().await?;
///     assert_eq!(stored.url_name, "notes_.txt");
///
///     let target = storage.resolve_for_read("notes?.txt")?;
///     assert_eq!(target.path(), stored.disk_path);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileStorage {
    pub(crate) inner: Arc<StorageInner>,
}

impl Deref for FileStorage {
    type Target = StorageInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FileStorage {
    #[must_use = "The storage manager is not initialized until you call .build()"]
    pub fn builder() -> FileStorageBuilder {
        FileStorageBuilder::new()
    }

    /// Absolute path of the directory holding completed files.
    #[must_use]
    pub fn storage_directory(&self) -> &Path {
        &self.storage_directory
    }

    /// Absolute path of the directory holding uploads in progress.
    #[must_use]
    pub fn temp_directory(&self) -> &Path {
        &self.temp_directory
    }

    #[must_use]
    pub fn max_store_time(&self) -> Duration {
        self.max_store_time
    }

    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Current lifecycle state of the retention sweep.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        let mut sweeper = self.sweeper.lock();
        sweeper.reclaim_finished();
        sweeper.state()
    }

    /// Creates the storage and temp directories if missing. Idempotent.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if a directory cannot be created.
    pub async fn ensure_directories(&self) -> Result<(), StorageError> {
        for dir in [&self.storage_directory, &self.temp_directory] {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o755);
            builder
                .create(dir)
                .await
                .context(format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Starts an upload of `original_name`.
    ///
    /// The name is canonicalized first; the upload lands under the canonical name once the
    /// returned handle is committed.
    ///
    /// # Errors
    /// * [`StorageError::NameCanonicalization`] if the name does not canonicalize stably.
    /// * [`StorageError::DestinationExists`] if a completed file already has that name. The
    ///   existing file is untouched.
    /// * [`StorageError::Io`] if the directories or the temp file cannot be created.
    pub async fn open_file_writer(&self, original_name: &str) -> Result<WriteHandle, StorageError> {
        self.ensure_directories().await?;

        let disk_name = name::original_to_disk(original_name)?;
        let prefix = nanoid::nanoid!(TEMP_PREFIX_LEN, &HEX_ALPHABET);
        let temp_path = self.temp_directory.join(format!("{prefix}.{disk_name}"));
        let final_path = self.storage_directory.join(disk_name.as_str());

        info!(name = %disk_name, temp = %temp_path.display(), "Upload started");
        WriteHandle::open(disk_name, temp_path, final_path).await
    }

    /// Lists completed files, sorted by disk name.
    ///
    /// Only regular files directly inside the storage directory count. Entries whose names are
    /// not valid UTF-8 or not canonical were not created by this manager and are skipped. A
    /// missing storage directory yields an empty list.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if the directory cannot be read.
    pub async fn enumerate_files(&self) -> Result<Vec<StoredFile>, StorageError> {
        let dir = &self.storage_directory;
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).context(format!("Failed to list directory: {}", dir.display()));
            },
        };

        let mut files = Vec::new();
        while let Some(entry) =
            entries.next_entry().await.context(format!("Failed to list directory: {}", dir.display()))?
        {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).context(format!("Failed to stat {}", entry.path().display()));
                },
            };
            if !meta.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let Some(raw) = file_name.to_str() else {
                warn!(path = %entry.path().display(), "Skipping file with a non UTF-8 name");
                continue;
            };
            let Ok(disk_name) = CanonicalName::from_canonical(raw) else {
                warn!(name = raw, "Skipping file with a non-canonical name");
                continue;
            };

            let modified =
                meta.modified().context(format!("Failed to stat {}", entry.path().display()))?;
            files.push(StoredFile::new(entry.path(), disk_name, meta.len(), modified));
        }

        files.sort_by(|a, b| a.disk_name.cmp(&b.disk_name));
        debug!(count = files.len(), "Enumerated stored files");
        Ok(files)
    }

    /// Maps a URL name to the file that should be served for it.
    ///
    /// # Errors
    /// Returns [`StorageError::NameCanonicalization`] if the name does not canonicalize stably.
    pub fn resolve_for_read(&self, url_name: &str) -> Result<ReadTarget, StorageError> {
        let disk_name = name::url_to_disk(url_name)?;
        let display_name = name::disk_to_display(&disk_name);
        Ok(ReadTarget { storage_directory: self.storage_directory.clone(), disk_name, display_name })
    }

    /// Resolves `url_name` and opens the completed file for streaming.
    ///
    /// # Errors
    /// * [`StorageError::FileNotFound`] if no such file exists.
    /// * [`StorageError::Io`] for any other open failure.
    pub async fn open_file_reader(
        &self,
        url_name: &str,
    ) -> Result<(ReadTarget, fs::File), StorageError> {
        let target = self.resolve_for_read(url_name)?;
        let path = target.path();
        match fs::File::open(&path).await {
            Ok(file) => Ok((target, file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(not_found(&path)),
            Err(err) => Err(err).context(format!("Failed to open {}", path.display())),
        }
    }

    /// Deletes one completed file.
    ///
    /// # Errors
    /// * [`StorageError::FileNotFound`] if no such file exists.
    /// * [`StorageError::Io`] if the file cannot be deleted.
    pub async fn remove_file(&self, url_name: &str) -> Result<(), StorageError> {
        let path = self.resolve_for_read(url_name)?.path();

        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found(&path)),
            Err(err) => return Err(err).context(format!("Failed to stat {}", path.display())),
        };

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), size, "Removed file");
                Ok(())
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(not_found(&path)),
            Err(err) => Err(err).context(format!("Failed to remove {}", path.display())),
        }
    }

    /// Deletes every regular file in the storage and temp directories and returns how many
    /// went away. The directories themselves stay.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] on the first listing or deletion failure.
    pub async fn remove_all_files(&self) -> Result<usize, StorageError> {
        let removed = purge(&self.storage_directory, "file").await?
            + purge(&self.temp_directory, "temp file").await?;
        info!(removed, "Removed all files");
        Ok(removed)
    }

    /// Starts the background retention sweep on the current Tokio runtime.
    ///
    /// # Errors
    /// * [`StorageError::InvalidState`] if the sweep is already running or stopping.
    /// * [`StorageError::Internal`] if called outside a Tokio runtime.
    pub fn start(&self) -> Result<(), StorageError> {
        self.sweeper.lock().launch(self.retention_scope())?;
        info!(
            path = %self.storage_directory.display(),
            max_store_time = self.max_store_time.as_secs(),
            "File storage started"
        );
        Ok(())
    }

    /// Stops the retention sweep and waits for its task to exit.
    ///
    /// Returns promptly even while the sweep is between scans. Stopping a manager that was
    /// never started does nothing.
    ///
    /// # Errors
    /// Returns [`StorageError::Internal`] if the sweep task panicked.
    pub async fn stop(&self) -> Result<(), StorageError> {
        retention::shutdown(&self.sweeper).await?;
        info!(path = %self.storage_directory.display(), "File storage stopped");
        Ok(())
    }

    /// Runs one retention scan right now, independent of the background sweep.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if a directory cannot be listed.
    pub async fn check_retention(&self) -> Result<SweepReport, StorageError> {
        self.retention_scope().check().await
    }

    fn retention_scope(&self) -> RetentionScope {
        RetentionScope {
            storage_directory: self.storage_directory.clone(),
            temp_directory: self.temp_directory.clone(),
            max_store_time: self.max_store_time,
            policy: self.policy,
        }
    }
}

fn not_found(path: &Path) -> StorageError {
    StorageError::FileNotFound { message: path.display().to_string().into(), context: None }
}

/// Deletes the regular files directly inside `dir`. A missing directory counts as empty.
async fn purge(dir: &Path, label: &'static str) -> Result<usize, StorageError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err).context(format!("Failed to list {}", dir.display())),
    };

    let mut removed = 0;
    while let Some(entry) =
        entries.next_entry().await.context(format!("Failed to list {}", dir.display()))?
    {
        let path = entry.path();
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err).context(format!("Failed to stat {}", path.display())),
        };
        if !meta.is_file() {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), size = meta.len(), kind = label, "Removed file");
                removed += 1;
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {},
            Err(err) => return Err(err).context(format!("Failed to remove {}", path.display())),
        }
    }

    Ok(removed)
}
