//! Write-to-temp-then-rename upload handle.

use crate::engine::StoredFile;
use crate::error::{StorageError, StorageErrorExt};
use crate::name::CanonicalName;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

/// An in-progress upload.
///
/// Bytes go to a uniquely named file in the temp directory. [`commit`](Self::commit) renames
/// it to its final name, which is the only moment the upload becomes visible to enumeration and
/// reads. Dropping the handle without committing (or after a failed write) closes the
/// descriptor and leaves the temp file in place for the retention sweep.
#[derive(Debug)]
#[must_use = "the upload only becomes visible after .commit().await"]
pub struct WriteHandle {
    file: fs::File,
    disk_name: CanonicalName,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
}

impl WriteHandle {
    /// Creates the temp file for an upload that will land at `final_path`.
    ///
    /// # Errors
    /// * [`StorageError::DestinationExists`] if `final_path` is already taken; the existing file
    ///   is not opened, truncated or otherwise touched.
    /// * [`StorageError::Io`] if the temp file cannot be created.
    pub(crate) async fn open(
        disk_name: CanonicalName,
        temp_path: PathBuf,
        final_path: PathBuf,
    ) -> Result<Self, StorageError> {
        ensure_vacant(&final_path).await?;

        let file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .context(format!("Temp creation failed: {}", temp_path.display()))?;

        Ok(Self { file, disk_name, temp_path, final_path, written: 0 })
    }

    /// Appends `data` to the upload.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] on a failed write. The handle should then be dropped; the
    /// partial temp file is left for the retention sweep.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.file
            .write_all(data)
            .await
            .context(format!("Write failed: {}", self.temp_path.display()))?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Streams `reader` to the end into the upload and returns the number of bytes copied.
    ///
    /// # Errors
    /// Returns [`StorageError::Io`] if reading the source or writing the temp file fails.
    pub async fn write_from<R>(&mut self, reader: &mut R) -> Result<u64, StorageError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let copied = tokio::io::copy(reader, &mut self.file)
            .await
            .context(format!("Streaming copy failed: {}", self.temp_path.display()))?;
        self.written += copied;
        Ok(copied)
    }

    /// Bytes accepted so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    #[must_use]
    pub const fn disk_name(&self) -> &CanonicalName {
        &self.disk_name
    }

    /// Where the bytes currently live.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Where the file appears after [`commit`](Self::commit).
    #[must_use]
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flushes and syncs the temp file, closes it, and moves it into place.
    ///
    /// The move is a hard link to the final name followed by removal of the temp name, so an
    /// existing destination is never replaced. Filesystems without hard links fall back to a
    /// vacancy check plus `rename`, which leaves a short window for a concurrent commit of the
    /// same name to be overwritten.
    ///
    /// # Errors
    /// * [`StorageError::DestinationExists`] if another upload claimed the name after this
    ///   handle was opened. The temp file is left for the retention sweep.
    /// * [`StorageError::Io`] if syncing or moving fails.
    pub async fn commit(self) -> Result<StoredFile, StorageError> {
        let Self { mut file, disk_name, temp_path, final_path, written } = self;

        file.flush().await.context(format!("Flush failed: {}", temp_path.display()))?;
        file.sync_all().await.context("Hardware sync failed")?;
        drop(file);

        publish(&temp_path, &final_path).await?;

        if let Some(parent) = final_path.parent() {
            sync_dir(parent).await;
        }

        let modified = fs::metadata(&final_path)
            .await
            .and_then(|meta| meta.modified())
            .context(format!("Failed to stat committed file: {}", final_path.display()))?;

        debug!(path = %final_path.display(), size = written, "File saved atomically");
        Ok(StoredFile::new(final_path, disk_name, written, modified))
    }
}

/// Makes `temp` visible as `target` without ever replacing an existing `target`.
async fn publish(temp: &Path, target: &Path) -> Result<(), StorageError> {
    match fs::hard_link(temp, target).await {
        Ok(()) => {
            if let Err(err) = fs::remove_file(temp).await {
                warn!(path = %temp.display(), error = %err, "Temp file left behind after commit");
            }
            Ok(())
        },
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Err(destination_exists(target)),
        Err(err) => {
            debug!(error = %err, "Hard link unavailable, committing with rename");
            ensure_vacant(target).await?;
            fs::rename(temp, target).await.context(format!(
                "Atomic swap failed: {} -> {}",
                temp.display(),
                target.display()
            ))
        },
    }
}

fn destination_exists(path: &Path) -> StorageError {
    StorageError::DestinationExists { message: path.display().to_string().into(), context: None }
}

async fn ensure_vacant(path: &Path) -> Result<(), StorageError> {
    let taken = fs::try_exists(path)
        .await
        .context(format!("Failed to check destination: {}", path.display()))?;
    if taken {
        return Err(destination_exists(path));
    }
    Ok(())
}

async fn sync_dir(path: &Path) {
    match fs::File::open(path).await {
        Ok(dir) => {
            if let Err(err) = dir.sync_all().await {
                warn!(path = %path.display(), error = %err, "Directory sync failed");
            }
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Directory open failed");
        },
    }
}
