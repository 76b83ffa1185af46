//! Temporary file storage with atomic uploads and age-based retention.
//!
//! Files are uploaded under arbitrary user-supplied names, stored under a canonical name that
//! is safe on every common filesystem, and deleted automatically once they are older than a
//! configured maximum store time.
//!
//! # Guarantees
//!
//! - **Atomic uploads**: bytes are written to a unique temp file, synced, and renamed into
//!   place on commit. A partial upload is never visible under its final name.
//! - **No overwrites**: an upload whose canonical name is already taken fails with
//!   [`StorageError::DestinationExists`] before any byte is written.
//! - **Bounded lifetime**: the retention sweep removes completed files older than the maximum
//!   store time and temp files abandoned for longer than
//!   [`RetentionPolicy::temp_max_age`].
//! - **Prompt shutdown**: [`FileStorage::stop`] interrupts the sweep's wait instead of
//!   sleeping it out.
//!
//! # Examples
//!
//! ```rust
//! use limbo_storage::{FileStorage, RetentionPolicy, StorageError};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StorageError> {
//!     # let tmp = tempfile::tempdir().unwrap();
//!     let storage = FileStorage::builder()
//!         .directory(tmp.path().join("uploads"))
//!         .max_store_time_seconds(600)
//!         .retention(RetentionPolicy::default().with_poll_interval(Duration::from_secs(5)))
//!         .build()
//!         .await?;
//!     storage.start()?;
//!
//!     let mut upload = storage.open_file_writer("con.txt").await?;
//!     upload.write(b"payload").await?;
//!     upload.commit().await?;
//!
//!     let files = storage.enumerate_files().await?;
//!     assert_eq!(files[0].display_name, "DEV.txt");
//!
//!     storage.stop().await?;
//!     Ok(())
//! }
//! ```

mod builder;
mod engine;
mod error;
mod name;
mod retention;
mod writer;

pub use builder::{DEFAULT_MAX_STORE_TIME, FileStorageBuilder, NoDirectory, WithDirectory};
pub use engine::{FileStorage, ReadTarget, StorageInner, StoredFile, TEMP_DIR_NAME};
pub use error::{StorageError, StorageErrorExt};
pub use name::{
    CanonicalName, EMPTY_NAME, MAX_NAME_CHARS, canonicalize, canonicalize_verified,
    disk_to_display, disk_to_url, original_to_disk, url_to_disk,
};
pub use retention::{LifecycleState, RetentionPolicy, SweepReport};
pub use writer::WriteHandle;
