//! # Limbo Keeper
//!
//! Daemon that owns a Limbo storage directory and keeps its retention sweep running until the
//! process is asked to stop.
//!
//! ## Example
//! ```no_run
//! use limbo_keeper::Keeper;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Keeper::builder()
//!         .directory("/srv/limbo")
//!         .build()
//!         .await?
//!         .run()
//!         .await
//! }
//! ```

pub mod config;

use crate::config::StorageSettings;
use anyhow::{Context, Result};
use limbo_storage::FileStorage;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

/// A fluent builder for configuring and initializing the [`Keeper`].
#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug, Default)]
pub struct KeeperBuilder {
    cfg: StorageSettings,
}

impl KeeperBuilder {
    pub fn config(mut self, cfg: StorageSettings) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cfg.directory = directory.into();
        self
    }

    /// Creates the storage directories and the manager. The sweep starts in [`Keeper::run`].
    ///
    /// # Errors
    /// Returns an error if the storage directory cannot be resolved or created.
    pub async fn build(self) -> Result<Keeper> {
        info!(
            directory = %self.cfg.directory.display(),
            max_store_time = self.cfg.max_store_time_seconds,
            "Initializing keeper"
        );

        let storage = FileStorage::builder()
            .directory(&self.cfg.directory)
            .max_store_time(Duration::from_secs(self.cfg.max_store_time_seconds))
            .retention(self.cfg.retention_policy())
            .build()
            .await
            .context("Failed to open storage directory")?;

        Ok(Keeper { storage })
    }
}

/// A keeper bound to its storage directory, ready to run.
#[must_use = "call .run().await to start the retention sweep"]
#[derive(Debug)]
pub struct Keeper {
    storage: FileStorage,
}

impl Keeper {
    pub fn builder() -> KeeperBuilder {
        KeeperBuilder::default()
    }

    /// Runs the retention sweep until SIGINT or SIGTERM.
    ///
    /// # Errors
    /// Returns an error if the sweep cannot be started or stopped cleanly.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = shutdown_signal().await {
                error!("Error while waiting for shutdown signal: {e}");
            }
        })
        .await
    }

    /// Runs the retention sweep until `shutdown` completes.
    ///
    /// # Errors
    /// Returns an error if the sweep cannot be started or stopped cleanly.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.storage.start().context("Failed to start retention sweep")?;
        info!(directory = %self.storage.storage_directory().display(), "Keeper running");

        shutdown.await;
        info!("Shutdown signal received, stopping retention sweep...");

        self.storage.stop().await.context("Failed to stop retention sweep")?;
        info!("Keeper shutdown complete");
        Ok(())
    }

    /// The storage manager, for callers that serve uploads next to the sweep.
    #[must_use]
    pub const fn storage(&self) -> &FileStorage {
        &self.storage
    }
}

/// Listens for shutdown signals (Ctrl+C, SIGTERM).
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => res?,
        res = terminate => res?,
    }

    Ok(())
}
