//! Layered configuration: an optional TOML file overlaid with `LIMBO__*` environment variables.

use config::{Config, Environment, File};
use limbo_logger::LogSettings;
use limbo_storage::{DEFAULT_MAX_STORE_TIME, RetentionPolicy};
use serde::Deserialize;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "keeper.toml";

#[limbo_derive::limbo_error]
pub enum ConfigError {
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },
}

/// Everything the keeper daemon reads at startup.
///
/// ```toml
/// [storage]
/// directory = "/srv/limbo"
/// max_store_time_seconds = 3600
///
/// [log]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    pub storage: StorageSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub directory: PathBuf,
    pub max_store_time_seconds: u64,
    pub scan_interval_seconds: u64,
    pub poll_interval_seconds: u64,
    pub error_backoff_seconds: u64,
    pub temp_max_age_seconds: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            directory: PathBuf::from("./storage"),
            max_store_time_seconds: DEFAULT_MAX_STORE_TIME.as_secs(),
            scan_interval_seconds: policy.scan_interval.as_secs(),
            poll_interval_seconds: policy.poll_interval.as_secs(),
            error_backoff_seconds: policy.error_backoff.as_secs(),
            temp_max_age_seconds: policy.temp_max_age.as_secs(),
        }
    }
}

impl StorageSettings {
    #[must_use]
    pub const fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            scan_interval: Duration::from_secs(self.scan_interval_seconds),
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            error_backoff: Duration::from_secs(self.error_backoff_seconds),
            temp_max_age: Duration::from_secs(self.temp_max_age_seconds),
        }
    }
}

/// Loads the keeper configuration.
///
/// With `path` set the file must exist. Without it, [`DEFAULT_CONFIG_FILE`] is read if present
/// and defaults are used otherwise. Environment variables win over the file, with `__` between
/// path segments: `LIMBO__STORAGE__DIRECTORY` sets `storage.directory`.
///
/// # Errors
/// Returns [`ConfigError::Config`] if an explicit file is missing, a source cannot be parsed,
/// or a value has the wrong type.
pub fn load_config(path: Option<&Path>) -> Result<KeeperConfig, ConfigError> {
    build_config(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix("LIMBO").separator("__")
}

fn build_config(path: Option<&Path>, env: Environment) -> Result<KeeperConfig, ConfigError> {
    let file = path.map_or_else(
        || File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        |p| File::from(p).required(true),
    );

    Config::builder()
        .add_source(file)
        .add_source(env)
        .build()
        .context("Failed to build config")?
        .try_deserialize()
        .context("Failed to deserialize config")
}
