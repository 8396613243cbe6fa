use crate::error::{ReplicaLockError, Result};
use crate::locking::{LockTimings, ReplicaLock, TimeUnit};
use crate::store::{ReplicaStore, open_store};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_FILE_NAME: &str = "replica-lock.toml";
pub const ENV_PREFIX: &str = "REPLICA_LOCK";
pub const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379/";
const DEFAULT_LEASE_TIME: i64 = 30_000;
const DEFAULT_TIMEOUT: i64 = 1_000;
const DEFAULT_UNIT: &str = "ms";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ReplicaLockConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
        }
    }
}

/// Defaults applied to lock calls made from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockConfig {
    #[serde(default)]
    pub raw_name: Option<String>,

    #[serde(default)]
    pub renew_lease: bool,

    #[serde(default = "default_lease_time")]
    pub lease_time: i64,

    /// Bound on each replica acknowledgement wait.
    #[serde(default = "default_timeout")]
    pub timeout: i64,

    #[serde(default = "default_unit")]
    pub unit: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            raw_name: None,
            renew_lease: false,
            lease_time: DEFAULT_LEASE_TIME,
            timeout: DEFAULT_TIMEOUT,
            unit: default_unit(),
        }
    }
}

fn default_store_url() -> String {
    DEFAULT_STORE_URL.to_string()
}

fn default_lease_time() -> i64 {
    DEFAULT_LEASE_TIME
}

fn default_timeout() -> i64 {
    DEFAULT_TIMEOUT
}

fn default_unit() -> String {
    DEFAULT_UNIT.to_string()
}

impl ReplicaLockConfig {
    /// Loads configuration from `path` (required) or from `replica-lock.toml`
    /// in the working directory (optional), then overlays `REPLICA_LOCK__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (config_path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(CONFIG_FILE_NAME), false),
        };

        let settings = config::Config::builder()
            .add_source(
                config::File::from(config_path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ReplicaLockError::ConfigError(format!(
                    "Failed to read {}: {e}",
                    config_path.display()
                ))
            })?;

        let config: ReplicaLockConfig = settings.try_deserialize().map_err(|e| {
            ReplicaLockError::ConfigError(format!("Failed to parse configuration: {e}"))
        })?;
        config.validate()?;

        log::debug!(
            "Loaded configuration (store {}, lock '{}')",
            config.store.url,
            config.lock.raw_name.as_deref().unwrap_or_default()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.url.trim().is_empty() {
            return Err(ReplicaLockError::InvalidConfig(
                "store.url must not be empty".to_string(),
            ));
        }
        self.lock.unit()?;
        Ok(())
    }

    /// Applies command-line overrides on top of the loaded values.
    pub fn with_overrides(mut self, url: Option<String>, raw_name: Option<String>) -> Self {
        if let Some(url) = url {
            self.store.url = url;
        }
        if raw_name.is_some() {
            self.lock.raw_name = raw_name;
        }
        self
    }

    pub fn open_store(&self) -> Result<Arc<dyn ReplicaStore>> {
        open_store(&self.store.url)
    }

    pub fn open_engine(&self) -> Result<ReplicaLock> {
        self.validate()?;
        let store = self.open_store()?;
        Ok(self.lock.engine(store))
    }
}

impl LockConfig {
    pub fn unit(&self) -> Result<TimeUnit> {
        self.unit.parse()
    }

    pub fn timings(&self) -> Result<LockTimings> {
        LockTimings::blocking(self.timeout, self.lease_time, &self.unit)
    }

    pub fn engine(&self, store: Arc<dyn ReplicaStore>) -> ReplicaLock {
        let engine = ReplicaLock::new(store).with_renewal(self.renew_lease);
        match &self.raw_name {
            Some(raw_name) => engine.with_raw_name(raw_name.clone()),
            None => engine,
        }
    }
}
