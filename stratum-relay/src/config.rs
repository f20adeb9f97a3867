//! Configuration management for stratum-relay.
//!
//! This module loads, validates, and writes the TOML file that lists the
//! upstream pools and the workers bound to them. Once loaded the
//! configuration is immutable and shared between relays as an `Arc<Config>`.
//!
//! ```toml
//! [[pool]]
//! name = "p1"
//! address = "stratum+tcp://pool.example:3333"
//! username = "account"
//! password = "x"
//! timeout = 10
//!
//! [[worker]]
//! username = "alice"
//! pool = { name = "p1" }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pool::{AddressError, TransportAddress};
use crate::tracing::prelude::*;

/// Errors loading, validating, or writing a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no configuration path given")]
    EmptyPath,

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("pool '{0}' is defined more than once")]
    DuplicatePool(String),

    #[error("worker '{0}' is defined more than once")]
    DuplicateWorker(String),

    #[error("pool '{pool}' has an invalid address: {source}")]
    InvalidAddress {
        pool: String,
        source: AddressError,
    },
}

/// A worker or pool name that is not in the configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("could not find worker '{0}' in configuration")]
    WorkerNotFound(String),

    #[error("could not find pool '{0}' in configuration")]
    PoolNotFound(String),
}

fn default_password() -> String {
    "x".to_string()
}

fn default_timeout() -> u64 {
    10
}

/// An upstream pool and the account used to log in to it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Pool {
    /// Unique name workers refer to
    pub name: String,

    /// Pool address (stratum+tcp://host:port)
    pub address: String,

    /// Account to log in as; when unset the worker's own login is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Account password
    #[serde(default = "default_password")]
    pub password: String,

    /// Dial timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Pool {
    /// Parse the configured address.
    pub fn transport_address(&self) -> Result<TransportAddress, AddressError> {
        self.address.parse()
    }

    /// Dial timeout as a Duration.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The login name to present to this pool on behalf of `worker`.
    pub fn login_name<'a>(&'a self, worker: &'a str) -> &'a str {
        match self.username.as_deref() {
            Some(username) if !username.is_empty() => username,
            _ => worker,
        }
    }
}

/// Name-based link from a worker to its pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolRef {
    pub name: String,
}

/// A mining client identity, bound to one pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Worker {
    /// Login name the worker presents
    pub username: String,

    /// Pool this worker is relayed to, resolved on every login
    pub pool: PoolRef,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ConfigFile {
    #[serde(default)]
    pool: Vec<Pool>,
    #[serde(default)]
    worker: Vec<Worker>,
}

/// Loaded configuration: pools and workers with name-keyed lookup.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pools: Vec<Pool>,
    workers: Vec<Worker>,
    pool_index: HashMap<String, usize>,
    worker_index: HashMap<String, usize>,
}

impl Config {
    /// Build a configuration, validating names and pool addresses.
    pub fn new(pools: Vec<Pool>, workers: Vec<Worker>) -> Result<Self, ConfigError> {
        let mut pool_index = HashMap::with_capacity(pools.len());
        for (i, pool) in pools.iter().enumerate() {
            pool.transport_address()
                .map_err(|source| ConfigError::InvalidAddress {
                    pool: pool.name.clone(),
                    source,
                })?;
            if pool_index.insert(pool.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicatePool(pool.name.clone()));
            }
        }

        let mut worker_index = HashMap::with_capacity(workers.len());
        for (i, worker) in workers.iter().enumerate() {
            if worker_index.insert(worker.username.clone(), i).is_some() {
                return Err(ConfigError::DuplicateWorker(worker.username.clone()));
            }
            if !pool_index.contains_key(&worker.pool.name) {
                warn!(
                    worker = %worker.username,
                    pool = %worker.pool.name,
                    "Worker refers to a pool that is not configured"
                );
            }
        }

        Ok(Self {
            pools,
            workers,
            pool_index,
            worker_index,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(s)?;
        Self::new(file.pool, file.worker)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Reading configuration");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(
            path = %path.display(),
            pools = config.pools.len(),
            workers = config.workers.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Serialize to TOML text.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            pool: self.pools.clone(),
            worker: self.workers.clone(),
        };
        Ok(toml::to_string(&file)?)
    }

    /// Write configuration to a file, replacing its contents.
    pub fn write_to(&self, path: &Path) -> Result<(), ConfigError> {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        debug!(path = %path.display(), "Writing configuration");
        std::fs::write(path, self.to_toml_string()?).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Find a pool by name.
    pub fn lookup_pool(&self, name: &str) -> Result<&Pool, LookupError> {
        self.pool_index
            .get(name)
            .map(|&i| &self.pools[i])
            .ok_or_else(|| LookupError::PoolNotFound(name.to_string()))
    }

    /// Find a worker by login name.
    pub fn lookup_worker(&self, username: &str) -> Result<&Worker, LookupError> {
        self.worker_index
            .get(username)
            .map(|&i| &self.workers[i])
            .ok_or_else(|| LookupError::WorkerNotFound(username.to_string()))
    }

    /// Resolve a worker and the pool it is bound to.
    pub fn resolve(&self, username: &str) -> Result<(&Worker, &Pool), LookupError> {
        let worker = self.lookup_worker(username)?;
        let pool = self.lookup_pool(&worker.pool.name)?;
        Ok((worker, pool))
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }
}
