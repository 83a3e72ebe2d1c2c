// Launcher configuration: `~/.pear-bootstrap/config.toml`.
//
// Every field is optional; a missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pear_bootstrap_common::peers::PeerList;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connector::ConnectPolicy;
use crate::lock::LockPolicy;
use crate::paths::{RuntimeLayout, DEFAULT_LOCK_FILE, RUNTIME_NAME};

pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Directory holding launcher state: `~/.pear-bootstrap/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pear-bootstrap"))
}

/// Default config file: `~/.pear-bootstrap/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapConfig {
    /// Total time a freshly spawned runtime gets to open its channel.
    pub connect_timeout_ms: u64,
    /// First connect retry delay after a spawn; doubles up to `retry_max_ms`.
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    /// How long a launch waits behind a sibling holding the spawn lock.
    pub lock_timeout_ms: u64,
    /// Lock files without a readable holder pid are abandoned after this long.
    /// Never shorter than twice `connect_timeout_ms`.
    pub stale_lock_ms: u64,
    /// Spawn lock path, relative to the root directory.
    pub lock_file: PathBuf,
    /// Runtime executable name (without `.exe`).
    pub runtime_name: String,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Default DHT bootstrap peers.
    pub dht_bootstrap: Option<PeerList>,
    pub updater: UpdaterConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let connect = ConnectPolicy::default();
        let lock = LockPolicy::default();
        Self {
            connect_timeout_ms: millis(connect.timeout),
            retry_initial_ms: millis(connect.retry_initial),
            retry_max_ms: millis(connect.retry_max),
            lock_timeout_ms: millis(lock.timeout),
            stale_lock_ms: millis(lock.stale_after),
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            runtime_name: RUNTIME_NAME.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            dht_bootstrap: None,
            updater: UpdaterConfig::default(),
        }
    }
}

/// External staging program. When `command` is unset the launcher only
/// checks that a build is already staged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct UpdaterConfig {
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
}

impl BootstrapConfig {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Connect policy from the file values, clamped by `ConnectPolicy::normalized`.
    pub fn connect_policy(&self) -> ConnectPolicy {
        ConnectPolicy {
            timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_initial: Duration::from_millis(self.retry_initial_ms),
            retry_max: Duration::from_millis(self.retry_max_ms),
            lock: LockPolicy {
                timeout: Duration::from_millis(self.lock_timeout_ms),
                stale_after: Duration::from_millis(self.stale_lock_ms),
                ..LockPolicy::default()
            },
        }
        .normalized()
    }

    pub fn layout(&self) -> RuntimeLayout {
        RuntimeLayout { runtime_name: self.runtime_name.clone(), lock_file: self.lock_file.clone() }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
