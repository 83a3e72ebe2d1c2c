// Error surface of a bootstrap run.

use std::io;
use std::path::PathBuf;

use pear_bootstrap_common::key::KeyFormatError;
use pear_bootstrap_common::peers::PeerFormatError;
use serde_json::Value;
use thiserror::Error;

use crate::updater::UpdateError;

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Rejected before any I/O took place.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The sidecar finished a request without a bail payload.
    #[error("internal error: {0}")]
    Internal(String),

    /// The sidecar bailed with a code other than `PREFLIGHT`.
    #[error("operation failed: {message}")]
    OperationFailed { code: String, message: String, info: Option<Value> },

    /// The event stream broke the framing contract.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("runtime staging failed: {0}")]
    Update(#[from] UpdateError),

    #[error("failed to take spawn lock {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {timeout_ms} ms waiting for spawn lock {path:?}")]
    LockTimeout { path: PathBuf, timeout_ms: u64 },

    #[error("failed to spawn runtime {executable:?}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to runtime at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("runtime did not open {address} within {timeout_ms} ms ({attempts} attempts, last error: {last_error})")]
    ConnectTimeout { address: String, timeout_ms: u64, attempts: u32, last_error: String },

    #[error("runtime channel failed: {0}")]
    Channel(#[source] io::Error),
}

impl BootstrapError {
    /// Stable identifier for the error category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "ERR_INVALID_INPUT",
            Self::Internal(_) => "ERR_INTERNAL_ERROR",
            Self::OperationFailed { .. } => "ERR_OPERATION_FAILED",
            Self::Protocol(_) => "ERR_PROTOCOL",
            Self::Update(_) => "ERR_UPDATE",
            Self::Lock { .. } | Self::LockTimeout { .. } => "ERR_LOCK",
            Self::Spawn { .. } => "ERR_SPAWN",
            Self::Connect { .. } | Self::ConnectTimeout { .. } => "ERR_CONNECT",
            Self::Channel(_) => "ERR_CHANNEL",
        }
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

impl From<PeerFormatError> for BootstrapError {
    fn from(error: PeerFormatError) -> Self {
        Self::InvalidInput(error.to_string())
    }
}

impl From<KeyFormatError> for BootstrapError {
    fn from(error: KeyFormatError) -> Self {
        Self::InvalidInput(error.to_string())
    }
}
