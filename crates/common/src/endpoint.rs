// Local channel addressing: every runtime root directory owns exactly one
// IPC endpoint, derived from a SHA-256 of the root path.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Socket file the sidecar binds inside its root directory on Unix.
pub const SOCKET_FILE_NAME: &str = "pear.sock";

/// Prefix of the named pipe the sidecar creates on Windows.
pub const PIPE_PREFIX: &str = r"\\.\pipe\pear-";

/// Address of the local sidecar channel for one root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelAddress {
    /// Filesystem socket (Unix family).
    Socket { path: PathBuf, id: String },
    /// Named pipe (Windows family).
    NamedPipe { name: String, id: String },
}

impl ChannelAddress {
    /// Socket address inside `root_dir`.
    pub fn socket(root_dir: &Path) -> Self {
        Self::Socket { path: root_dir.join(SOCKET_FILE_NAME), id: endpoint_id(root_dir) }
    }

    /// Named pipe address keyed by the hash of `root_dir`.
    pub fn named_pipe(root_dir: &Path) -> Self {
        let id = endpoint_id(root_dir);
        Self::NamedPipe { name: format!("{PIPE_PREFIX}{id}"), id }
    }

    /// Hex-encoded hash of the root directory this address was derived from.
    pub fn id(&self) -> &str {
        match self {
            Self::Socket { id, .. } | Self::NamedPipe { id, .. } => id,
        }
    }

    /// Filesystem path of a socket address.
    pub fn socket_path(&self) -> Option<&Path> {
        match self {
            Self::Socket { path, .. } => Some(path),
            Self::NamedPipe { .. } => None,
        }
    }

    /// Pipe name of a named pipe address.
    pub fn pipe_name(&self) -> Option<&str> {
        match self {
            Self::NamedPipe { name, .. } => Some(name),
            Self::Socket { .. } => None,
        }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket { path, .. } => write!(f, "{}", path.display()),
            Self::NamedPipe { name, .. } => f.write_str(name),
        }
    }
}

/// Derive the platform channel address for `root_dir`.
///
/// Pure: no filesystem access, no clock, no randomness. Repeated calls with
/// the same root (in this or any later process) yield the same address, so
/// every launch targeting a root reaches the same sidecar.
pub fn address_for(root_dir: &Path) -> ChannelAddress {
    #[cfg(windows)]
    {
        ChannelAddress::named_pipe(root_dir)
    }

    #[cfg(not(windows))]
    {
        ChannelAddress::socket(root_dir)
    }
}

/// Lowercase hex SHA-256 of the root path bytes.
pub fn endpoint_id(root_dir: &Path) -> String {
    hex::encode(Sha256::digest(root_dir.as_os_str().as_encoded_bytes()))
}
