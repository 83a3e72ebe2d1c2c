// DHT bootstrap peer lists: accepted input shapes, canonical form, and the
// argument tokens handed to a freshly spawned sidecar.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Flag that puts the runtime into background server mode.
pub const SIDECAR_FLAG: &str = "--sidecar";
/// Flag preceding the canonical peer list.
pub const DHT_BOOTSTRAP_FLAG: &str = "--dht-bootstrap";
/// Host used for bare port entries.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerFormatError {
    #[error("Invalid node format: {0}")]
    InvalidNode(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),
}

/// One caller-supplied peer descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEntry {
    /// Pre-formatted `host:port` text, passed through unchanged.
    Raw(String),
    /// Bare port on the loopback host.
    Port(u16),
    /// Structured host and port.
    Node { host: String, port: u16 },
}

impl PeerEntry {
    fn token(&self) -> String {
        match self {
            Self::Raw(raw) => raw.clone(),
            Self::Port(port) => format!("{LOOPBACK_HOST}:{port}"),
            Self::Node { host, port } => format!("{host}:{port}"),
        }
    }
}

impl TryFrom<&Value> for PeerEntry {
    type Error = PeerFormatError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(raw) => Ok(Self::Raw(raw.clone())),
            Value::Number(number) => number
                .as_u64()
                .and_then(|port| u16::try_from(port).ok())
                .map(Self::Port)
                .ok_or_else(|| PeerFormatError::InvalidNode(value.to_string())),
            Value::Object(map) => {
                let host = map.get("host").and_then(Value::as_str).filter(|host| !host.is_empty());
                let port = map.get("port").and_then(port_from_value);
                match (host, port) {
                    (Some(host), Some(port)) => Ok(Self::Node { host: host.to_string(), port }),
                    _ => Err(PeerFormatError::InvalidNode(value.to_string())),
                }
            }
            _ => Err(PeerFormatError::InvalidNode(value.to_string())),
        }
    }
}

fn port_from_value(value: &Value) -> Option<u16> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|port| u16::try_from(port).ok()),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Structured peer handed to the updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Validated, ordered peer list.
///
/// Construction canonicalizes every entry and checks that each resulting
/// `host:port` token carries an integer port, so a malformed list is
/// rejected before anything is spawned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerList {
    canonical: String,
    addrs: Vec<PeerAddr>,
}

impl PeerList {
    pub fn new(entries: impl IntoIterator<Item = PeerEntry>) -> Result<Self, PeerFormatError> {
        let canonical = entries.into_iter().map(|entry| entry.token()).collect::<Vec<_>>().join(",");
        if canonical.is_empty() {
            return Ok(Self::default());
        }
        let addrs = canonical.split(',').map(parse_token).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { canonical, addrs })
    }

    /// Accepts a single string, port, `{host, port}` object, or an array of them.
    pub fn from_value(value: &Value) -> Result<Self, PeerFormatError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Array(items) => {
                Self::new(items.iter().map(PeerEntry::try_from).collect::<Result<Vec<_>, _>>()?)
            }
            single => Self::new([PeerEntry::try_from(single)?]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Comma-joined `host:port` tokens in caller order.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn addrs(&self) -> &[PeerAddr] {
        &self.addrs
    }
}

impl FromStr for PeerList {
    type Err = PeerFormatError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::new([PeerEntry::Raw(raw.to_string())])
    }
}

impl Serialize for PeerList {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for PeerList {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn parse_token(token: &str) -> Result<PeerAddr, PeerFormatError> {
    let Some((host, port)) = token.rsplit_once(':') else {
        return Err(PeerFormatError::InvalidPort(String::new()));
    };
    let port = port.parse::<u16>().map_err(|_| PeerFormatError::InvalidPort(port.to_string()))?;
    Ok(PeerAddr { host: host.to_string(), port })
}

/// Tokens announcing the peer list to the sidecar; empty when there are no peers.
pub fn build_peer_args(peers: Option<&PeerList>) -> Vec<String> {
    match peers {
        Some(peers) if !peers.is_empty() => {
            vec![DHT_BOOTSTRAP_FLAG.to_string(), peers.canonical().to_string()]
        }
        _ => Vec::new(),
    }
}

/// Full argument vector for a sidecar spawn.
pub fn sidecar_args(peers: Option<&PeerList>) -> Vec<String> {
    let mut args = vec![SIDECAR_FLAG.to_string()];
    args.extend(build_peer_args(peers));
    args
}
