// Line framing for requests and events.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::event::StreamEvent;

pub const RUN_METHOD: &str = "run";

/// Flags attached to a run request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFlags {
    #[serde(default)]
    pub preflight: bool,
    #[serde(default)]
    pub trusted: bool,
}

/// Parameters of the single request a launcher issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub link: String,
    pub flags: RunFlags,
}

impl RunRequest {
    /// Hand-off request: the runtime only preflights and then takes over.
    pub fn preflight(link: impl Into<String>) -> Self {
        Self { link: link.into(), flags: RunFlags { preflight: true, trusted: true } }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub method: String,
    pub params: RunRequest,
}

impl RequestFrame {
    pub fn run(id: u64, params: RunRequest) -> Self {
        Self { id, method: RUN_METHOD.to_string(), params }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub id: u64,
    pub event: StreamEvent,
}

/// Serialize `value` as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut encoded = serde_json::to_vec(value)?;
    encoded.push(b'\n');
    Ok(encoded)
}

/// Parse one line, tolerating a trailing `\n` or `\r\n`.
pub fn decode_line<T: DeserializeOwned>(line: &[u8]) -> serde_json::Result<T> {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    serde_json::from_slice(&line[..end])
}
