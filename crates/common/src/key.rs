// Platform key: the 32-byte identifier the updater stages builds from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyFormatError {
    #[error("key must be {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("key is not valid hex: {0}")]
    Hex(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey([u8; KEY_LEN]);

impl PeerKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.to_hex())
    }
}

impl FromStr for PeerKey {
    type Err = KeyFormatError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.len() != KEY_LEN * 2 {
            return Err(KeyFormatError::Length { expected: KEY_LEN * 2, actual: raw.len() });
        }
        let mut bytes = [0_u8; KEY_LEN];
        hex::decode_to_slice(raw, &mut bytes).map_err(|error| KeyFormatError::Hex(error.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for PeerKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1f3a5c7e9b0d2f4a6c8e0b1d3f5a7c9e1b3d5f7a9c0e2b4d6f8a0c2e4b6d8f0a";

    #[test]
    fn parses_and_displays_hex() {
        let key: PeerKey = SAMPLE.parse().expect("valid key");
        assert_eq!(key.to_string(), SAMPLE);
        assert_eq!(key.as_bytes()[0], 0x1f);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            "abcd".parse::<PeerKey>(),
            Err(KeyFormatError::Length { expected: 64, actual: 4 })
        );
    }

    #[test]
    fn rejects_non_hex() {
        let raw = "z".repeat(64);
        assert!(matches!(raw.parse::<PeerKey>(), Err(KeyFormatError::Hex(_))));
    }
}
