//! Identifier newtypes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Identifier of a video in the external video catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(u64);

impl VideoId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "video:{}", self.0)
    }
}

/// Identifier of a redundancy record, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redundancy:{}", self.0)
    }
}

/// Maximum length of a host name (RFC 1035 limit plus room for `:port`).
const MAX_HOST_LEN: usize = 259;

/// Errors returned when parsing a [`Host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("host must not be empty")]
    Empty,

    #[error("host too long ({len} bytes > {max} bytes)")]
    TooLong { len: usize, max: usize },

    #[error("host must not contain a scheme or path")]
    NotBareHost,

    #[error("host contains invalid character {0:?}")]
    InvalidChar(char),
}

/// A federated instance host (`videos.example.org` or `localhost:9000`).
///
/// Hosts are compared case-insensitively; the stored form is lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Host(String);

impl Host {
    /// Parse and normalise a host.
    ///
    /// # Errors
    /// Returns [`HostError`] if the input is not a bare `host[:port]`.
    pub fn parse(input: &str) -> Result<Self, HostError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(HostError::Empty);
        }
        if trimmed.len() > MAX_HOST_LEN {
            return Err(HostError::TooLong {
                len: trimmed.len(),
                max: MAX_HOST_LEN,
            });
        }
        if trimmed.contains("://") || trimmed.contains('/') {
            return Err(HostError::NotBareHost);
        }
        if let Some(bad) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':')))
        {
            return Err(HostError::InvalidChar(bad));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Host {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Host {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Name of a configured redundancy strategy (e.g. `recently-added`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyName(String);

impl StrategyName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StrategyName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_normalised_to_lowercase() {
        let host = Host::parse("  Videos.Example.ORG ").unwrap();
        assert_eq!(host.as_str(), "videos.example.org");
        assert_eq!(host, "videos.example.org".parse().unwrap());
    }

    #[test]
    fn host_with_port_is_accepted() {
        let host = Host::parse("localhost:9001").unwrap();
        assert_eq!(host.to_string(), "localhost:9001");
    }

    #[test]
    fn host_rejects_urls() {
        assert_eq!(
            Host::parse("https://example.org"),
            Err(HostError::NotBareHost)
        );
        assert_eq!(Host::parse("example.org/videos"), Err(HostError::NotBareHost));
    }

    #[test]
    fn host_rejects_empty_and_garbage() {
        assert_eq!(Host::parse("   "), Err(HostError::Empty));
        assert_eq!(Host::parse("exa mple.org"), Err(HostError::InvalidChar(' ')));
        let long = "a".repeat(300);
        assert!(matches!(Host::parse(&long), Err(HostError::TooLong { .. })));
    }

    #[test]
    fn host_deserialize_validates() {
        let ok: Host = serde_json::from_str("\"Peer.Example\"").unwrap();
        assert_eq!(ok.as_str(), "peer.example");
        assert!(serde_json::from_str::<Host>("\"bad host\"").is_err());
    }

    #[test]
    fn ids_display() {
        assert_eq!(VideoId::new(7).to_string(), "video:7");
        assert_eq!(RecordId::new(3).to_string(), "redundancy:3");
    }
}
