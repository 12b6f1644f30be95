//! Federation payloads exchanged between instances.
//!
//! The transport itself lives outside the engine; these types are what the
//! engine emits and consumes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::artifact::ArtifactKey;
use crate::id::{Host, StrategyName};
use crate::record::Retention;

/// "Please let me duplicate your artifact."
///
/// Sent by the instance that wants to cache to the video's origin. Receiving
/// the same request twice must not create two records; a repeat refreshes the
/// existing record's expiry instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicationRequest {
    pub requesting_host: Host,
    pub key: ArtifactKey,
    /// Where the requester serves its copy.
    pub file_url: Url,
    pub size_bytes: u64,
    /// Requester's strategy, `None` for a manual duplication.
    #[serde(default)]
    pub strategy: Option<StrategyName>,
    /// Requester's planned expiry, `None` for a manual duplication.
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
}

impl DuplicationRequest {
    /// Retention the origin should record for the requester's copy.
    ///
    /// A request missing either half of the strategy/expiry pair is treated
    /// as manual so the retention invariant always holds.
    #[must_use]
    pub fn retention(&self) -> Retention {
        match (&self.strategy, self.expires_on) {
            (Some(name), Some(expires_on)) => Retention::strategy(name.clone(), expires_on),
            _ => Retention::Manual,
        }
    }
}

/// Messages the engine exchanges over the federation transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FederationMessage {
    Duplicate(DuplicationRequest),
    StopDuplicating {
        requesting_host: Host,
        key: ArtifactKey,
    },
}

impl FederationMessage {
    #[must_use]
    pub const fn requesting_host(&self) -> &Host {
        match self {
            Self::Duplicate(req) => &req.requesting_host,
            Self::StopDuplicating {
                requesting_host, ..
            } => requesting_host,
        }
    }
}

/// Why an origin refused a duplication request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Origin accepts duplication from nobody.
    PolicyNobody,
    /// Origin only accepts hosts it follows, and does not follow the requester.
    NotFollowed,
    /// Origin does not own the video.
    UnknownVideo,
    /// Origin has no such artifact for the video.
    UnknownArtifact,
}

impl DenyReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PolicyNobody => "trust.policy_nobody",
            Self::NotFollowed => "trust.not_followed",
            Self::UnknownVideo => "video.not_found",
            Self::UnknownArtifact => "video.artifact_not_found",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin's answer to a [`FederationMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DuplicationResponse {
    Accepted,
    Denied { reason: DenyReason },
}

impl DuplicationResponse {
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}
