//! Redundancy records.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::artifact::ArtifactKey;
use crate::id::{Host, RecordId, StrategyName};

/// Which side of the federation holds the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDirection {
    /// This instance caches a video owned by a remote host ("remote-videos").
    LocalCopyOfRemote,
    /// A remote host caches a video owned by this instance ("my-videos").
    RemoteCopyOfLocal,
}

/// Retention of a record.
///
/// Encodes `strategy == null <=> expiresOn == null`: manual records carry
/// neither, strategy-owned records always carry both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Retention {
    /// Operator-initiated; never expires or gets evicted automatically.
    Manual,
    /// Owned by a strategy; revoked once `expires_on` passes unless refreshed.
    Strategy {
        name: StrategyName,
        expires_on: DateTime<Utc>,
    },
}

impl Retention {
    #[must_use]
    pub fn strategy(name: StrategyName, expires_on: DateTime<Utc>) -> Self {
        Self::Strategy { name, expires_on }
    }

    #[must_use]
    pub const fn strategy_name(&self) -> Option<&StrategyName> {
        match self {
            Self::Manual => None,
            Self::Strategy { name, .. } => Some(name),
        }
    }

    #[must_use]
    pub const fn expires_on(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Manual => None,
            Self::Strategy { expires_on, .. } => Some(*expires_on),
        }
    }

    #[must_use]
    pub const fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// Input for creating a record; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub key: ArtifactKey,
    pub direction: CacheDirection,
    /// Host holding the copy. Always this instance for [`CacheDirection::LocalCopyOfRemote`].
    pub holder: Host,
    pub size_bytes: u64,
    /// Origin-fetchable locator (for remote copies: the holder's locator).
    pub file_url: Url,
    pub retention: Retention,
    /// Local bytes, if this instance stores any for the record.
    pub local_path: Option<PathBuf>,
}

/// A persisted redundancy entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyRecord {
    pub id: RecordId,
    pub key: ArtifactKey,
    pub direction: CacheDirection,
    pub holder: Host,
    pub size_bytes: u64,
    pub file_url: Url,
    pub retention: Retention,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl RedundancyRecord {
    /// Materialise a record from its creation input.
    #[must_use]
    pub fn from_new(id: RecordId, new: NewRecord, now: DateTime<Utc>) -> Self {
        Self {
            id,
            key: new.key,
            direction: new.direction,
            holder: new.holder,
            size_bytes: new.size_bytes,
            file_url: new.file_url,
            retention: new.retention,
            created_at: now,
            updated_at: now,
            local_path: new.local_path,
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> Option<&StrategyName> {
        self.retention.strategy_name()
    }

    #[must_use]
    pub const fn expires_on(&self) -> Option<DateTime<Utc>> {
        self.retention.expires_on()
    }

    #[must_use]
    pub const fn is_manual(&self) -> bool {
        self.retention.is_manual()
    }

    /// Whether the record has an expiry at or before `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_on().is_some_and(|expires| expires <= now)
    }

    /// Whether this instance's budget for `strategy` pays for this record.
    #[must_use]
    pub fn counts_against(&self, strategy: &StrategyName) -> bool {
        self.direction == CacheDirection::LocalCopyOfRemote && self.strategy() == Some(strategy)
    }
}
