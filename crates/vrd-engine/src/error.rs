//! Error types for the redundancy engine.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use vrd_core::{
    ArtifactKey, ConfigError, DenyReason, Host, SelectorKind, StrategyName, VideoId,
};
use vrd_store::StoreError;

/// Failure while pulling artifact bytes from an origin.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("origin answered with status {0}")]
    Status(u16),

    #[error("artifact not available at {0}")]
    NotAvailable(String),
}

/// Failure of the local artifact storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stream interrupted: {0}")]
    Fetch(#[from] FetchError),
}

/// Failure delivering a federation message.
#[derive(Debug, Clone, Error)]
pub enum FederationError {
    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: Host, reason: String },

    #[error("no duplication handler registered for {0}")]
    NoHandler(Host),
}

/// Failure of the video catalog collaborator.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("video catalog unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the replication worker.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("{0} is already being replicated")]
    AlreadyInFlight(ArtifactKey),

    #[error("{host} denied duplication: {reason}")]
    TrustDenied { host: Host, reason: DenyReason },

    #[error("{host} did not confirm duplication within {timeout:?}")]
    ConfirmationTimeout { host: Host, timeout: Duration },

    #[error("fetched {actual} bytes but {expected} were admitted")]
    SizeExceedsAdmission { expected: u64, actual: u64 },

    #[error("invalid redundancy URL: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReplicationError {
    /// Whether retrying on a later tick may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AlreadyInFlight(_)
                | Self::ConfirmationTimeout { .. }
                | Self::Federation(_)
                | Self::Fetch(_)
                | Self::Storage(_)
                | Self::Catalog(_)
        )
    }
}

/// Structured error body for operator tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Errors from manual redundancy operations.
#[derive(Debug, Error)]
pub enum ManualError {
    #[error("{0} not found")]
    VideoNotFound(VideoId),

    #[error("{0} is hosted by this instance and cannot be duplicated")]
    LocalVideo(VideoId),

    #[error("every artifact of {0} is already duplicated")]
    AlreadyDuplicated(VideoId),

    #[error("origin denied duplication of {video_id}: {reason}")]
    TrustDenied { video_id: VideoId, reason: DenyReason },

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl ManualError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::VideoNotFound(_) => "video.not_found",
            Self::LocalVideo(_) => "video.is_local",
            Self::AlreadyDuplicated(_) => "redundancy.already_exists",
            Self::TrustDenied { .. } => "trust.denied",
            Self::Replication(_) => "replication.failed",
            Self::Catalog(_) => "catalog.unavailable",
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Errors from redundancy listings and statistics.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown list target: {0}")]
    InvalidTarget(String),

    #[error("unknown sort key: {0}")]
    InvalidSort(String),

    #[error("limit must be between 1 and {max}, got {limit}")]
    InvalidLimit { limit: usize, max: usize },

    #[error("strategy {0} is not configured")]
    UnknownStrategy(StrategyName),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl QueryError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidTarget(_) => "query.invalid_target",
            Self::InvalidSort(_) => "query.invalid_sort",
            Self::InvalidLimit { .. } => "query.invalid_limit",
            Self::UnknownStrategy(_) => "query.unknown_strategy",
            Self::Catalog(_) => "catalog.unavailable",
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Errors raised while assembling the engine. Fatal at startup.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no selector registered for {0}")]
    MissingSelector(SelectorKind),
}
