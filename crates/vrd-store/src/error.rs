//! Error types for the redundancy store.

use thiserror::Error;
use vrd_core::{RecordId, StrategyName};

/// Errors for record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redundancy record not found: {0}")]
    NotFound(RecordId),

    #[error("record {0} is manual and has no expiry to refresh")]
    ManualRecord(RecordId),

    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Failure reported by a [`RecordRemover`](crate::RecordRemover).
#[derive(Debug, Error)]
#[error("failed to remove {id}: {reason}")]
pub struct RemovalError {
    pub id: RecordId,
    pub reason: String,
}

/// Errors for quota operations.
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("eviction for strategy {strategy} failed: {source}")]
    Eviction {
        strategy: StrategyName,
        #[source]
        source: RemovalError,
    },
}
