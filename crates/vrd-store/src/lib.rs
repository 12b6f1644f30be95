//! Redundancy record storage and quota accounting.
//!
//! # Overview
//!
//! - **Redundancy Store**: one record per duplicated artifact, keyed by id,
//!   unique per `(artifact, direction, holder)`, indexed by strategy
//! - **Quota Tracker**: per-strategy budget checks with oldest-first eviction
//!   and reservations for replications still in flight
//!
//! # Design Principles
//!
//! 1. **Removal is delete-if-exists**: only the caller that actually removed a
//!    record sees it, so usage is decremented exactly once.
//!
//! 2. **Budgets are partitioned**: every strategy has its own ledger and its
//!    own admission lock. Nothing is shared across strategies.
//!
//! 3. **Manual records are outside every budget**: they carry no strategy and
//!    are never candidates for eviction.

#![forbid(unsafe_code)]
#![allow(clippy::significant_drop_tightening)]

mod error;
mod quota;
mod redundancy_store;

pub use error::{QuotaError, RemovalError, StoreError};
pub use quota::{AdmitDecision, QuotaReservation, QuotaStats, QuotaTracker, SkipReason};
pub use redundancy_store::{
    InsertOutcome, MemoryRedundancyStore, RecordFilter, RecordRemover, RedundancyStore,
    RemovalOutcome, StoreSnapshot,
};
