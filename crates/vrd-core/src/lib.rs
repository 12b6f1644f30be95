//! Core types for the video redundancy engine.
//!
//! # Overview
//!
//! - **Identifiers**: [`VideoId`], [`RecordId`], [`Host`], [`StrategyName`]
//! - **Artifacts**: the replicable units of a video ([`ArtifactKey`])
//! - **Records**: [`RedundancyRecord`] and its [`Retention`] (manual vs strategy-owned)
//! - **Federation payloads**: [`DuplicationRequest`], [`FederationMessage`], [`DuplicationResponse`]
//! - **Configuration**: a closed, validated [`EngineConfig`] loaded once at startup
//!
//! Nothing in this crate performs I/O except [`EngineConfig::load`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod artifact;
mod config;
mod error;
mod federation;
mod follow;
mod id;
mod policy;
mod record;

pub use artifact::{ArtifactKey, ArtifactKind};
pub use config::{
    DEFAULT_CANDIDATE_BATCH_SIZE, DEFAULT_CONFIRMATION_TIMEOUT_SECS,
    DEFAULT_MAX_CONCURRENT_REPLICATIONS, DEFAULT_REAPER_INTERVAL_SECS, EngineConfig, LoggingConfig,
    RedundancyStrategyConfig, SelectorKind,
};
pub use error::ConfigError;
pub use federation::{DenyReason, DuplicationRequest, DuplicationResponse, FederationMessage};
pub use follow::{FollowFact, FollowState};
pub use id::{Host, HostError, RecordId, StrategyName, VideoId};
pub use policy::AcceptancePolicy;
pub use record::{CacheDirection, NewRecord, RedundancyRecord, Retention};
