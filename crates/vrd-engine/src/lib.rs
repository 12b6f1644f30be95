//! Video redundancy engine.
//!
//! Decides which remote videos this instance caches, replicates them with
//! the origin's consent, keeps every strategy inside its storage budget and
//! answers remote hosts that want to cache our own videos.
//!
//! # Overview
//!
//! - **Trust gate**: [`TrustPolicyGate`] evaluates inbound duplication requests
//! - **Selection**: [`CandidateSelector`] implementations stream candidates
//!   from the [`VideoCatalog`] in priority order
//! - **Scheduling**: one [`StrategyScheduler`] per configured strategy
//! - **Replication**: [`ReplicationWorker`] confirms with the origin, fetches,
//!   stores and records
//! - **Reaping**: [`ExpirationReaper`] removes expired and orphaned records
//! - **Operator surfaces**: [`ManualRedundancyApi`] and [`QueryApi`]
//!
//! Everything is wired together by [`RedundancyEngine`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod collaborators;
mod engine;
mod error;
mod gate;
mod inbound;
mod manual;
mod query;
mod reaper;
mod scheduler;
mod selector;
mod storage;
mod worker;

pub use collaborators::{
    ArtifactFetcher, ArtifactStorage, ByteStream, CatalogOrder, CatalogQuery, Clock,
    DuplicationHandler, FederationTransport, FollowGraph, StaticFollowGraph, StoredArtifact,
    SystemClock, VideoArtifact, VideoCatalog, VideoMetadata, artifact_file_name,
};
pub use engine::{Collaborators, EngineHandle, RedundancyEngine};
pub use error::{
    CatalogError, EngineError, ErrorBody, FederationError, FetchError, ManualError, QueryError,
    ReplicationError, StorageError,
};
pub use gate::{GateDecision, GateReason, TrustPolicyGate, Verdict};
pub use inbound::InboundHandler;
pub use manual::ManualRedundancyApi;
pub use query::{
    ListQuery, ListTarget, MAX_PAGE_SIZE, Page, QueryApi, RedundancyView, Sort, SortKey,
    StrategyStats,
};
pub use reaper::{ExpirationReaper, ReapReport, ReapedStrategy};
pub use scheduler::{
    DrainReport, SchedulerDeps, SchedulerState, StrategyScheduler, TickOutcome, TickReport,
};
pub use selector::{
    Candidate, CandidateSelector, CandidateStream, MostViewsSelector, RecentlyAddedSelector,
    SelectionContext, SelectorRegistry, TrendingSelector, select_with,
};
pub use storage::{FsArtifactStorage, HttpArtifactFetcher};
pub use worker::{ReplicationJob, ReplicationStats, ReplicationWorker, WorkerDeps};
