//! A fully wired engine on a loopback network.

use std::sync::Arc;

use tokio::sync::watch;
use vrd_core::{EngineConfig, FollowFact, Host, StrategyName};
use vrd_engine::{
    Collaborators, DrainReport, EngineError, RedundancyEngine, StaticFollowGraph, TickReport,
};
use vrd_store::MemoryRedundancyStore;

use crate::artifacts::{MemoryFetcher, MemoryStorage};
use crate::catalog::MemoryCatalog;
use crate::clock::ManualClock;
use crate::fixtures::VideoBuilder;
use crate::network::{LoopbackNetwork, LoopbackTransport};

/// One engine instance with in-memory collaborators it exposes for
/// inspection.
pub struct TestInstance {
    pub host: Host,
    pub engine: RedundancyEngine,
    pub store: Arc<MemoryRedundancyStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub follows: Arc<StaticFollowGraph>,
    pub fetcher: Arc<MemoryFetcher>,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<LoopbackTransport>,
}

impl std::fmt::Debug for TestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestInstance")
            .field("host", &self.host)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl TestInstance {
    /// Build an instance with its own clock.
    ///
    /// # Panics
    /// Panics if `config` is rejected.
    #[must_use]
    pub fn new(network: &LoopbackNetwork, config: EngineConfig) -> Self {
        Self::with_clock(network, config, Arc::new(ManualClock::default()))
    }

    /// Build an instance sharing `clock` with other instances.
    ///
    /// # Panics
    /// Panics if `config` is rejected.
    #[must_use]
    pub fn with_clock(
        network: &LoopbackNetwork,
        config: EngineConfig,
        clock: Arc<ManualClock>,
    ) -> Self {
        Self::try_build(network, config, clock).expect("valid test engine config")
    }

    /// # Errors
    /// Returns the engine's assembly error.
    pub fn try_build(
        network: &LoopbackNetwork,
        config: EngineConfig,
        clock: Arc<ManualClock>,
    ) -> Result<Self, EngineError> {
        let host = config.local_host.clone();
        let store = Arc::new(MemoryRedundancyStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let follows = Arc::new(StaticFollowGraph::default());
        let fetcher = Arc::new(MemoryFetcher::new());
        let storage = Arc::new(MemoryStorage::default());
        let transport = network.transport(host.clone());

        let engine = RedundancyEngine::new(
            config,
            store.clone(),
            Collaborators {
                catalog: catalog.clone(),
                follows: follows.clone(),
                federation: transport.clone(),
                fetcher: fetcher.clone(),
                storage: storage.clone(),
                clock: clock.clone(),
            },
        )?;

        Ok(Self {
            host,
            engine,
            store,
            catalog,
            follows,
            fetcher,
            storage,
            clock,
            transport,
        })
    }

    /// Make `video` known to this instance. Remote videos also become
    /// fetchable.
    pub fn publish(&self, video: &VideoBuilder) {
        let metadata = video.build_for(&self.host);
        if !metadata.is_local {
            for artifact in &metadata.artifacts {
                self.fetcher
                    .serve_size(artifact.file_url.clone(), artifact.size_bytes);
            }
        }
        self.catalog.insert(metadata);
    }

    /// This instance now follows `other` (accepted).
    pub fn follow(&self, other: &Host) {
        self.follows
            .upsert(FollowFact::accepted(self.host.clone(), other.clone()));
    }

    /// Run one tick of `strategy` without cancellation.
    ///
    /// # Panics
    /// Panics if `strategy` is not configured.
    pub async fn tick(&self, strategy: &str) -> TickReport {
        let (_cancel_tx, cancel) = watch::channel(false);
        self.engine
            .scheduler(&StrategyName::new(strategy))
            .expect("strategy is configured")
            .tick(&cancel)
            .await
    }

    /// Run one tick of `strategy` and wait for the replications it started.
    ///
    /// # Panics
    /// Panics if `strategy` is not configured.
    pub async fn tick_and_drain(&self, strategy: &str) -> (TickReport, DrainReport) {
        let tick = self.tick(strategy).await;
        let drained = self
            .engine
            .scheduler(&StrategyName::new(strategy))
            .expect("strategy is configured")
            .drain()
            .await;
        (tick, drained)
    }
}
