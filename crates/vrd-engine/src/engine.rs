//! Engine assembly and lifecycle.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use vrd_core::{EngineConfig, StrategyName};
use vrd_store::{QuotaStats, QuotaTracker, RedundancyStore};

use crate::collaborators::{
    ArtifactFetcher, ArtifactStorage, Clock, DuplicationHandler, FederationTransport, FollowGraph,
    VideoCatalog,
};
use crate::error::EngineError;
use crate::gate::TrustPolicyGate;
use crate::inbound::InboundHandler;
use crate::manual::ManualRedundancyApi;
use crate::query::QueryApi;
use crate::reaper::ExpirationReaper;
use crate::scheduler::{SchedulerDeps, StrategyScheduler};
use crate::selector::SelectorRegistry;
use crate::worker::{ReplicationWorker, WorkerDeps};

/// Everything the engine consumes from the host platform.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn VideoCatalog>,
    pub follows: Arc<dyn FollowGraph>,
    pub federation: Arc<dyn FederationTransport>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub storage: Arc<dyn ArtifactStorage>,
    pub clock: Arc<dyn Clock>,
}

/// The assembled redundancy engine.
///
/// Construction wires every component and registers the inbound handler
/// with the federation transport. Nothing runs until [`start`](Self::start).
pub struct RedundancyEngine {
    config: Arc<EngineConfig>,
    store: Arc<dyn RedundancyStore>,
    quota: Arc<QuotaTracker>,
    worker: Arc<ReplicationWorker>,
    schedulers: Vec<Arc<StrategyScheduler>>,
    reaper: Arc<ExpirationReaper>,
    manual: ManualRedundancyApi,
    query: QueryApi,
    inbound: Arc<InboundHandler>,
}

impl std::fmt::Debug for RedundancyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedundancyEngine")
            .field("local_host", &self.config.local_host)
            .field("schedulers", &self.schedulers)
            .finish_non_exhaustive()
    }
}

impl RedundancyEngine {
    /// Build the engine with the default selectors.
    ///
    /// # Errors
    /// Returns `Config` if `config` is invalid.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RedundancyStore>,
        collaborators: Collaborators,
    ) -> Result<Self, EngineError> {
        Self::with_selectors(config, store, collaborators, &SelectorRegistry::with_defaults())
    }

    /// Build the engine resolving strategy selectors from `selectors`.
    ///
    /// # Errors
    /// Returns `Config` if `config` is invalid, `MissingSelector` if a
    /// strategy names a selector `selectors` does not provide.
    pub fn with_selectors(
        config: EngineConfig,
        store: Arc<dyn RedundancyStore>,
        collaborators: Collaborators,
        selectors: &SelectorRegistry,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let config = Arc::new(config);
        let Collaborators {
            catalog,
            follows,
            federation,
            fetcher,
            storage,
            clock,
        } = collaborators;

        let quota = Arc::new(QuotaTracker::new(Arc::clone(&store)));
        let worker = Arc::new(ReplicationWorker::new(
            config.local_host.clone(),
            WorkerDeps {
                store: Arc::clone(&store),
                catalog: Arc::clone(&catalog),
                fetcher,
                storage,
                federation: Arc::clone(&federation),
                clock: Arc::clone(&clock),
            },
            config.max_concurrent_replications,
            config.confirmation_timeout,
        ));

        let deps = SchedulerDeps {
            store: Arc::clone(&store),
            catalog: Arc::clone(&catalog),
            clock: Arc::clone(&clock),
            quota: Arc::clone(&quota),
            worker: Arc::clone(&worker),
        };
        let schedulers = config
            .strategies
            .iter()
            .map(|strategy| {
                let selector = selectors.get(strategy.selector)?;
                Ok(Arc::new(StrategyScheduler::new(
                    strategy.clone(),
                    selector,
                    config.local_host.clone(),
                    config.candidate_batch_size,
                    deps.clone(),
                )))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let reaper = Arc::new(ExpirationReaper::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&worker),
            Arc::clone(&clock),
            schedulers
                .iter()
                .map(|scheduler| (scheduler.strategy().clone(), Arc::clone(scheduler.selector()))),
            config.reaper_interval,
        ));

        let manual = ManualRedundancyApi::new(
            config.local_host.clone(),
            Arc::clone(&catalog),
            Arc::clone(&store),
            Arc::clone(&worker),
        );
        let query = QueryApi::new(Arc::clone(&store), Arc::clone(&catalog), Arc::clone(&config));

        let gate = TrustPolicyGate::new(config.accept_from, config.local_host.clone(), follows);
        let inbound = Arc::new(InboundHandler::new(
            gate,
            Arc::clone(&store),
            catalog,
            clock,
        ));
        federation.on_duplication_request(Arc::clone(&inbound) as Arc<dyn DuplicationHandler>);

        tracing::info!(
            local_host = %config.local_host,
            accept_from = %config.accept_from,
            strategies = schedulers.len(),
            "Redundancy engine assembled"
        );

        Ok(Self {
            config,
            store,
            quota,
            worker,
            schedulers,
            reaper,
            manual,
            query,
            inbound,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RedundancyStore> {
        &self.store
    }

    #[must_use]
    pub const fn worker(&self) -> &Arc<ReplicationWorker> {
        &self.worker
    }

    #[must_use]
    pub const fn manual(&self) -> &ManualRedundancyApi {
        &self.manual
    }

    #[must_use]
    pub const fn query(&self) -> &QueryApi {
        &self.query
    }

    #[must_use]
    pub const fn inbound(&self) -> &Arc<InboundHandler> {
        &self.inbound
    }

    #[must_use]
    pub const fn reaper(&self) -> &Arc<ExpirationReaper> {
        &self.reaper
    }

    #[must_use]
    pub fn schedulers(&self) -> &[Arc<StrategyScheduler>] {
        &self.schedulers
    }

    #[must_use]
    pub fn scheduler(&self, name: &StrategyName) -> Option<&Arc<StrategyScheduler>> {
        self.schedulers
            .iter()
            .find(|scheduler| &scheduler.strategy().name == name)
    }

    #[must_use]
    pub const fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    /// Current budget usage of every configured strategy.
    pub async fn quota_stats(&self) -> Vec<QuotaStats> {
        let mut stats = Vec::with_capacity(self.config.strategies.len());
        for strategy in &self.config.strategies {
            stats.push(self.quota.stats(strategy).await);
        }
        stats
    }

    /// Spawn every scheduler and the reaper.
    #[must_use]
    pub fn start(&self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        for scheduler in &self.schedulers {
            tasks.spawn(Arc::clone(scheduler).run(shutdown_rx.clone()));
        }
        tasks.spawn(Arc::clone(&self.reaper).run(shutdown_rx));

        tracing::info!(tasks = tasks.len(), "Redundancy engine started");
        EngineHandle { shutdown_tx, tasks }
    }
}

/// Running engine tasks.
#[derive(Debug)]
pub struct EngineHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl EngineHandle {
    /// Signal shutdown and wait for every task to stop.
    ///
    /// Schedulers finish their current candidate and drain in-flight
    /// replications before returning.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "Engine task panicked");
            }
        }
        tracing::info!("Redundancy engine stopped");
    }
}
