//! Expiration reaper.
//!
//! Removes strategy-owned records past their expiry, records of strategies
//! that are no longer configured, and expired announcements from remote
//! hosts caching our videos. Manual records are never touched.
//!
//! An expired local copy whose video still qualifies for its strategy is
//! refreshed instead of removed, so expiry never races the strategy tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use vrd_core::{CacheDirection, Host, RedundancyRecord, RedundancyStrategyConfig, StrategyName};
use vrd_store::{RecordFilter, RedundancyStore, RemovalOutcome};

use crate::collaborators::{Clock, VideoCatalog};
use crate::selector::CandidateSelector;
use crate::worker::ReplicationWorker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    /// Local copies of remote videos past their expiry.
    pub expired_local: usize,
    /// Remote copies of our videos past their announced expiry.
    pub expired_remote: usize,
    /// Local copies owned by a strategy that is no longer configured.
    pub orphaned: usize,
    /// Expired local copies kept because their video still qualifies.
    pub refreshed: usize,
    pub failed: usize,
}

impl ReapReport {
    #[must_use]
    pub const fn removed(&self) -> usize {
        self.expired_local + self.expired_remote + self.orphaned
    }
}

/// A configured strategy and the selector that decides what it keeps.
pub type ReapedStrategy = (RedundancyStrategyConfig, Arc<dyn CandidateSelector>);

enum Verdict {
    Keep,
    Refresh {
        strategy: RedundancyStrategyConfig,
        origin: Host,
    },
    Remove,
}

pub struct ExpirationReaper {
    store: Arc<dyn RedundancyStore>,
    catalog: Arc<dyn VideoCatalog>,
    worker: Arc<ReplicationWorker>,
    clock: Arc<dyn Clock>,
    strategies: HashMap<StrategyName, ReapedStrategy>,
    interval: Duration,
}

impl std::fmt::Debug for ExpirationReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationReaper")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl ExpirationReaper {
    #[must_use]
    pub fn new(
        store: Arc<dyn RedundancyStore>,
        catalog: Arc<dyn VideoCatalog>,
        worker: Arc<ReplicationWorker>,
        clock: Arc<dyn Clock>,
        strategies: impl IntoIterator<Item = ReapedStrategy>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            worker,
            clock,
            strategies: strategies
                .into_iter()
                .map(|(config, selector)| (config.name.clone(), (config, selector)))
                .collect(),
            interval,
        }
    }

    /// One reaping pass at `now`.
    pub async fn reap(&self, now: DateTime<Utc>) -> ReapReport {
        let mut report = ReapReport::default();

        for record in self.store.expired(now).await {
            match self.verdict(&record, now).await {
                Verdict::Keep => {
                    report.failed += 1;
                    continue;
                }
                Verdict::Refresh { strategy, origin } => {
                    match self.worker.refresh(&record, &strategy, &origin, now).await {
                        Ok(_) => report.refreshed += 1,
                        Err(err) => {
                            report.failed += 1;
                            tracing::warn!(record_id = %record.id, error = %err, "Failed to refresh redundancy");
                        }
                    }
                    continue;
                }
                Verdict::Remove => {}
            }

            let direction = record.direction;
            if self.remove(&record, &mut report).await {
                match direction {
                    CacheDirection::LocalCopyOfRemote => report.expired_local += 1,
                    CacheDirection::RemoteCopyOfLocal => report.expired_remote += 1,
                }
            }
        }

        let local = self
            .store
            .list(&RecordFilter::direction(CacheDirection::LocalCopyOfRemote))
            .await;
        for record in local {
            let orphaned = record
                .strategy()
                .is_some_and(|name| !self.strategies.contains_key(name));
            if orphaned && self.remove(&record, &mut report).await {
                report.orphaned += 1;
            }
        }

        if report.removed() > 0 || report.refreshed > 0 || report.failed > 0 {
            tracing::info!(
                expired_local = report.expired_local,
                expired_remote = report.expired_remote,
                orphaned = report.orphaned,
                refreshed = report.refreshed,
                failed = report.failed,
                "Reaped redundancies"
            );
        }
        report
    }

    /// Whether an expired record goes, or stays because its video still qualifies.
    async fn verdict(&self, record: &RedundancyRecord, now: DateTime<Utc>) -> Verdict {
        if record.direction != CacheDirection::LocalCopyOfRemote {
            return Verdict::Remove;
        }
        let Some((strategy, selector)) = record.strategy().and_then(|name| self.strategies.get(name))
        else {
            return Verdict::Remove;
        };

        match self.catalog.video_metadata(record.key.video_id()).await {
            Ok(Some(video)) if selector.still_qualifies(&video, strategy, now) => Verdict::Refresh {
                strategy: strategy.clone(),
                origin: video.origin_host,
            },
            Ok(_) => Verdict::Remove,
            Err(err) => {
                tracing::warn!(record_id = %record.id, error = %err, "Cannot tell if expired redundancy still qualifies");
                Verdict::Keep
            }
        }
    }

    async fn remove(&self, record: &RedundancyRecord, report: &mut ReapReport) -> bool {
        match self.worker.remove(record.id).await {
            Ok(RemovalOutcome::Removed(_)) => true,
            Ok(RemovalOutcome::AlreadyAbsent) => false,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(record_id = %record.id, error = %err, "Failed to reap redundancy");
                false
            }
        }
    }

    /// Reap every `interval` until `shutdown` turns true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "Expiration reaper started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.reap(self.clock.now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Expiration reaper stopped");
    }
}
