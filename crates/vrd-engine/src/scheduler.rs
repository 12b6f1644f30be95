//! Per-strategy scheduling of selection, admission and replication.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use vrd_core::{
    ArtifactKey, Host, RedundancyRecord, RedundancyStrategyConfig, StrategyName, VideoId,
};
use vrd_store::{AdmitDecision, QuotaTracker, RedundancyStore};

use crate::collaborators::{Clock, VideoCatalog, VideoMetadata};
use crate::error::ReplicationError;
use crate::selector::{CandidateSelector, SelectionContext, select_with};
use crate::worker::{ReplicationJob, ReplicationWorker};

type JobResult = (ArtifactKey, Result<RedundancyRecord, ReplicationError>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TickOutcome {
    Completed,
    /// A previous tick was still running; nothing was done.
    Overlapped,
    /// Shutdown was requested between two candidates.
    Cancelled,
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub strategy: StrategyName,
    pub outcome: TickOutcome,
    pub considered: usize,
    pub admitted: usize,
    pub skipped: usize,
    pub evicted: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// Replications from earlier ticks that finished since the last tick.
    pub replications_completed: usize,
    pub replications_failed: usize,
}

impl TickReport {
    fn new(strategy: StrategyName, outcome: TickOutcome) -> Self {
        Self {
            strategy,
            outcome,
            considered: 0,
            admitted: 0,
            skipped: 0,
            evicted: 0,
            refreshed: 0,
            failed: 0,
            replications_completed: 0,
            replications_failed: 0,
        }
    }
}

/// Result of waiting for in-flight replications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Collaborators shared by every scheduler.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn RedundancyStore>,
    pub catalog: Arc<dyn VideoCatalog>,
    pub clock: Arc<dyn Clock>,
    pub quota: Arc<QuotaTracker>,
    pub worker: Arc<ReplicationWorker>,
}

/// Drives one strategy: `Idle -> Running -> Idle` every `check_interval`.
///
/// Admission inside a tick is sequential. Replications run in the
/// background and are collected on the next tick or on [`drain`](Self::drain).
pub struct StrategyScheduler {
    strategy: RedundancyStrategyConfig,
    selector: Arc<dyn CandidateSelector>,
    local_host: Host,
    batch_size: usize,
    deps: SchedulerDeps,
    running: AtomicBool,
    tasks: Mutex<JoinSet<JobResult>>,
}

impl std::fmt::Debug for StrategyScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyScheduler")
            .field("strategy", &self.strategy.name)
            .field("selector", &self.selector.kind())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StrategyScheduler {
    #[must_use]
    pub fn new(
        strategy: RedundancyStrategyConfig,
        selector: Arc<dyn CandidateSelector>,
        local_host: Host,
        batch_size: usize,
        deps: SchedulerDeps,
    ) -> Self {
        Self {
            strategy,
            selector,
            local_host,
            batch_size,
            deps,
            running: AtomicBool::new(false),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> &RedundancyStrategyConfig {
        &self.strategy
    }

    #[must_use]
    pub const fn selector(&self) -> &Arc<dyn CandidateSelector> {
        &self.selector
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Run one tick. Skipped if another tick of this strategy is running.
    ///
    /// `cancel` is checked between candidates; an admission that has started
    /// evicting always finishes first.
    pub async fn tick(&self, cancel: &watch::Receiver<bool>) -> TickReport {
        let name = self.strategy.name.clone();
        let Some(_running) = RunningGuard::acquire(&self.running) else {
            tracing::debug!(strategy = %name, "Previous tick still running, skipping");
            return TickReport::new(name, TickOutcome::Overlapped);
        };

        let now = self.deps.clock.now();
        let mut report = TickReport::new(name.clone(), TickOutcome::Completed);
        self.harvest(&mut report);

        match self
            .deps
            .quota
            .enforce_limit(&self.strategy, self.deps.worker.as_ref())
            .await
        {
            Ok(evicted) => report.evicted += evicted.len(),
            Err(err) => {
                report.failed += 1;
                tracing::warn!(strategy = %name, error = %err, "Budget enforcement failed");
            }
        }

        self.refresh_owned(now, &mut report).await;

        let ctx = SelectionContext {
            catalog: Arc::clone(&self.deps.catalog),
            store: Arc::clone(&self.deps.store),
            local_host: self.local_host.clone(),
            now,
            batch_size: self.batch_size,
        };
        let mut candidates = select_with(Arc::clone(&self.selector), self.strategy.clone(), ctx);

        while let Some(next) = candidates.next().await {
            if *cancel.borrow() {
                report.outcome = TickOutcome::Cancelled;
                break;
            }

            let candidate = match next {
                Ok(candidate) => candidate,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(strategy = %name, error = %err, "Candidate selection failed");
                    break;
                }
            };
            report.considered += 1;

            if self.deps.worker.is_in_flight(&candidate.key) {
                report.skipped += 1;
                continue;
            }

            let decision = self
                .deps
                .quota
                .try_admit(&self.strategy, candidate.size_bytes, self.deps.worker.as_ref())
                .await;
            match decision {
                Ok(AdmitDecision::Admitted {
                    reservation,
                    evicted,
                }) => {
                    report.admitted += 1;
                    report.evicted += evicted.len();
                    let job = ReplicationJob::for_strategy(candidate, &self.strategy, reservation, now);
                    self.deps
                        .worker
                        .spawn_replicate(job, &mut self.tasks.lock());
                }
                Ok(AdmitDecision::Skipped { reason }) => {
                    report.skipped += 1;
                    tracing::debug!(
                        strategy = %name,
                        artifact = %candidate.key,
                        reason = reason.as_str(),
                        "Candidate skipped"
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        strategy = %name,
                        artifact = %candidate.key,
                        error = %err,
                        "Admission failed"
                    );
                }
            }
        }

        tracing::info!(
            strategy = %name,
            outcome = ?report.outcome,
            considered = report.considered,
            admitted = report.admitted,
            skipped = report.skipped,
            evicted = report.evicted,
            refreshed = report.refreshed,
            failed = report.failed,
            "Strategy tick finished"
        );
        report
    }

    /// Extend the expiry of every owned record whose video still qualifies.
    async fn refresh_owned(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let mut videos: HashMap<VideoId, Option<VideoMetadata>> = HashMap::new();
        for record in self.deps.store.oldest_for_strategy(&self.strategy.name).await {
            let video_id = record.key.video_id();
            if !videos.contains_key(&video_id) {
                match self.deps.catalog.video_metadata(video_id).await {
                    Ok(video) => {
                        videos.insert(video_id, video);
                    }
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(strategy = %self.strategy.name, error = %err, "Refresh pass aborted");
                        return;
                    }
                }
            }

            let Some(Some(video)) = videos.get(&video_id) else {
                continue;
            };
            if !self.selector.still_qualifies(video, &self.strategy, now) {
                continue;
            }

            match self
                .deps
                .worker
                .refresh(&record, &self.strategy, &video.origin_host, now)
                .await
            {
                Ok(_) => report.refreshed += 1,
                Err(err) => tracing::debug!(
                    strategy = %self.strategy.name,
                    record_id = %record.id,
                    error = %err,
                    "Refresh skipped"
                ),
            }
        }
    }

    fn harvest(&self, report: &mut TickReport) {
        let mut tasks = self.tasks.lock();
        while let Some(joined) = tasks.try_join_next() {
            match joined {
                Ok((_, Ok(_))) => report.replications_completed += 1,
                Ok((_, Err(_))) => report.replications_failed += 1,
                Err(err) => {
                    report.replications_failed += 1;
                    tracing::error!(strategy = %self.strategy.name, error = %err, "Replication task panicked");
                }
            }
        }
    }

    /// Wait for every in-flight replication of this strategy.
    pub async fn drain(&self) -> DrainReport {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut report = DrainReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => report.completed += 1,
                Ok((_, Err(_))) => report.failed += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(strategy = %self.strategy.name, error = %err, "Replication task panicked");
                }
            }
        }
        report
    }

    /// Tick every `check_interval` until `shutdown` turns true, then drain.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.strategy.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            strategy = %self.strategy.name,
            selector = %self.selector.kind(),
            interval_secs = self.strategy.check_interval.as_secs(),
            "Strategy scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&shutdown).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let drained = self.drain().await;
        tracing::info!(
            strategy = %self.strategy.name,
            completed = drained.completed,
            failed = drained.failed,
            "Strategy scheduler stopped"
        );
    }
}
