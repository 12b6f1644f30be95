//! Replication worker: fetch-and-store of artifacts and the single removal path.
//!
//! Every redundancy this instance creates goes through [`ReplicationWorker::replicate`]
//! and every record removal (eviction, expiry, operator request) goes through
//! [`ReplicationWorker::remove`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use url::Url;
use vrd_core::{
    ArtifactKey, CacheDirection, DuplicationRequest, DuplicationResponse, FederationMessage, Host,
    NewRecord, RecordId, RedundancyRecord, RedundancyStrategyConfig, Retention,
};
use vrd_store::{
    InsertOutcome, QuotaReservation, RecordRemover, RedundancyStore, RemovalError, RemovalOutcome,
};

use crate::collaborators::{
    ArtifactFetcher, ArtifactStorage, Clock, FederationTransport, StoredArtifact, VideoCatalog,
    artifact_file_name,
};
use crate::error::ReplicationError;
use crate::selector::Candidate;

/// Path under which this instance serves its redundancy copies.
const REDUNDANCY_PATH: &str = "static/redundancy";

/// Replication statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Artifacts that turned out to be covered already.
    pub already_covered: u64,
    pub bytes_replicated: u64,
    pub removed: u64,
}

/// One artifact to duplicate.
#[derive(Debug)]
pub struct ReplicationJob {
    pub candidate: Candidate,
    pub retention: Retention,
    /// Budget held for the job; released when the job is dropped.
    pub reservation: Option<QuotaReservation>,
}

impl ReplicationJob {
    /// Job owned by a strategy, expiring `min_lifetime` after `now`.
    #[must_use]
    pub fn for_strategy(
        candidate: Candidate,
        strategy: &RedundancyStrategyConfig,
        reservation: QuotaReservation,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            candidate,
            retention: Retention::strategy(strategy.name.clone(), strategy.expiry_from(now)),
            reservation: Some(reservation),
        }
    }

    /// Operator job with no strategy and no expiry.
    #[must_use]
    pub const fn manual(candidate: Candidate) -> Self {
        Self {
            candidate,
            retention: Retention::Manual,
            reservation: None,
        }
    }
}

/// Marks an artifact as in flight until dropped.
struct InFlight<'a> {
    keys: &'a Mutex<HashSet<ArtifactKey>>,
    key: ArtifactKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

/// Performs replications with bounded concurrency.
pub struct ReplicationWorker {
    local_host: Host,
    store: Arc<dyn RedundancyStore>,
    catalog: Arc<dyn VideoCatalog>,
    fetcher: Arc<dyn ArtifactFetcher>,
    storage: Arc<dyn ArtifactStorage>,
    federation: Arc<dyn FederationTransport>,
    clock: Arc<dyn Clock>,
    semaphore: Arc<Semaphore>,
    confirmation_timeout: Duration,
    in_flight: Mutex<HashSet<ArtifactKey>>,
    stats: RwLock<ReplicationStats>,
}

impl std::fmt::Debug for ReplicationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationWorker")
            .field("local_host", &self.local_host)
            .field("available_permits", &self.semaphore.available_permits())
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish_non_exhaustive()
    }
}

/// Collaborators of a [`ReplicationWorker`].
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn RedundancyStore>,
    pub catalog: Arc<dyn VideoCatalog>,
    pub fetcher: Arc<dyn ArtifactFetcher>,
    pub storage: Arc<dyn ArtifactStorage>,
    pub federation: Arc<dyn FederationTransport>,
    pub clock: Arc<dyn Clock>,
}

impl ReplicationWorker {
    #[must_use]
    pub fn new(
        local_host: Host,
        deps: WorkerDeps,
        max_concurrent: usize,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            local_host,
            store: deps.store,
            catalog: deps.catalog,
            fetcher: deps.fetcher,
            storage: deps.storage,
            federation: deps.federation,
            clock: deps.clock,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            confirmation_timeout,
            in_flight: Mutex::new(HashSet::new()),
            stats: RwLock::new(ReplicationStats::default()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> ReplicationStats {
        self.stats.read().clone()
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &ArtifactKey) -> bool {
        self.in_flight.lock().contains(key)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn begin(&self, key: ArtifactKey) -> Option<InFlight<'_>> {
        self.in_flight.lock().insert(key).then_some(InFlight {
            keys: &self.in_flight,
            key,
        })
    }

    /// Where this instance serves its copy of `key`.
    ///
    /// # Errors
    /// Returns `Url` if the local host does not form a valid URL.
    pub fn holder_url(&self, key: &ArtifactKey) -> Result<Url, ReplicationError> {
        Ok(Url::parse(&format!(
            "https://{}/{REDUNDANCY_PATH}/{}",
            self.local_host,
            artifact_file_name(key)
        ))?)
    }

    fn duplication_request(
        &self,
        key: &ArtifactKey,
        size_bytes: u64,
        retention: &Retention,
    ) -> Result<FederationMessage, ReplicationError> {
        Ok(FederationMessage::Duplicate(DuplicationRequest {
            requesting_host: self.local_host.clone(),
            key: *key,
            file_url: self.holder_url(key)?,
            size_bytes,
            strategy: retention.strategy_name().cloned(),
            expires_on: retention.expires_on(),
        }))
    }

    /// Ask the origin to confirm, then fetch, store and record the artifact.
    ///
    /// An artifact that already has a local record is returned as is. No
    /// record is written on any failure.
    ///
    /// # Errors
    /// `TrustDenied` or `ConfirmationTimeout` if the origin did not confirm,
    /// `Fetch`/`Storage` on transfer failure, `AlreadyInFlight` if another
    /// replication of the same artifact is running.
    pub async fn replicate(&self, job: ReplicationJob) -> Result<RedundancyRecord, ReplicationError> {
        let key = job.candidate.key;
        let strategy = job.retention.strategy_name().cloned();
        self.stats.write().attempted += 1;

        let result = self.replicate_inner(job).await;
        match &result {
            Ok(record) => tracing::info!(
                record_id = %record.id,
                artifact = %key,
                strategy = ?strategy.as_ref().map(vrd_core::StrategyName::as_str),
                size_bytes = record.size_bytes,
                "Replicated artifact"
            ),
            Err(err) => {
                self.stats.write().failed += 1;
                tracing::warn!(
                    artifact = %key,
                    strategy = ?strategy.as_ref().map(vrd_core::StrategyName::as_str),
                    transient = err.is_transient(),
                    error = %err,
                    "Replication failed"
                );
            }
        }
        result
    }

    async fn replicate_inner(&self, job: ReplicationJob) -> Result<RedundancyRecord, ReplicationError> {
        let candidate = &job.candidate;
        let key = candidate.key;

        let Some(_in_flight) = self.begin(key) else {
            return Err(ReplicationError::AlreadyInFlight(key));
        };
        let Ok(_permit) = self.semaphore.acquire().await else {
            return Err(ReplicationError::AlreadyInFlight(key));
        };

        if let Some(existing) = self
            .store
            .find(&key, CacheDirection::LocalCopyOfRemote, &self.local_host)
            .await
        {
            self.stats.write().already_covered += 1;
            return Ok(existing);
        }

        if let Err(err) = self.confirm_with_origin(candidate, &job.retention).await {
            // The origin may have recorded a request whose answer never came back.
            if matches!(err, ReplicationError::ConfirmationTimeout { .. }) {
                self.withdraw(&candidate.origin_host, key).await;
            }
            return Err(err);
        }

        let stored = match self.transfer(candidate).await {
            Ok(stored) => stored,
            Err(err) => {
                self.withdraw(&candidate.origin_host, key).await;
                return Err(err);
            }
        };

        if let Some(reservation) = &job.reservation {
            if stored.size_bytes > reservation.bytes() {
                self.discard(&stored.local_path).await;
                self.withdraw(&candidate.origin_host, key).await;
                return Err(ReplicationError::SizeExceedsAdmission {
                    expected: reservation.bytes(),
                    actual: stored.size_bytes,
                });
            }
        }

        let outcome = self
            .store
            .insert(
                NewRecord {
                    key,
                    direction: CacheDirection::LocalCopyOfRemote,
                    holder: self.local_host.clone(),
                    size_bytes: stored.size_bytes,
                    file_url: candidate.file_url.clone(),
                    retention: job.retention.clone(),
                    local_path: Some(stored.local_path.clone()),
                },
                self.clock.now(),
            )
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                self.discard(&stored.local_path).await;
                self.withdraw(&candidate.origin_host, key).await;
                return Err(err.into());
            }
        };

        match outcome {
            InsertOutcome::Created(record) => {
                let mut stats = self.stats.write();
                stats.succeeded += 1;
                stats.bytes_replicated += record.size_bytes;
                Ok(record)
            }
            InsertOutcome::Existing(record) => {
                if record.local_path.as_ref() != Some(&stored.local_path) {
                    self.discard(&stored.local_path).await;
                }
                self.stats.write().already_covered += 1;
                Ok(record)
            }
        }
    }

    async fn confirm_with_origin(
        &self,
        candidate: &Candidate,
        retention: &Retention,
    ) -> Result<(), ReplicationError> {
        let message = self.duplication_request(&candidate.key, candidate.size_bytes, retention)?;
        let host = &candidate.origin_host;

        let response = tokio::time::timeout(
            self.confirmation_timeout,
            self.federation.send(host, message),
        )
        .await
        .map_err(|_| ReplicationError::ConfirmationTimeout {
            host: host.clone(),
            timeout: self.confirmation_timeout,
        })??;

        match response {
            DuplicationResponse::Accepted => Ok(()),
            DuplicationResponse::Denied { reason } => Err(ReplicationError::TrustDenied {
                host: host.clone(),
                reason,
            }),
        }
    }

    async fn transfer(
        &self,
        candidate: &Candidate,
    ) -> Result<StoredArtifact, ReplicationError> {
        let stream = self.fetcher.fetch(&candidate.file_url).await?;
        Ok(self.storage.store(&candidate.key, stream).await?)
    }

    async fn discard(&self, path: &std::path::Path) {
        if let Err(err) = self.storage.delete(path).await {
            tracing::warn!(path = %path.display(), error = %err, "Failed to delete artifact bytes");
        }
    }

    /// Tell the origin to forget our copy. Best effort.
    async fn withdraw(&self, origin: &Host, key: ArtifactKey) {
        let message = FederationMessage::StopDuplicating {
            requesting_host: self.local_host.clone(),
            key,
        };
        match tokio::time::timeout(self.confirmation_timeout, self.federation.send(origin, message))
            .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::debug!(host = %origin, artifact = %key, error = %err, "Stop-duplicating not delivered");
            }
            Err(_) => {
                tracing::debug!(host = %origin, artifact = %key, "Stop-duplicating timed out");
            }
        }
    }

    /// Hand a job to a background task tracked by `tasks`.
    pub fn spawn_replicate(
        self: &Arc<Self>,
        job: ReplicationJob,
        tasks: &mut JoinSet<(ArtifactKey, Result<RedundancyRecord, ReplicationError>)>,
    ) -> AbortHandle {
        let worker = Arc::clone(self);
        let key = job.candidate.key;
        tasks.spawn(async move { (key, worker.replicate(job).await) })
    }

    /// Delete a record and its local bytes. Removing an absent record succeeds.
    ///
    /// Local copies of remote videos also notify the origin.
    ///
    /// # Errors
    /// Never fails today; the `Result` leaves room for stores that can.
    pub async fn remove(&self, id: RecordId) -> Result<RemovalOutcome, ReplicationError> {
        let Some(record) = self.store.remove(id).await else {
            tracing::debug!(record_id = %id, "Redundancy already absent");
            return Ok(RemovalOutcome::AlreadyAbsent);
        };

        if let Some(path) = &record.local_path {
            self.discard(path).await;
        }

        if record.direction == CacheDirection::LocalCopyOfRemote {
            match self.origin_of(&record).await {
                Some(origin) => self.withdraw(&origin, record.key).await,
                None => tracing::debug!(record_id = %id, "Origin unknown, not notified"),
            }
        }

        self.stats.write().removed += 1;
        tracing::info!(
            record_id = %record.id,
            artifact = %record.key,
            direction = ?record.direction,
            strategy = ?record.strategy().map(vrd_core::StrategyName::as_str),
            "Removed redundancy"
        );
        Ok(RemovalOutcome::Removed(record))
    }

    async fn origin_of(&self, record: &RedundancyRecord) -> Option<Host> {
        if let Ok(Some(video)) = self.catalog.video_metadata(record.key.video_id()).await {
            return Some(video.origin_host);
        }
        record
            .file_url
            .host_str()
            .and_then(|host| Host::parse(host).ok())
    }

    /// Push out the expiry of a strategy record and re-announce it to the origin.
    ///
    /// # Errors
    /// Returns `Store` if the record is gone or manual.
    pub async fn refresh(
        &self,
        record: &RedundancyRecord,
        strategy: &RedundancyStrategyConfig,
        origin: &Host,
        now: DateTime<Utc>,
    ) -> Result<RedundancyRecord, ReplicationError> {
        let refreshed = self
            .store
            .refresh_expiry(record.id, strategy.expiry_from(now), now)
            .await?;

        let message =
            self.duplication_request(&refreshed.key, refreshed.size_bytes, &refreshed.retention)?;
        match tokio::time::timeout(self.confirmation_timeout, self.federation.send(origin, message))
            .await
        {
            Ok(Ok(DuplicationResponse::Accepted)) => {}
            Ok(Ok(DuplicationResponse::Denied { reason })) => tracing::info!(
                record_id = %refreshed.id,
                host = %origin,
                reason = reason.as_str(),
                "Origin declined expiry update"
            ),
            Ok(Err(err)) => tracing::debug!(record_id = %refreshed.id, error = %err, "Expiry update not delivered"),
            Err(_) => tracing::debug!(record_id = %refreshed.id, "Expiry update timed out"),
        }

        tracing::debug!(
            record_id = %refreshed.id,
            strategy = %strategy.name,
            expires_on = ?refreshed.expires_on(),
            "Refreshed redundancy expiry"
        );
        Ok(refreshed)
    }
}

#[async_trait]
impl RecordRemover for ReplicationWorker {
    async fn remove_record(&self, id: RecordId) -> Result<RemovalOutcome, RemovalError> {
        self.remove(id).await.map_err(|err| RemovalError {
            id,
            reason: err.to_string(),
        })
    }
}
