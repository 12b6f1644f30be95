//! Redundancy record store.
//!
//! Holds every redundancy entry in both directions: artifacts this instance
//! caches for remote origins, and artifacts of this instance cached by remote
//! hosts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use vrd_core::{
    ArtifactKey, CacheDirection, Host, NewRecord, RecordId, RedundancyRecord, Retention,
    StrategyName, VideoId,
};

use crate::error::{RemovalError, StoreError};

/// Result of [`RedundancyStore::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new record was written.
    Created(RedundancyRecord),
    /// A live record already covers this artifact; nothing was written.
    Existing(RedundancyRecord),
}

impl InsertOutcome {
    #[must_use]
    pub fn into_record(self) -> RedundancyRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }

    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of removing a record. Removing an absent record is a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed(RedundancyRecord),
    AlreadyAbsent,
}

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub direction: Option<CacheDirection>,
    pub strategy: Option<StrategyName>,
    pub video_id: Option<VideoId>,
}

impl RecordFilter {
    #[must_use]
    pub fn direction(direction: CacheDirection) -> Self {
        Self {
            direction: Some(direction),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyName) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub const fn with_video(mut self, video_id: VideoId) -> Self {
        self.video_id = Some(video_id);
        self
    }

    #[must_use]
    pub fn matches(&self, record: &RedundancyRecord) -> bool {
        self.direction.is_none_or(|d| d == record.direction)
            && self
                .strategy
                .as_ref()
                .is_none_or(|s| record.strategy() == Some(s))
            && self.video_id.is_none_or(|v| v == record.key.video_id())
    }
}

/// Removal path used by quota eviction.
///
/// Implemented by the replication worker so that eviction also deletes local
/// bytes and notifies the origin.
#[async_trait]
pub trait RecordRemover: Send + Sync {
    async fn remove_record(&self, id: RecordId) -> Result<RemovalOutcome, RemovalError>;
}

/// Persistent record of every redundancy entry.
#[async_trait]
pub trait RedundancyStore: Send + Sync {
    /// Insert a record unless one already covers `(key, direction, holder)`.
    ///
    /// # Errors
    /// Returns `InvalidRecord` if the record is malformed.
    async fn insert(
        &self,
        record: NewRecord,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError>;

    async fn get(&self, id: RecordId) -> Option<RedundancyRecord>;

    /// Find the live record for an artifact in one direction.
    async fn find(
        &self,
        key: &ArtifactKey,
        direction: CacheDirection,
        holder: &Host,
    ) -> Option<RedundancyRecord>;

    /// Atomically delete a record if it exists, returning it.
    async fn remove(&self, id: RecordId) -> Option<RedundancyRecord>;

    /// Push out the expiry of a strategy-owned record.
    ///
    /// # Errors
    /// Returns `NotFound` if the record is gone, `ManualRecord` if it has no expiry.
    async fn refresh_expiry(
        &self,
        id: RecordId,
        expires_on: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RedundancyRecord, StoreError>;

    /// Summed size of local copies owned by `strategy`.
    async fn strategy_usage(&self, strategy: &StrategyName) -> u64;

    /// Local copies owned by `strategy`, oldest `created_at` first.
    async fn oldest_for_strategy(&self, strategy: &StrategyName) -> Vec<RedundancyRecord>;

    /// Records with an expiry at or before `now`. Manual records never appear.
    async fn expired(&self, now: DateTime<Utc>) -> Vec<RedundancyRecord>;

    /// Records matching `filter`, ordered by id.
    async fn list(&self, filter: &RecordFilter) -> Vec<RedundancyRecord>;

    /// Every record of one video in one direction.
    async fn records_for_video(
        &self,
        video_id: VideoId,
        direction: CacheDirection,
    ) -> Vec<RedundancyRecord> {
        self.list(&RecordFilter::direction(direction).with_video(video_id))
            .await
    }

    async fn all(&self) -> Vec<RedundancyRecord> {
        self.list(&RecordFilter::default()).await
    }

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

type UniqueKey = (ArtifactKey, CacheDirection, Host);

fn unique_key(record: &RedundancyRecord) -> UniqueKey {
    (record.key, record.direction, record.holder.clone())
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<RecordId, RedundancyRecord>,
    by_key: HashMap<UniqueKey, RecordId>,
    /// Local copies per strategy, ordered by `(created_at, id)`.
    by_strategy: HashMap<StrategyName, BTreeSet<(DateTime<Utc>, RecordId)>>,
    usage: HashMap<StrategyName, u64>,
}

impl Inner {
    fn index(&mut self, record: RedundancyRecord) {
        self.by_key.insert(unique_key(&record), record.id);
        if record.direction == CacheDirection::LocalCopyOfRemote {
            if let Some(name) = record.strategy() {
                self.by_strategy
                    .entry(name.clone())
                    .or_default()
                    .insert((record.created_at, record.id));
                *self.usage.entry(name.clone()).or_insert(0) += record.size_bytes;
            }
        }
        self.records.insert(record.id, record);
    }

    fn unindex(&mut self, id: RecordId) -> Option<RedundancyRecord> {
        let record = self.records.remove(&id)?;
        self.by_key.remove(&unique_key(&record));
        if record.direction == CacheDirection::LocalCopyOfRemote {
            if let Some(name) = record.strategy() {
                if let Some(set) = self.by_strategy.get_mut(name) {
                    set.remove(&(record.created_at, record.id));
                }
                if let Some(used) = self.usage.get_mut(name) {
                    *used = used.saturating_sub(record.size_bytes);
                }
            }
        }
        Some(record)
    }
}

/// Serialized form of a [`MemoryRedundancyStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub next_id: u64,
    pub records: Vec<RedundancyRecord>,
}

/// In-memory redundancy store with optional JSON snapshots.
///
/// Suitable for tests and single-node deployments.
#[derive(Debug)]
pub struct MemoryRedundancyStore {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

impl Default for MemoryRedundancyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRedundancyStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Rebuild a store (and all indexes) from a snapshot.
    ///
    /// # Errors
    /// Returns `Snapshot` if two records claim the same id or artifact.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let mut inner = Inner::default();
        let mut max_id = 0;
        for record in snapshot.records {
            if inner.records.contains_key(&record.id) {
                return Err(StoreError::Snapshot(format!("duplicate id {}", record.id)));
            }
            if inner.by_key.contains_key(&unique_key(&record)) {
                return Err(StoreError::Snapshot(format!(
                    "duplicate artifact {} held by {}",
                    record.key, record.holder
                )));
            }
            max_id = max_id.max(record.id.get());
            inner.index(record);
        }
        Ok(Self {
            inner: RwLock::new(inner),
            next_id: AtomicU64::new(snapshot.next_id.max(max_id + 1)),
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read();
        StoreSnapshot {
            next_id: self.next_id.load(Ordering::SeqCst),
            records: inner.records.values().cloned().collect(),
        }
    }

    /// Write a JSON snapshot atomically (temp file + rename).
    ///
    /// # Errors
    /// Returns `Io` or `Snapshot` on failure.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let bytes = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|e| StoreError::Io(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))?;
        tracing::debug!(path = %path.display(), "Saved redundancy store snapshot");
        Ok(())
    }

    /// Load a snapshot written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// # Errors
    /// Returns `Io` if the file cannot be read, `Snapshot` if it is malformed.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;
        let snapshot: StoreSnapshot =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        Self::from_snapshot(snapshot)
    }

    fn validate(record: &NewRecord) -> Result<(), StoreError> {
        if record.direction == CacheDirection::RemoteCopyOfLocal && record.local_path.is_some() {
            return Err(StoreError::InvalidRecord {
                reason: "remote copies of local videos have no local bytes".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RedundancyStore for MemoryRedundancyStore {
    async fn insert(
        &self,
        record: NewRecord,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, StoreError> {
        Self::validate(&record)?;

        let mut inner = self.inner.write();
        let key = (record.key, record.direction, record.holder.clone());
        if let Some(existing) = inner.by_key.get(&key).and_then(|id| inner.records.get(id)) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        let id = RecordId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let created = RedundancyRecord::from_new(id, record, now);
        inner.index(created.clone());
        Ok(InsertOutcome::Created(created))
    }

    async fn get(&self, id: RecordId) -> Option<RedundancyRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    async fn find(
        &self,
        key: &ArtifactKey,
        direction: CacheDirection,
        holder: &Host,
    ) -> Option<RedundancyRecord> {
        let inner = self.inner.read();
        inner
            .by_key
            .get(&(*key, direction, holder.clone()))
            .and_then(|id| inner.records.get(id))
            .cloned()
    }

    async fn remove(&self, id: RecordId) -> Option<RedundancyRecord> {
        self.inner.write().unindex(id)
    }

    async fn refresh_expiry(
        &self,
        id: RecordId,
        expires_on: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RedundancyRecord, StoreError> {
        let mut inner = self.inner.write();
        let record = inner.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        match &mut record.retention {
            Retention::Manual => Err(StoreError::ManualRecord(id)),
            Retention::Strategy {
                expires_on: current,
                ..
            } => {
                *current = expires_on;
                record.updated_at = now;
                Ok(record.clone())
            }
        }
    }

    async fn strategy_usage(&self, strategy: &StrategyName) -> u64 {
        self.inner
            .read()
            .usage
            .get(strategy)
            .copied()
            .unwrap_or(0)
    }

    async fn oldest_for_strategy(&self, strategy: &StrategyName) -> Vec<RedundancyRecord> {
        let inner = self.inner.read();
        inner
            .by_strategy
            .get(strategy)
            .map(|set| {
                set.iter()
                    .filter_map(|(_, id)| inner.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn expired(&self, now: DateTime<Utc>) -> Vec<RedundancyRecord> {
        self.inner
            .read()
            .records
            .values()
            .filter(|record| record.is_expired(now))
            .cloned()
            .collect()
    }

    async fn list(&self, filter: &RecordFilter) -> Vec<RedundancyRecord> {
        self.inner
            .read()
            .records
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect()
    }

    async fn len(&self) -> usize {
        self.inner.read().records.len()
    }
}
