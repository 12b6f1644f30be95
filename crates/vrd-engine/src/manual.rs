//! Operator-triggered duplication and removal.

use std::sync::Arc;

use vrd_core::{CacheDirection, Host, RecordId, RedundancyRecord, VideoId};
use vrd_store::{RedundancyStore, RemovalOutcome};

use crate::collaborators::VideoCatalog;
use crate::error::{ManualError, ReplicationError};
use crate::selector::Candidate;
use crate::worker::{ReplicationJob, ReplicationWorker};

/// Manual redundancy operations.
///
/// Manual records carry no strategy, never expire and never count against a
/// strategy budget.
pub struct ManualRedundancyApi {
    local_host: Host,
    catalog: Arc<dyn VideoCatalog>,
    store: Arc<dyn RedundancyStore>,
    worker: Arc<ReplicationWorker>,
}

impl std::fmt::Debug for ManualRedundancyApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualRedundancyApi")
            .field("local_host", &self.local_host)
            .finish_non_exhaustive()
    }
}

impl ManualRedundancyApi {
    #[must_use]
    pub fn new(
        local_host: Host,
        catalog: Arc<dyn VideoCatalog>,
        store: Arc<dyn RedundancyStore>,
        worker: Arc<ReplicationWorker>,
    ) -> Self {
        Self {
            local_host,
            catalog,
            store,
            worker,
        }
    }

    /// Duplicate every not-yet-covered artifact of a remote video.
    ///
    /// Artifacts are replicated in catalog order and the first failure stops
    /// the operation; records created before it are kept.
    ///
    /// # Errors
    /// `VideoNotFound`, `LocalVideo`, `AlreadyDuplicated`, `TrustDenied` when
    /// the origin refuses, or `Replication` for transfer failures.
    pub async fn add(&self, video_id: VideoId) -> Result<Vec<RedundancyRecord>, ManualError> {
        let video = self
            .catalog
            .video_metadata(video_id)
            .await?
            .ok_or(ManualError::VideoNotFound(video_id))?;
        if video.is_local {
            return Err(ManualError::LocalVideo(video_id));
        }

        let mut pending = Vec::new();
        for artifact in &video.artifacts {
            let covered = self
                .store
                .find(
                    &artifact.key,
                    CacheDirection::LocalCopyOfRemote,
                    &self.local_host,
                )
                .await
                .is_some();
            if !covered {
                pending.push(Candidate {
                    key: artifact.key,
                    size_bytes: artifact.size_bytes,
                    file_url: artifact.file_url.clone(),
                    origin_host: video.origin_host.clone(),
                    estimated_benefit: 0,
                });
            }
        }
        if pending.is_empty() {
            return Err(ManualError::AlreadyDuplicated(video_id));
        }

        let mut created = Vec::with_capacity(pending.len());
        for candidate in pending {
            match self.worker.replicate(ReplicationJob::manual(candidate)).await {
                Ok(record) => created.push(record),
                Err(ReplicationError::TrustDenied { reason, .. }) => {
                    return Err(ManualError::TrustDenied { video_id, reason });
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::info!(
            video_id = %video_id,
            artifacts = created.len(),
            "Added manual redundancy"
        );
        Ok(created)
    }

    /// Remove one record, manual or strategy-owned. Absent records succeed.
    ///
    /// # Errors
    /// Returns `Replication` if the removal path fails.
    pub async fn remove(&self, id: RecordId) -> Result<RemovalOutcome, ManualError> {
        Ok(self.worker.remove(id).await?)
    }

    /// Remove every local copy of a video's artifacts.
    ///
    /// # Errors
    /// Returns `Replication` if the removal path fails.
    pub async fn remove_video(&self, video_id: VideoId) -> Result<Vec<RedundancyRecord>, ManualError> {
        let records = self
            .store
            .records_for_video(video_id, CacheDirection::LocalCopyOfRemote)
            .await;

        let mut removed = Vec::with_capacity(records.len());
        for record in records {
            if let RemovalOutcome::Removed(record) = self.worker.remove(record.id).await? {
                removed.push(record);
            }
        }
        tracing::info!(video_id = %video_id, removed = removed.len(), "Removed video redundancy");
        Ok(removed)
    }
}
