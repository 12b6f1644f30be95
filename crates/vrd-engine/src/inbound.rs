//! Inbound federation messages: remote hosts asking to cache our videos.

use std::sync::Arc;

use async_trait::async_trait;
use vrd_core::{
    ArtifactKey, CacheDirection, DenyReason, DuplicationRequest, DuplicationResponse,
    FederationMessage, Host, NewRecord,
};
use vrd_store::{InsertOutcome, RedundancyStore};

use crate::collaborators::{Clock, DuplicationHandler, VideoCatalog};
use crate::gate::TrustPolicyGate;

/// Applies the trust gate to inbound requests and keeps our
/// `RemoteCopyOfLocal` records in sync with what remote hosts announce.
///
/// Delivery is at-least-once, so every path here is idempotent.
pub struct InboundHandler {
    gate: TrustPolicyGate,
    store: Arc<dyn RedundancyStore>,
    catalog: Arc<dyn VideoCatalog>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InboundHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundHandler")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl InboundHandler {
    #[must_use]
    pub fn new(
        gate: TrustPolicyGate,
        store: Arc<dyn RedundancyStore>,
        catalog: Arc<dyn VideoCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            store,
            catalog,
            clock,
        }
    }

    #[must_use]
    pub const fn gate(&self) -> &TrustPolicyGate {
        &self.gate
    }

    async fn duplicate(&self, request: DuplicationRequest) -> DuplicationResponse {
        let decision = self.gate.evaluate(&request).await;
        if let Some(reason) = decision.deny_reason() {
            return DuplicationResponse::Denied { reason };
        }

        let video = match self.catalog.video_metadata(request.key.video_id()).await {
            Ok(Some(video)) if video.is_local => video,
            Ok(_) => {
                return DuplicationResponse::Denied {
                    reason: DenyReason::UnknownVideo,
                };
            }
            Err(err) => {
                tracing::warn!(error = %err, "Catalog unavailable for inbound request");
                return DuplicationResponse::Denied {
                    reason: DenyReason::UnknownVideo,
                };
            }
        };
        if video.artifact(&request.key).is_none() {
            return DuplicationResponse::Denied {
                reason: DenyReason::UnknownArtifact,
            };
        }

        let now = self.clock.now();
        let retention = request.retention();
        let record = NewRecord {
            key: request.key,
            direction: CacheDirection::RemoteCopyOfLocal,
            holder: request.requesting_host.clone(),
            size_bytes: request.size_bytes,
            file_url: request.file_url,
            retention: retention.clone(),
            local_path: None,
        };

        match self.store.insert(record, now).await {
            Ok(InsertOutcome::Created(record)) => {
                tracing::info!(
                    record_id = %record.id,
                    host = %record.holder,
                    artifact = %record.key,
                    "Remote host now caches our artifact"
                );
                DuplicationResponse::Accepted
            }
            Ok(InsertOutcome::Existing(existing)) => {
                if let Some(expires_on) = retention.expires_on() {
                    if existing.expires_on().is_some() {
                        if let Err(err) =
                            self.store.refresh_expiry(existing.id, expires_on, now).await
                        {
                            tracing::debug!(
                                record_id = %existing.id,
                                error = %err,
                                "Expiry update ignored"
                            );
                        }
                    }
                }
                DuplicationResponse::Accepted
            }
            Err(err) => {
                tracing::warn!(host = %request.requesting_host, error = %err, "Failed to record remote copy");
                DuplicationResponse::Denied {
                    reason: DenyReason::UnknownArtifact,
                }
            }
        }
    }

    async fn stop(&self, requesting_host: &Host, key: ArtifactKey) -> DuplicationResponse {
        if let Some(record) = self
            .store
            .find(&key, CacheDirection::RemoteCopyOfLocal, requesting_host)
            .await
        {
            if self.store.remove(record.id).await.is_some() {
                tracing::info!(
                    record_id = %record.id,
                    host = %requesting_host,
                    artifact = %key,
                    "Remote host stopped caching our artifact"
                );
            }
        }
        DuplicationResponse::Accepted
    }
}

#[async_trait]
impl DuplicationHandler for InboundHandler {
    async fn handle(&self, message: FederationMessage) -> DuplicationResponse {
        match message {
            FederationMessage::Duplicate(request) => self.duplicate(request).await,
            FederationMessage::StopDuplicating {
                requesting_host,
                key,
            } => self.stop(&requesting_host, key).await,
        }
    }
}
