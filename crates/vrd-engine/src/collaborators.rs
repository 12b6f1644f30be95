//! Capabilities the engine consumes from the rest of the platform.
//!
//! The engine never talks to the database, the network or the disk directly;
//! everything goes through these traits so the same code runs against real
//! services and in-memory fakes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use parking_lot::RwLock;
use url::Url;
use uuid::Uuid;
use vrd_core::{
    ArtifactKey, ArtifactKind, DuplicationResponse, FederationMessage, FollowFact, Host, VideoId,
};

use crate::error::{CatalogError, FederationError, FetchError, StorageError};

// ─────────────────────────────────────────────────────────────────────────────
// Clock
// ─────────────────────────────────────────────────────────────────────────────

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Follow graph
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only view of the social follow graph.
#[async_trait]
pub trait FollowGraph: Send + Sync {
    /// Whether `follower` follows `following` with an accepted follow.
    async fn is_following(&self, follower: &Host, following: &Host) -> bool;
}

/// Follow graph backed by a fixed set of facts.
#[derive(Debug, Default)]
pub struct StaticFollowGraph {
    facts: RwLock<HashSet<FollowFact>>,
}

impl StaticFollowGraph {
    #[must_use]
    pub fn new(facts: impl IntoIterator<Item = FollowFact>) -> Self {
        Self {
            facts: RwLock::new(facts.into_iter().collect()),
        }
    }

    /// Record a fact, replacing any earlier state for the same pair.
    pub fn upsert(&self, fact: FollowFact) {
        let mut facts = self.facts.write();
        facts.retain(|f| {
            f.follower_host != fact.follower_host || f.following_host != fact.following_host
        });
        facts.insert(fact);
    }

    /// Drop the follow from `follower` to `following`, if any.
    pub fn remove(&self, follower: &Host, following: &Host) {
        self.facts
            .write()
            .retain(|f| &f.follower_host != follower || &f.following_host != following);
    }
}

#[async_trait]
impl FollowGraph for StaticFollowGraph {
    async fn is_following(&self, follower: &Host, following: &Host) -> bool {
        self.facts
            .read()
            .iter()
            .any(|fact| fact.proves(follower, following))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Federation
// ─────────────────────────────────────────────────────────────────────────────

/// Receives inbound federation messages addressed to this instance.
#[async_trait]
pub trait DuplicationHandler: Send + Sync {
    async fn handle(&self, message: FederationMessage) -> DuplicationResponse;
}

/// Delivery of federation messages. Retries and signing live below this seam.
#[async_trait]
pub trait FederationTransport: Send + Sync {
    /// Send `message` to `host` and wait for its answer.
    ///
    /// # Errors
    /// Returns `FederationError` if the message could not be delivered.
    async fn send(
        &self,
        host: &Host,
        message: FederationMessage,
    ) -> Result<DuplicationResponse, FederationError>;

    /// Register the handler for inbound messages. Replaces any earlier one.
    fn on_duplication_request(&self, handler: Arc<dyn DuplicationHandler>);
}

// ─────────────────────────────────────────────────────────────────────────────
// Video catalog
// ─────────────────────────────────────────────────────────────────────────────

/// One replicable artifact of a video as the catalog knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub key: ArtifactKey,
    pub size_bytes: u64,
    /// Locator on the origin.
    pub file_url: Url,
}

/// Video facts the engine needs for selection, trust checks and display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub id: VideoId,
    pub uuid: Uuid,
    pub name: String,
    pub origin_host: Host,
    /// Hosted by this instance.
    pub is_local: bool,
    pub published_at: DateTime<Utc>,
    pub views: u64,
    /// Recent-view score used by trending ordering.
    pub trending_score: u64,
    /// Whether the origin server opted in to being duplicated.
    pub redundancy_allowed: bool,
    pub public: bool,
    pub live: bool,
    pub artifacts: Vec<VideoArtifact>,
}

impl VideoMetadata {
    /// Remote, public, non-live video whose origin allows redundancy.
    #[must_use]
    pub const fn is_redundancy_candidate(&self) -> bool {
        !self.is_local && self.redundancy_allowed && self.public && !self.live
    }

    #[must_use]
    pub fn artifact(&self, key: &ArtifactKey) -> Option<&VideoArtifact> {
        self.artifacts.iter().find(|a| &a.key == key)
    }
}

/// Ordering of [`VideoCatalog::remote_videos`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOrder {
    PublishedDesc,
    ViewsDesc,
    TrendingDesc,
}

/// One page of remote videos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub order: CatalogOrder,
    /// Only videos published at or before this instant.
    pub published_before: DateTime<Utc>,
    pub min_views: u64,
    pub offset: usize,
    pub limit: usize,
}

/// Video and view-count queries.
#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// # Errors
    /// Returns `CatalogError` if the catalog cannot be queried.
    async fn video_metadata(&self, id: VideoId) -> Result<Option<VideoMetadata>, CatalogError>;

    /// Remote videos that are redundancy candidates, ordered by `query.order`.
    ///
    /// # Errors
    /// Returns `CatalogError` if the catalog cannot be queried.
    async fn remote_videos(&self, query: &CatalogQuery)
    -> Result<Vec<VideoMetadata>, CatalogError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Artifact bytes
// ─────────────────────────────────────────────────────────────────────────────

pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Pulls artifact bytes from an origin-fetchable locator.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// # Errors
    /// Returns `FetchError` if the origin cannot serve the artifact.
    async fn fetch(&self, url: &Url) -> Result<ByteStream, FetchError>;
}

/// Where a stored artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

/// Local persistence of artifact bytes.
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Drain `stream` into local storage under a name derived from `key`.
    ///
    /// # Errors
    /// Returns `StorageError` on I/O failure or if the stream breaks.
    async fn store(
        &self,
        key: &ArtifactKey,
        stream: ByteStream,
    ) -> Result<StoredArtifact, StorageError>;

    /// Delete stored bytes. Deleting a missing file succeeds.
    ///
    /// # Errors
    /// Returns `StorageError` on I/O failure.
    async fn delete(&self, path: &Path) -> Result<(), StorageError>;
}

/// Stable file name for an artifact's local copy.
#[must_use]
pub fn artifact_file_name(key: &ArtifactKey) -> String {
    let video = key.video_id().get();
    match (key.kind(), key.resolution()) {
        (ArtifactKind::File, Some(resolution)) => format!("{video}-{resolution}.mp4"),
        (ArtifactKind::File, None) => format!("{video}.mp4"),
        (ArtifactKind::StreamingPlaylist, _) => format!("{video}-hls"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> Host {
        Host::parse(name).unwrap()
    }

    #[tokio::test]
    async fn static_follow_graph_counts_only_accepted() {
        let a = host("a.test");
        let b = host("b.test");
        let graph = StaticFollowGraph::new([FollowFact::pending(a.clone(), b.clone())]);
        assert!(!graph.is_following(&a, &b).await);

        graph.upsert(FollowFact::accepted(a.clone(), b.clone()));
        assert!(graph.is_following(&a, &b).await);
        assert!(!graph.is_following(&b, &a).await);

        graph.remove(&a, &b);
        assert!(!graph.is_following(&a, &b).await);
    }

    #[test]
    fn file_names_are_distinct_per_artifact() {
        let video = VideoId::new(7);
        assert_eq!(artifact_file_name(&ArtifactKey::file(video, 720)), "7-720.mp4");
        assert_eq!(
            artifact_file_name(&ArtifactKey::streaming_playlist(video)),
            "7-hls"
        );
    }
}
