//! Test fixtures: hosts, videos and configurations.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use url::Url;
use uuid::Uuid;
use vrd_core::{
    AcceptancePolicy, ArtifactKey, EngineConfig, Host, RedundancyStrategyConfig, SelectorKind,
    VideoId,
};
use vrd_engine::{VideoArtifact, VideoMetadata};

// ─────────────────────────────────────────────────────────────────────────────
// Time and identity
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed starting instant of every test clock.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid fixture date")
}

#[must_use]
pub fn host(name: &str) -> Host {
    Host::parse(name).expect("valid fixture host")
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Engine config accepting from anybody, with short timeouts and no strategies.
#[must_use]
pub fn engine_config(local_host: &str) -> EngineConfig {
    EngineConfig::new(host(local_host))
        .with_accept_from(AcceptancePolicy::Anybody)
        .with_confirmation_timeout(Duration::from_millis(200))
}

#[must_use]
pub fn recently_added(size_limit_bytes: u64) -> RedundancyStrategyConfig {
    RedundancyStrategyConfig::new(SelectorKind::RecentlyAdded, size_limit_bytes)
}

#[must_use]
pub fn most_views(size_limit_bytes: u64) -> RedundancyStrategyConfig {
    RedundancyStrategyConfig::new(SelectorKind::MostViews, size_limit_bytes)
}

#[must_use]
pub fn trending(size_limit_bytes: u64) -> RedundancyStrategyConfig {
    RedundancyStrategyConfig::new(SelectorKind::Trending, size_limit_bytes)
}

// ─────────────────────────────────────────────────────────────────────────────
// Videos
// ─────────────────────────────────────────────────────────────────────────────

/// Start building video `id` hosted by `origin`.
#[must_use]
pub fn video(id: u64, origin: &str) -> VideoBuilder {
    VideoBuilder::new(id, host(origin))
}

/// Builder for [`VideoMetadata`] as seen from a given instance.
///
/// Defaults: public, not live, redundancy allowed, published a week before
/// [`epoch`], no views and no artifacts.
#[derive(Debug, Clone)]
#[must_use]
pub struct VideoBuilder {
    id: VideoId,
    origin: Host,
    name: String,
    published_at: DateTime<Utc>,
    views: u64,
    trending_score: u64,
    redundancy_allowed: bool,
    public: bool,
    live: bool,
    artifacts: Vec<(ArtifactKey, u64)>,
}

impl VideoBuilder {
    pub fn new(id: u64, origin: Host) -> Self {
        Self {
            id: VideoId::new(id),
            origin,
            name: format!("video {id}"),
            published_at: epoch() - TimeDelta::days(7),
            views: 0,
            trending_score: 0,
            redundancy_allowed: true,
            public: true,
            live: false,
            artifacts: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub const fn published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = at;
        self
    }

    pub const fn views(mut self, views: u64) -> Self {
        self.views = views;
        self
    }

    pub const fn trending_score(mut self, score: u64) -> Self {
        self.trending_score = score;
        self
    }

    pub const fn redundancy_disabled(mut self) -> Self {
        self.redundancy_allowed = false;
        self
    }

    pub const fn private(mut self) -> Self {
        self.public = false;
        self
    }

    pub const fn live(mut self) -> Self {
        self.live = true;
        self
    }

    pub fn with_file(mut self, resolution: u32, size_bytes: u64) -> Self {
        self.artifacts
            .push((ArtifactKey::file(self.id, resolution), size_bytes));
        self
    }

    pub fn with_playlist(mut self, size_bytes: u64) -> Self {
        self.artifacts
            .push((ArtifactKey::streaming_playlist(self.id), size_bytes));
        self
    }

    #[must_use]
    pub const fn id(&self) -> VideoId {
        self.id
    }

    #[must_use]
    pub const fn origin(&self) -> &Host {
        &self.origin
    }

    #[must_use]
    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.artifacts.iter().map(|(key, _)| *key).collect()
    }

    /// Locator of an artifact on the origin.
    #[must_use]
    pub fn artifact_url(&self, key: &ArtifactKey) -> Url {
        let file = vrd_engine::artifact_file_name(key);
        Url::parse(&format!("https://{}/static/webseed/{file}", self.origin))
            .expect("valid fixture url")
    }

    /// Each artifact with its origin locator and size.
    #[must_use]
    pub fn artifacts(&self) -> Vec<VideoArtifact> {
        self.artifacts
            .iter()
            .map(|(key, size_bytes)| VideoArtifact {
                key: *key,
                size_bytes: *size_bytes,
                file_url: self.artifact_url(key),
            })
            .collect()
    }

    /// Metadata as the catalog of `viewer` reports it.
    #[must_use]
    pub fn build_for(&self, viewer: &Host) -> VideoMetadata {
        VideoMetadata {
            id: self.id,
            uuid: Uuid::from_u128(u128::from(self.id.get())),
            name: self.name.clone(),
            origin_host: self.origin.clone(),
            is_local: viewer == &self.origin,
            published_at: self.published_at,
            views: self.views,
            trending_score: self.trending_score,
            redundancy_allowed: self.redundancy_allowed,
            public: self.public,
            live: self.live,
            artifacts: self.artifacts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locality_depends_on_viewer() {
        let video = video(7, "origin.example").with_file(720, 100).with_playlist(50);

        let at_origin = video.build_for(&host("origin.example"));
        let elsewhere = video.build_for(&host("cache.example"));

        assert!(at_origin.is_local);
        assert!(!elsewhere.is_local);
        assert!(elsewhere.is_redundancy_candidate());
        assert_eq!(elsewhere.artifacts.len(), 2);
        assert_eq!(
            elsewhere.artifacts[0].file_url.as_str(),
            "https://origin.example/static/webseed/7-720.mp4"
        );
    }
}
