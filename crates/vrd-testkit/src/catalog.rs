use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use vrd_core::VideoId;
use vrd_engine::{CatalogError, CatalogOrder, CatalogQuery, VideoCatalog, VideoMetadata};

/// Video catalog held in memory.
///
/// `remote_videos` honours every field of the query the way a database
/// backed catalog would.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    videos: RwLock<BTreeMap<VideoId, VideoMetadata>>,
    unavailable: AtomicBool,
    latency: RwLock<Option<Duration>>,
    page_requests: AtomicUsize,
    lookups: AtomicUsize,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a video.
    pub fn insert(&self, video: VideoMetadata) {
        self.videos.write().insert(video.id, video);
    }

    pub fn remove(&self, id: VideoId) {
        self.videos.write().remove(&id);
    }

    #[must_use]
    pub fn get(&self, id: VideoId) -> Option<VideoMetadata> {
        self.videos.read().get(&id).cloned()
    }

    pub fn set_views(&self, id: VideoId, views: u64) {
        if let Some(video) = self.videos.write().get_mut(&id) {
            video.views = views;
        }
    }

    pub fn set_trending_score(&self, id: VideoId, score: u64) {
        if let Some(video) = self.videos.write().get_mut(&id) {
            video.trending_score = score;
        }
    }

    /// Make every query fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Hold every `remote_videos` call for `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Number of `remote_videos` pages served.
    #[must_use]
    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    /// Number of `video_metadata` lookups served.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), CatalogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CatalogError::Unavailable("memory catalog switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl VideoCatalog for MemoryCatalog {
    async fn video_metadata(&self, id: VideoId) -> Result<Option<VideoMetadata>, CatalogError> {
        self.check_available()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(id))
    }

    async fn remote_videos(
        &self,
        query: &CatalogQuery,
    ) -> Result<Vec<VideoMetadata>, CatalogError> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check_available()?;
        self.page_requests.fetch_add(1, Ordering::SeqCst);

        let mut matching: Vec<VideoMetadata> = self
            .videos
            .read()
            .values()
            .filter(|v| v.is_redundancy_candidate())
            .filter(|v| v.published_at <= query.published_before)
            .filter(|v| v.views >= query.min_views)
            .cloned()
            .collect();

        match query.order {
            CatalogOrder::PublishedDesc => {
                matching.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(a.id.cmp(&b.id)));
            }
            CatalogOrder::ViewsDesc => {
                matching.sort_by(|a, b| b.views.cmp(&a.views).then(a.id.cmp(&b.id)));
            }
            CatalogOrder::TrendingDesc => {
                matching.sort_by(|a, b| {
                    b.trending_score
                        .cmp(&a.trending_score)
                        .then(a.id.cmp(&b.id))
                });
            }
        }

        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}
