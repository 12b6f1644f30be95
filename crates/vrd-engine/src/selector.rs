//! Candidate selection per strategy.
//!
//! A selector turns a strategy into a lazy, finite sequence of artifacts worth
//! duplicating. Each call to [`CandidateSelector::select`] starts a fresh
//! pass over the catalog, so view counts and new uploads are always current.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use url::Url;
use vrd_core::{
    ArtifactKey, CacheDirection, Host, RedundancyStrategyConfig, SelectorKind, VideoId,
};
use vrd_store::RedundancyStore;

use crate::collaborators::{CatalogOrder, CatalogQuery, VideoCatalog, VideoMetadata};
use crate::error::{CatalogError, EngineError};

/// One artifact admitted for consideration by a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: ArtifactKey,
    pub size_bytes: u64,
    pub file_url: Url,
    pub origin_host: Host,
    /// Ordering score of the owning video under this selector.
    pub estimated_benefit: u64,
}

impl Candidate {
    #[must_use]
    pub const fn video_id(&self) -> VideoId {
        self.key.video_id()
    }
}

/// Everything a selection pass reads.
#[derive(Clone)]
pub struct SelectionContext {
    pub catalog: Arc<dyn VideoCatalog>,
    pub store: Arc<dyn RedundancyStore>,
    pub local_host: Host,
    pub now: DateTime<Utc>,
    pub batch_size: usize,
}

pub type CandidateStream = BoxStream<'static, Result<Candidate, CatalogError>>;

/// Orders and filters remote videos for one kind of strategy.
pub trait CandidateSelector: Send + Sync {
    fn kind(&self) -> SelectorKind;

    /// Catalog order this selector walks.
    fn order(&self) -> CatalogOrder;

    /// Score reported as [`Candidate::estimated_benefit`].
    fn benefit(&self, video: &VideoMetadata) -> u64;

    /// Whether `video` is eligible under `strategy` at `now`.
    fn still_qualifies(
        &self,
        video: &VideoMetadata,
        strategy: &RedundancyStrategyConfig,
        now: DateTime<Utc>,
    ) -> bool {
        video.is_redundancy_candidate()
            && video.published_at <= strategy.published_before(now)
            && video.views >= strategy.min_views
    }

    /// Uncovered artifacts of eligible videos, in selector order.
    ///
    /// Artifacts that already have a local copy (under any strategy or
    /// manual) are skipped, so a fully covered video yields nothing.
    fn select(&self, strategy: &RedundancyStrategyConfig, ctx: SelectionContext) -> CandidateStream
    where
        Self: Sized + Clone + 'static,
    {
        select_with(Arc::new(self.clone()), strategy.clone(), ctx)
    }
}

struct Pass {
    selector: Arc<dyn CandidateSelector>,
    strategy: RedundancyStrategyConfig,
    ctx: SelectionContext,
    offset: usize,
    buffered: VecDeque<Candidate>,
    exhausted: bool,
}

impl Pass {
    async fn fill(&mut self) -> Result<(), CatalogError> {
        while self.buffered.is_empty() && !self.exhausted {
            let query = CatalogQuery {
                order: self.selector.order(),
                published_before: self.strategy.published_before(self.ctx.now),
                min_views: self.strategy.min_views,
                offset: self.offset,
                limit: self.ctx.batch_size,
            };
            let page = self.ctx.catalog.remote_videos(&query).await?;
            self.offset += page.len();
            self.exhausted = page.len() < self.ctx.batch_size;

            for video in page {
                if !self
                    .selector
                    .still_qualifies(&video, &self.strategy, self.ctx.now)
                {
                    continue;
                }
                let benefit = self.selector.benefit(&video);
                for artifact in &video.artifacts {
                    let covered = self
                        .ctx
                        .store
                        .find(
                            &artifact.key,
                            CacheDirection::LocalCopyOfRemote,
                            &self.ctx.local_host,
                        )
                        .await
                        .is_some();
                    if !covered {
                        self.buffered.push_back(Candidate {
                            key: artifact.key,
                            size_bytes: artifact.size_bytes,
                            file_url: artifact.file_url.clone(),
                            origin_host: video.origin_host.clone(),
                            estimated_benefit: benefit,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Run a selection pass for any selector behind an `Arc`.
///
/// A catalog error ends the stream after being yielded once.
#[must_use]
pub fn select_with(
    selector: Arc<dyn CandidateSelector>,
    strategy: RedundancyStrategyConfig,
    ctx: SelectionContext,
) -> CandidateStream {
    let pass = Pass {
        selector,
        strategy,
        ctx,
        offset: 0,
        buffered: VecDeque::new(),
        exhausted: false,
    };
    stream::unfold(Some(pass), |state| async move {
        let mut pass = state?;
        if let Err(err) = pass.fill().await {
            return Some((Err(err), None));
        }
        let next = pass.buffered.pop_front()?;
        Some((Ok(next), Some(pass)))
    })
    .boxed()
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in selectors
// ─────────────────────────────────────────────────────────────────────────────

/// Most recently published first.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecentlyAddedSelector;

impl CandidateSelector for RecentlyAddedSelector {
    fn kind(&self) -> SelectorKind {
        SelectorKind::RecentlyAdded
    }

    fn order(&self) -> CatalogOrder {
        CatalogOrder::PublishedDesc
    }

    fn benefit(&self, video: &VideoMetadata) -> u64 {
        u64::try_from(video.published_at.timestamp()).unwrap_or(0)
    }
}

/// Highest view count first.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostViewsSelector;

impl CandidateSelector for MostViewsSelector {
    fn kind(&self) -> SelectorKind {
        SelectorKind::MostViews
    }

    fn order(&self) -> CatalogOrder {
        CatalogOrder::ViewsDesc
    }

    fn benefit(&self, video: &VideoMetadata) -> u64 {
        video.views
    }
}

/// Highest recent-view score first.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendingSelector;

impl CandidateSelector for TrendingSelector {
    fn kind(&self) -> SelectorKind {
        SelectorKind::Trending
    }

    fn order(&self) -> CatalogOrder {
        CatalogOrder::TrendingDesc
    }

    fn benefit(&self, video: &VideoMetadata) -> u64 {
        video.trending_score
    }
}

/// Selector lookup by kind.
#[derive(Clone, Default)]
pub struct SelectorRegistry {
    selectors: HashMap<SelectorKind, Arc<dyn CandidateSelector>>,
}

impl std::fmt::Debug for SelectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorRegistry")
            .field("kinds", &self.selectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SelectorRegistry {
    /// Registry with every built-in selector.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
            .with(Arc::new(RecentlyAddedSelector))
            .with(Arc::new(MostViewsSelector))
            .with(Arc::new(TrendingSelector))
    }

    /// Add or replace the selector for its kind.
    #[must_use]
    pub fn with(mut self, selector: Arc<dyn CandidateSelector>) -> Self {
        self.selectors.insert(selector.kind(), selector);
        self
    }

    /// # Errors
    /// Returns `MissingSelector` if nothing is registered for `kind`.
    pub fn get(&self, kind: SelectorKind) -> Result<Arc<dyn CandidateSelector>, EngineError> {
        self.selectors
            .get(&kind)
            .cloned()
            .ok_or(EngineError::MissingSelector(kind))
    }
}
