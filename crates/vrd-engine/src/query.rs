//! Redundancy listings and per-strategy statistics.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;
use uuid::Uuid;
use vrd_core::{
    ArtifactKind, CacheDirection, EngineConfig, Host, RecordId, RedundancyRecord, StrategyName,
    VideoId,
};
use vrd_store::{RecordFilter, RedundancyStore};

use crate::collaborators::{VideoCatalog, VideoMetadata};
use crate::error::QueryError;

/// Largest page a listing returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Which vantage point to list from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListTarget {
    /// Remote hosts caching videos hosted here.
    MyVideos,
    /// This instance caching remote videos.
    RemoteVideos,
}

impl ListTarget {
    #[must_use]
    pub const fn direction(self) -> CacheDirection {
        match self {
            Self::MyVideos => CacheDirection::RemoteCopyOfLocal,
            Self::RemoteVideos => CacheDirection::LocalCopyOfRemote,
        }
    }
}

impl FromStr for ListTarget {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "my-videos" => Ok(Self::MyVideos),
            "remote-videos" => Ok(Self::RemoteVideos),
            other => Err(QueryError::InvalidTarget(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    CreatedAt,
}

/// Sort order; a leading `-` in the string form means descending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub key: SortKey,
    pub descending: bool,
}

impl Default for Sort {
    fn default() -> Self {
        Self {
            key: SortKey::CreatedAt,
            descending: true,
        }
    }
}

impl FromStr for Sort {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, field) = s.strip_prefix('-').map_or((false, s), |rest| (true, rest));
        let key = match field {
            "name" => SortKey::Name,
            "createdAt" => SortKey::CreatedAt,
            _ => return Err(QueryError::InvalidSort(s.to_string())),
        };
        Ok(Self { key, descending })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub target: ListTarget,
    pub sort: Sort,
    pub offset: usize,
    pub limit: usize,
    /// Only records owned by this strategy.
    pub strategy: Option<StrategyName>,
}

impl ListQuery {
    #[must_use]
    pub fn new(target: ListTarget) -> Self {
        Self {
            target,
            sort: Sort::default(),
            offset: 0,
            limit: 15,
            strategy: None,
        }
    }

    #[must_use]
    pub const fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub const fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyName) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// A record joined with its video for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedundancyView {
    pub id: RecordId,
    pub video_id: VideoId,
    pub video_uuid: Option<Uuid>,
    pub video_name: Option<String>,
    pub artifact_kind: ArtifactKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<u32>,
    pub strategy: Option<StrategyName>,
    /// Host holding the copy.
    pub holder: Host,
    pub file_url: Url,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_on: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

impl RedundancyView {
    fn from_record(record: RedundancyRecord, video: Option<&VideoMetadata>) -> Self {
        Self {
            id: record.id,
            video_id: record.key.video_id(),
            video_uuid: video.map(|v| v.uuid),
            video_name: video.map(|v| v.name.clone()),
            artifact_kind: record.key.kind(),
            resolution: record.key.resolution(),
            strategy: record.strategy().cloned(),
            holder: record.holder,
            file_url: record.file_url,
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_on: record.retention.expires_on(),
            size_bytes: record.size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub total: usize,
    pub data: Vec<T>,
}

/// Usage of one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyStats {
    pub strategy: StrategyName,
    pub total_size: u64,
    pub total_used: u64,
    pub total_videos: usize,
    pub total_video_files: usize,
}

pub struct QueryApi {
    store: Arc<dyn RedundancyStore>,
    catalog: Arc<dyn VideoCatalog>,
    config: Arc<EngineConfig>,
}

impl std::fmt::Debug for QueryApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryApi").finish_non_exhaustive()
    }
}

impl QueryApi {
    #[must_use]
    pub fn new(
        store: Arc<dyn RedundancyStore>,
        catalog: Arc<dyn VideoCatalog>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    /// One page of records from the requested vantage point.
    ///
    /// # Errors
    /// `InvalidLimit` for an empty or oversized page, `Catalog` if the video
    /// join fails.
    pub async fn list(&self, query: &ListQuery) -> Result<Page<RedundancyView>, QueryError> {
        if query.limit == 0 || query.limit > MAX_PAGE_SIZE {
            return Err(QueryError::InvalidLimit {
                limit: query.limit,
                max: MAX_PAGE_SIZE,
            });
        }

        let mut filter = RecordFilter::direction(query.target.direction());
        filter.strategy = query.strategy.clone();
        let mut records = self.store.list(&filter).await;
        let total = records.len();

        let data = match query.sort.key {
            SortKey::CreatedAt => {
                records.sort_by(|a, b| {
                    directed(
                        a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)),
                        query.sort,
                    )
                });
                let page: Vec<_> = records
                    .into_iter()
                    .skip(query.offset)
                    .take(query.limit)
                    .collect();
                self.join(page).await?
            }
            SortKey::Name => {
                // Names live in the catalog, so every record is joined before paging.
                let mut views = self.join(records).await?;
                views.sort_by(|a, b| {
                    directed(
                        a.video_name
                            .as_deref()
                            .unwrap_or_default()
                            .cmp(b.video_name.as_deref().unwrap_or_default())
                            .then_with(|| a.id.cmp(&b.id)),
                        query.sort,
                    )
                });
                views
                    .into_iter()
                    .skip(query.offset)
                    .take(query.limit)
                    .collect()
            }
        };
        Ok(Page { total, data })
    }

    /// Attach video metadata, one catalog lookup per distinct video.
    async fn join(&self, records: Vec<RedundancyRecord>) -> Result<Vec<RedundancyView>, QueryError> {
        let mut videos: HashMap<VideoId, Option<VideoMetadata>> = HashMap::new();
        for record in &records {
            let id = record.key.video_id();
            if !videos.contains_key(&id) {
                videos.insert(id, self.catalog.video_metadata(id).await?);
            }
        }

        Ok(records
            .into_iter()
            .map(|record| {
                let video = videos.get(&record.key.video_id()).and_then(Option::as_ref);
                RedundancyView::from_record(record, video)
            })
            .collect())
    }

    /// Usage of a configured strategy.
    ///
    /// # Errors
    /// Returns `UnknownStrategy` if `strategy` is not configured.
    pub async fn stats(&self, strategy: &StrategyName) -> Result<StrategyStats, QueryError> {
        let config = self
            .config
            .strategy(strategy)
            .ok_or_else(|| QueryError::UnknownStrategy(strategy.clone()))?;

        let records = self.store.oldest_for_strategy(strategy).await;
        let videos: HashSet<VideoId> = records.iter().map(|r| r.key.video_id()).collect();
        Ok(StrategyStats {
            strategy: strategy.clone(),
            total_size: config.size_limit_bytes,
            total_used: records.iter().map(|r| r.size_bytes).sum(),
            total_videos: videos.len(),
            total_video_files: records.len(),
        })
    }
}

const fn directed(ordering: Ordering, sort: Sort) -> Ordering {
    if sort.descending {
        ordering.reverse()
    } else {
        ordering
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_targets() {
        assert_eq!("my-videos".parse::<ListTarget>().unwrap(), ListTarget::MyVideos);
        assert_eq!(
            "remote-videos".parse::<ListTarget>().unwrap(),
            ListTarget::RemoteVideos
        );
        assert!(matches!(
            "everything".parse::<ListTarget>(),
            Err(QueryError::InvalidTarget(_))
        ));
    }

    #[test]
    fn parses_sort_strings() {
        assert_eq!(
            "name".parse::<Sort>().unwrap(),
            Sort {
                key: SortKey::Name,
                descending: false
            }
        );
        assert_eq!(
            "-createdAt".parse::<Sort>().unwrap(),
            Sort {
                key: SortKey::CreatedAt,
                descending: true
            }
        );
        let err = "-views".parse::<Sort>().unwrap_err();
        assert_eq!(err.code(), "query.invalid_sort");
    }

    #[test]
    fn targets_map_to_directions() {
        assert_eq!(
            ListTarget::MyVideos.direction(),
            CacheDirection::RemoteCopyOfLocal
        );
        assert_eq!(
            ListTarget::RemoteVideos.direction(),
            CacheDirection::LocalCopyOfRemote
        );
    }
}
