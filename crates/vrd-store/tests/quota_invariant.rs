//! Property tests for per-strategy quota accounting.
//!
//! 1. **Budget invariant**: after every admission, summed live size owned by
//!    the strategy never exceeds its limit
//! 2. **Manual immunity**: manual records survive any admission sequence
//! 3. **Oldest first**: evicted records are always the oldest ones

#![allow(clippy::cast_possible_wrap)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use proptest::prelude::*;
use url::Url;
use vrd_core::{
    ArtifactKey, CacheDirection, Host, NewRecord, RecordId, RedundancyStrategyConfig, Retention,
    SelectorKind, VideoId,
};
use vrd_store::{
    AdmitDecision, MemoryRedundancyStore, QuotaTracker, RecordRemover, RedundancyStore,
    RemovalError, RemovalOutcome,
};

struct StoreRemover(Arc<MemoryRedundancyStore>);

#[async_trait]
impl RecordRemover for StoreRemover {
    async fn remove_record(&self, id: RecordId) -> Result<RemovalOutcome, RemovalError> {
        Ok(self
            .0
            .remove(id)
            .await
            .map_or(RemovalOutcome::AlreadyAbsent, RemovalOutcome::Removed))
    }
}

fn record(video: u64, size: u64, retention: Retention) -> NewRecord {
    NewRecord {
        key: ArtifactKey::streaming_playlist(VideoId::new(video)),
        direction: CacheDirection::LocalCopyOfRemote,
        holder: Host::parse("mirror.test").unwrap(),
        size_bytes: size,
        file_url: Url::parse(&format!("https://origin.test/hls/{video}")).unwrap(),
        retention,
        local_path: None,
    }
}

struct Run {
    limit: u64,
    max_usage: u64,
    manual_survived: bool,
    evictions_oldest_first: bool,
}

async fn admit_all(limit: u64, manual: Vec<u64>, candidates: Vec<u64>) -> Run {
    let store = Arc::new(MemoryRedundancyStore::new());
    let tracker = QuotaTracker::new(store.clone());
    let remover = StoreRemover(store.clone());
    let config = RedundancyStrategyConfig::new(SelectorKind::RecentlyAdded, limit);
    let base = Utc::now();

    let mut manual_ids = Vec::new();
    for (i, size) in manual.into_iter().enumerate() {
        let created = store
            .insert(record(10_000 + i as u64, size, Retention::Manual), base)
            .await
            .unwrap()
            .into_record();
        manual_ids.push(created.id);
    }

    let mut max_usage = 0;
    let mut evictions_oldest_first = true;
    for (i, size) in candidates.into_iter().enumerate() {
        let at = base + TimeDelta::seconds(i as i64);
        let before = store.oldest_for_strategy(&config.name).await;

        let decision = tracker.try_admit(&config, size, &remover).await.unwrap();
        if let AdmitDecision::Admitted {
            reservation,
            evicted,
        } = decision
        {
            let expected: Vec<RecordId> = before.iter().take(evicted.len()).map(|r| r.id).collect();
            let actual: Vec<RecordId> = evicted.iter().map(|r| r.id).collect();
            evictions_oldest_first &= expected == actual;

            let retention = Retention::strategy(config.name.clone(), at + TimeDelta::days(1));
            store
                .insert(record(i as u64, size, retention), at)
                .await
                .unwrap();
            drop(reservation);
        }

        max_usage = max_usage.max(store.strategy_usage(&config.name).await);
    }

    let mut manual_survived = true;
    for id in manual_ids {
        manual_survived &= store.get(id).await.is_some();
    }

    Run {
        limit,
        max_usage,
        manual_survived,
        evictions_oldest_first,
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn usage_never_exceeds_limit(
        limit in 1u64..200,
        manual in prop::collection::vec(1u64..500, 0..4),
        candidates in prop::collection::vec(1u64..250, 1..40),
    ) {
        let run = runtime().block_on(admit_all(limit, manual, candidates));
        prop_assert!(run.max_usage <= run.limit, "usage {} > limit {}", run.max_usage, run.limit);
        prop_assert!(run.manual_survived);
        prop_assert!(run.evictions_oldest_first);
    }
}
