//! Strategy ticks end to end: selection, admission, eviction and replication.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use vrd_core::{
    ArtifactKey, CacheDirection, RedundancyStrategyConfig, StrategyName, VideoId,
};
use vrd_engine::{SchedulerState, TickOutcome};
use vrd_store::{AdmitDecision, RecordFilter, RedundancyStore, RemovalOutcome};
use vrd_testkit::{LoopbackNetwork, ManualClock, TestInstance, fixtures, init_test_tracing};

const ORIGIN: &str = "origin.example";
const CACHER: &str = "cache.example";

fn pair(strategy: RedundancyStrategyConfig) -> (LoopbackNetwork, TestInstance, TestInstance) {
    init_test_tracing();
    let network = LoopbackNetwork::new();
    let origin = TestInstance::new(&network, fixtures::engine_config(ORIGIN));
    let cacher = TestInstance::new(
        &network,
        fixtures::engine_config(CACHER).with_strategy(strategy),
    );
    (network, origin, cacher)
}

fn publish_both(origin: &TestInstance, cacher: &TestInstance, video: &fixtures::VideoBuilder) {
    origin.publish(video);
    cacher.publish(video);
}

async fn local_keys(instance: &TestInstance) -> Vec<ArtifactKey> {
    let mut keys: Vec<ArtifactKey> = instance
        .store
        .list(&RecordFilter::direction(CacheDirection::LocalCopyOfRemote))
        .await
        .into_iter()
        .map(|record| record.key)
        .collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn tick_replicates_every_uncovered_artifact() {
    let (_network, origin, cacher) = pair(fixtures::recently_added(10_000));
    let video = fixtures::video(1, ORIGIN)
        .with_file(720, 1_000)
        .with_file(1080, 2_000)
        .with_playlist(500);
    publish_both(&origin, &cacher, &video);

    let (tick, drained) = cacher.tick_and_drain("recently-added").await;

    assert_eq!(tick.outcome, TickOutcome::Completed);
    assert_eq!(tick.considered, 3);
    assert_eq!(tick.admitted, 3);
    assert_eq!(drained.completed, 3);
    assert_eq!(local_keys(&cacher).await.len(), 3);
    assert_eq!(cacher.storage.total_bytes(), 3_500);
    assert_eq!(
        cacher
            .store
            .strategy_usage(&StrategyName::new("recently-added"))
            .await,
        3_500
    );
    assert_eq!(origin.store.len().await, 3);

    let stats = cacher.engine.worker().stats();
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.bytes_replicated, 3_500);
}

#[tokio::test]
async fn covered_artifacts_are_not_fetched_again() {
    let (_network, origin, cacher) = pair(fixtures::recently_added(10_000));
    publish_both(&origin, &cacher, &fixtures::video(1, ORIGIN).with_file(720, 1_000));

    cacher.tick_and_drain("recently-added").await;
    let first = cacher.store.all().await;
    cacher.clock.advance(Duration::from_secs(600));

    let (tick, drained) = cacher.tick_and_drain("recently-added").await;

    assert_eq!(tick.considered, 0);
    assert_eq!(tick.refreshed, 1);
    assert_eq!(drained.completed, 0);
    assert_eq!(cacher.fetcher.fetch_count(), 1);

    let second = cacher.store.all().await;
    assert_eq!(second.len(), 1);
    assert!(second[0].expires_on() > first[0].expires_on());
    // The origin hears about the new expiry too.
    assert_eq!(origin.store.all().await[0].expires_on(), second[0].expires_on());
}

#[tokio::test]
async fn evicts_oldest_records_to_admit_a_new_candidate() {
    let (network, origin, cacher) = pair(fixtures::recently_added(3_000));
    let origin_host = fixtures::host(ORIGIN);

    // Three generations, one per tick, so creation times are distinct.
    for id in 1..=3 {
        publish_both(&origin, &cacher, &fixtures::video(id, ORIGIN).with_file(720, 1_000));
        cacher.tick_and_drain("recently-added").await;
        cacher.clock.advance(Duration::from_secs(60));
    }
    assert_eq!(local_keys(&cacher).await.len(), 3);
    network.clear_sent();

    publish_both(&origin, &cacher, &fixtures::video(4, ORIGIN).with_file(720, 1_500));
    let (tick, drained) = cacher.tick_and_drain("recently-added").await;

    assert_eq!(tick.admitted, 1);
    assert_eq!(tick.evicted, 2);
    assert_eq!(drained.completed, 1);
    assert_eq!(
        local_keys(&cacher).await,
        vec![
            ArtifactKey::file(VideoId::new(3), 720),
            ArtifactKey::file(VideoId::new(4), 720),
        ]
    );
    assert_eq!(
        cacher
            .store
            .strategy_usage(&StrategyName::new("recently-added"))
            .await,
        2_500
    );

    let stops: Vec<_> = network
        .sent_to(&origin_host)
        .into_iter()
        .filter(vrd_testkit::SentMessage::is_stop)
        .collect();
    assert_eq!(stops.len(), 2);
    assert_eq!(origin.store.len().await, 2);
    assert_eq!(cacher.storage.file_count(), 2);
}

#[tokio::test]
async fn candidate_larger_than_budget_evicts_nothing() {
    let (_network, origin, cacher) = pair(fixtures::recently_added(2_000));
    publish_both(&origin, &cacher, &fixtures::video(1, ORIGIN).with_file(720, 1_500));
    cacher.tick_and_drain("recently-added").await;
    cacher.clock.advance(Duration::from_secs(60));

    publish_both(&origin, &cacher, &fixtures::video(2, ORIGIN).with_file(2160, 5_000));
    let (tick, _) = cacher.tick_and_drain("recently-added").await;

    assert_eq!(tick.skipped, 1);
    assert_eq!(tick.evicted, 0);
    assert_eq!(
        local_keys(&cacher).await,
        vec![ArtifactKey::file(VideoId::new(1), 720)]
    );
}

#[tokio::test]
async fn manual_records_neither_count_nor_get_evicted() {
    let (_network, origin, cacher) = pair(fixtures::recently_added(1_000));
    let manual = fixtures::video(1, ORIGIN)
        .with_file(720, 5_000)
        .redundancy_disabled();
    publish_both(&origin, &cacher, &manual);
    cacher.engine.manual().add(VideoId::new(1)).await.unwrap();

    publish_both(&origin, &cacher, &fixtures::video(2, ORIGIN).with_file(720, 1_000));
    let (tick, drained) = cacher.tick_and_drain("recently-added").await;

    assert_eq!(tick.admitted, 1);
    assert_eq!(tick.evicted, 0);
    assert_eq!(drained.completed, 1);
    assert_eq!(local_keys(&cacher).await.len(), 2);
    assert_eq!(
        cacher
            .store
            .strategy_usage(&StrategyName::new("recently-added"))
            .await,
        1_000
    );
}

#[tokio::test]
async fn budget_cut_evicts_oldest_first() {
    init_test_tracing();
    let network = LoopbackNetwork::new();
    let clock = Arc::new(ManualClock::default());
    let origin = TestInstance::with_clock(&network, fixtures::engine_config(ORIGIN), clock.clone());
    let generous = TestInstance::with_clock(
        &network,
        fixtures::engine_config(CACHER).with_strategy(fixtures::recently_added(10_000)),
        clock.clone(),
    );
    for id in 1..=3 {
        let video = fixtures::video(id, ORIGIN).with_file(720, 1_000);
        origin.publish(&video);
        generous.publish(&video);
        generous.tick_and_drain("recently-added").await;
        clock.advance(Duration::from_secs(60));
    }

    // Same records under a smaller budget.
    let tight = fixtures::recently_added(1_500);
    let quota = vrd_store::QuotaTracker::new(generous.store.clone());
    let evicted = quota
        .enforce_limit(&tight, generous.engine.worker().as_ref())
        .await
        .unwrap();

    assert_eq!(evicted.len(), 2);
    assert_eq!(evicted[0].key, ArtifactKey::file(VideoId::new(1), 720));
    assert_eq!(evicted[1].key, ArtifactKey::file(VideoId::new(2), 720));
    assert_eq!(
        local_keys(&generous).await,
        vec![ArtifactKey::file(VideoId::new(3), 720)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eviction_racing_manual_removal_removes_the_record_once() {
    init_test_tracing();
    for _ in 0..16 {
        let network = LoopbackNetwork::new();
        let clock = Arc::new(ManualClock::default());
        let origin = TestInstance::with_clock(&network, fixtures::engine_config(ORIGIN), clock.clone());
        let cacher = Arc::new(TestInstance::with_clock(
            &network,
            fixtures::engine_config(CACHER).with_strategy(fixtures::recently_added(2_000)),
            clock.clone(),
        ));
        for id in 1..=2 {
            let video = fixtures::video(id, ORIGIN).with_file(720, 1_000);
            origin.publish(&video);
            cacher.publish(&video);
            cacher.tick_and_drain("recently-added").await;
            clock.advance(Duration::from_secs(60));
        }

        let strategy = fixtures::recently_added(2_000);
        let oldest = cacher.store.oldest_for_strategy(&strategy.name).await[0].clone();
        assert_eq!(oldest.key, ArtifactKey::file(VideoId::new(1), 720));
        let removed_before = cacher.engine.worker().stats().removed;
        network.clear_sent();

        let evicting = {
            let cacher = Arc::clone(&cacher);
            let strategy = strategy.clone();
            tokio::spawn(async move {
                cacher
                    .engine
                    .quota()
                    .try_admit(&strategy, 1_000, cacher.engine.worker().as_ref())
                    .await
            })
        };
        let removing = {
            let cacher = Arc::clone(&cacher);
            tokio::spawn(async move { cacher.engine.manual().remove(oldest.id).await })
        };
        let admitted = evicting.await.unwrap().unwrap();
        let removed = removing.await.unwrap().unwrap();

        let AdmitDecision::Admitted {
            reservation,
            evicted,
        } = admitted
        else {
            panic!("expected the candidate to be admitted");
        };
        assert!(evicted.iter().all(|record| record.id == oldest.id));
        let removals = evicted.len() + usize::from(matches!(removed, RemovalOutcome::Removed(_)));
        assert_eq!(removals, 1);
        assert_eq!(cacher.engine.worker().stats().removed, removed_before + 1);

        let stops = network
            .sent_to(&origin.host)
            .into_iter()
            .filter(|sent| sent.is_stop())
            .count();
        assert_eq!(stops, 1);

        let remaining = cacher.store.oldest_for_strategy(&strategy.name).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(
            cacher.store.strategy_usage(&strategy.name).await,
            remaining.iter().map(|record| record.size_bytes).sum::<u64>()
        );
        assert_eq!(cacher.store.strategy_usage(&strategy.name).await, 1_000);
        drop(reservation);
    }
}

#[tokio::test]
async fn most_views_respects_min_views_and_order() {
    let strategy = fixtures::most_views(1_500).with_min_views(10);
    let (_network, origin, cacher) = pair(strategy);
    publish_both(&origin, &cacher, &fixtures::video(1, ORIGIN).views(5).with_file(720, 1_000));
    publish_both(&origin, &cacher, &fixtures::video(2, ORIGIN).views(40).with_file(720, 1_000));
    publish_both(&origin, &cacher, &fixtures::video(3, ORIGIN).views(90).with_file(720, 1_000));

    let (tick, drained) = cacher.tick_and_drain("most-views").await;

    // Video 1 is below the floor; video 2 does not fit after video 3.
    assert_eq!(tick.considered, 2);
    assert_eq!(tick.admitted, 1);
    assert_eq!(tick.skipped, 1);
    assert_eq!(drained.completed, 1);
    assert_eq!(
        local_keys(&cacher).await,
        vec![ArtifactKey::file(VideoId::new(3), 720)]
    );
}

#[tokio::test]
async fn videos_younger_than_min_lifetime_are_ignored() {
    let strategy = fixtures::recently_added(10_000).with_min_lifetime(Duration::from_secs(86_400));
    let (_network, origin, cacher) = pair(strategy);
    let fresh = fixtures::video(1, ORIGIN)
        .published_at(fixtures::epoch() - chrono::TimeDelta::hours(2))
        .with_file(720, 1_000);
    publish_both(&origin, &cacher, &fresh);

    let (tick, _) = cacher.tick_and_drain("recently-added").await;
    assert_eq!(tick.considered, 0);

    cacher.clock.advance(Duration::from_secs(86_400));
    let (tick, drained) = cacher.tick_and_drain("recently-added").await;
    assert_eq!(tick.admitted, 1);
    assert_eq!(drained.completed, 1);
}

#[tokio::test]
async fn failed_fetch_leaves_no_record_and_withdraws() {
    let (network, origin, cacher) = pair(fixtures::recently_added(10_000));
    let video = fixtures::video(1, ORIGIN).with_file(720, 1_000);
    publish_both(&origin, &cacher, &video);
    let key = ArtifactKey::file(VideoId::new(1), 720);
    cacher.fetcher.fail(video.artifact_url(&key));

    let (_, drained) = cacher.tick_and_drain("recently-added").await;

    assert_eq!(drained.failed, 1);
    assert!(cacher.store.is_empty().await);
    assert_eq!(cacher.storage.file_count(), 0);
    // Confirmed first, then told to forget.
    assert!(origin.store.is_empty().await);
    let sent = network.sent_to(&origin.host);
    assert_eq!(sent.len(), 2);
    assert!(sent[0].is_duplicate());
    assert!(sent[1].is_stop());
}

#[tokio::test]
async fn silent_origin_times_out_without_fetching() {
    let (network, origin, cacher) = pair(fixtures::recently_added(10_000));
    publish_both(&origin, &cacher, &fixtures::video(1, ORIGIN).with_file(720, 1_000));
    network.silence(&origin.host);

    let (_, drained) = cacher.tick_and_drain("recently-added").await;

    assert_eq!(drained.failed, 1);
    assert_eq!(cacher.fetcher.fetch_count(), 0);
    assert!(cacher.store.is_empty().await);
}

#[tokio::test]
async fn overlapping_tick_is_skipped() {
    let (_network, origin, cacher) = pair(fixtures::recently_added(10_000));
    publish_both(&origin, &cacher, &fixtures::video(1, ORIGIN).with_file(720, 1_000));
    cacher.catalog.set_latency(Some(Duration::from_millis(50)));
    let scheduler = cacher
        .engine
        .scheduler(&StrategyName::new("recently-added"))
        .unwrap()
        .clone();
    let (_tx, cancel) = watch::channel(false);

    let (first, second) = tokio::join!(scheduler.tick(&cancel), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.tick(&cancel).await
    });

    assert_eq!(first.outcome, TickOutcome::Completed);
    assert_eq!(second.outcome, TickOutcome::Overlapped);
    assert_eq!(second.considered, 0);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
    scheduler.drain().await;
}

#[tokio::test]
async fn cancelled_tick_admits_nothing() {
    let (_network, origin, cacher) = pair(fixtures::recently_added(10_000));
    publish_both(&origin, &cacher, &fixtures::video(1, ORIGIN).with_file(720, 1_000));
    let (tx, cancel) = watch::channel(false);
    tx.send(true).unwrap();

    let tick = cacher
        .engine
        .scheduler(&StrategyName::new("recently-added"))
        .unwrap()
        .tick(&cancel)
        .await;

    assert_eq!(tick.outcome, TickOutcome::Cancelled);
    assert_eq!(tick.admitted, 0);
    assert!(cacher.store.is_empty().await);
}

#[tokio::test]
async fn started_engine_replicates_and_shuts_down() {
    let (_network, origin, cacher) = pair(fixtures::recently_added(10_000));
    publish_both(&origin, &cacher, &fixtures::video(1, ORIGIN).with_file(720, 1_000));

    let handle = cacher.engine.start();
    let replicated = tokio::time::timeout(Duration::from_secs(5), async {
        while cacher.store.is_empty().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    handle.shutdown().await;

    assert!(replicated.is_ok(), "scheduler never replicated");
    assert_eq!(cacher.store.len().await, 1);
    assert_eq!(cacher.engine.worker().in_flight_count(), 0);
}
