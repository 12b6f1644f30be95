//! Expiry and orphan reaping on both sides of a duplication.

use std::sync::Arc;
use std::time::Duration;

use vrd_core::{ArtifactKey, CacheDirection, VideoId};
use vrd_engine::{Clock, ExpirationReaper};
use vrd_store::{RecordFilter, RedundancyStore};
use vrd_testkit::{LoopbackNetwork, ManualClock, TestInstance, fixtures, init_test_tracing};

const ORIGIN: &str = "origin.example";
const CACHER: &str = "cache.example";

struct Pair {
    network: LoopbackNetwork,
    clock: Arc<ManualClock>,
    origin: TestInstance,
    cacher: TestInstance,
}

/// Origin and cacher on one clock; the cacher keeps copies for one hour.
fn pair() -> Pair {
    init_test_tracing();
    let network = LoopbackNetwork::new();
    let clock = Arc::new(ManualClock::default());
    let origin = TestInstance::with_clock(&network, fixtures::engine_config(ORIGIN), clock.clone());
    let cacher = TestInstance::with_clock(
        &network,
        fixtures::engine_config(CACHER).with_strategy(
            fixtures::recently_added(10_000).with_min_lifetime(Duration::from_secs(3_600)),
        ),
        clock.clone(),
    );
    Pair {
        network,
        clock,
        origin,
        cacher,
    }
}

impl Pair {
    fn publish(&self, video: &fixtures::VideoBuilder) {
        self.origin.publish(video);
        self.cacher.publish(video);
    }
}

#[tokio::test]
async fn expired_copy_that_stopped_qualifying_is_removed_and_origin_notified() {
    let pair = pair();
    pair.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    pair.cacher.tick_and_drain("recently-added").await;
    pair.network.clear_sent();

    // Not yet due.
    pair.clock.advance(Duration::from_secs(1_800));
    let report = pair.cacher.engine.reaper().reap(pair.clock.now()).await;
    assert_eq!(report.removed(), 0);

    // The origin opts out of redundancy.
    pair.cacher.publish(
        &fixtures::video(1, ORIGIN)
            .with_file(720, 1_000)
            .redundancy_disabled(),
    );
    pair.clock.advance(Duration::from_secs(1_801));
    let report = pair.cacher.engine.reaper().reap(pair.clock.now()).await;

    assert_eq!(report.expired_local, 1);
    assert!(pair.cacher.store.is_empty().await);
    assert_eq!(pair.cacher.storage.file_count(), 0);
    assert!(pair.network.sent_to(&pair.origin.host)[0].is_stop());
    assert!(pair.origin.store.is_empty().await);
}

#[tokio::test]
async fn manual_copies_never_expire() {
    let pair = pair();
    pair.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    pair.cacher.engine.manual().add(VideoId::new(1)).await.unwrap();

    pair.clock.advance(Duration::from_secs(365 * 86_400));
    let report = pair.cacher.engine.reaper().reap(pair.clock.now()).await;

    assert_eq!(report.removed(), 0);
    assert_eq!(pair.cacher.store.len().await, 1);
    assert_eq!(pair.origin.store.len().await, 1);
}

#[tokio::test]
async fn origin_reaps_expired_announcements() {
    let pair = pair();
    pair.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    pair.cacher.tick_and_drain("recently-added").await;

    // The cacher goes quiet and never withdraws.
    pair.network.cut(&pair.cacher.host);
    pair.clock.advance(Duration::from_secs(7_200));
    let report = pair.origin.engine.reaper().reap(pair.clock.now()).await;

    assert_eq!(report.expired_remote, 1);
    assert!(
        pair.origin
            .store
            .list(&RecordFilter::direction(CacheDirection::RemoteCopyOfLocal))
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn copies_of_unconfigured_strategies_are_orphans() {
    let pair = pair();
    pair.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    pair.publish(
        &fixtures::video(2, ORIGIN)
            .with_file(720, 1_000)
            .redundancy_disabled(),
    );
    pair.cacher.tick_and_drain("recently-added").await;
    pair.cacher.engine.manual().add(VideoId::new(2)).await.unwrap();

    // A reaper for a configuration without "recently-added".
    let reaper = ExpirationReaper::new(
        pair.cacher.store.clone(),
        pair.cacher.catalog.clone(),
        Arc::clone(pair.cacher.engine.worker()),
        pair.clock.clone(),
        [],
        Duration::from_secs(60),
    );
    let report = reaper.reap(pair.clock.now()).await;

    assert_eq!(report.orphaned, 1);
    assert_eq!(report.expired_local, 0);
    let left = pair.cacher.store.all().await;
    assert_eq!(left.len(), 1);
    assert!(left[0].is_manual());
}

#[tokio::test]
async fn reaping_twice_removes_nothing_more() {
    let pair = pair();
    pair.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000).with_playlist(300));
    pair.cacher.tick_and_drain("recently-added").await;
    pair.cacher.catalog.remove(VideoId::new(1));
    pair.clock.advance(Duration::from_secs(7_200));

    let first = pair.cacher.engine.reaper().reap(pair.clock.now()).await;
    let second = pair.cacher.engine.reaper().reap(pair.clock.now()).await;

    assert_eq!(first.expired_local, 2);
    assert_eq!(second.removed(), 0);
    assert_eq!(second.failed, 0);
    assert_eq!(pair.cacher.engine.worker().stats().removed, 2);
}

#[tokio::test]
async fn refreshed_copy_outlives_its_first_expiry() {
    let pair = pair();
    pair.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    pair.cacher.tick_and_drain("recently-added").await;

    pair.clock.advance(Duration::from_secs(3_000));
    let tick = pair.cacher.tick("recently-added").await;
    assert_eq!(tick.refreshed, 1);

    pair.clock.advance(Duration::from_secs(1_000));
    let report = pair.cacher.engine.reaper().reap(pair.clock.now()).await;

    assert_eq!(report.removed(), 0);
    assert_eq!(
        pair.cacher.store.all().await[0].key,
        ArtifactKey::file(VideoId::new(1), 720)
    );
}

#[tokio::test]
async fn qualifying_copy_survives_expiry_between_slow_ticks() {
    init_test_tracing();
    let network = LoopbackNetwork::new();
    let clock = Arc::new(ManualClock::default());
    let origin = TestInstance::with_clock(&network, fixtures::engine_config(ORIGIN), clock.clone());
    let cacher = TestInstance::with_clock(
        &network,
        fixtures::engine_config(CACHER).with_strategy(
            fixtures::recently_added(10_000)
                .with_min_lifetime(Duration::from_secs(3_600))
                .with_check_interval(Duration::from_secs(7_200)),
        ),
        clock.clone(),
    );
    let video = fixtures::video(1, ORIGIN).with_file(720, 1_000);
    origin.publish(&video);
    cacher.publish(&video);
    cacher.tick_and_drain("recently-added").await;
    let first_expiry = cacher.store.all().await[0].expires_on().unwrap();

    // Past the lifetime, long before the next tick.
    clock.advance(Duration::from_secs(3_601));
    let report = cacher.engine.reaper().reap(clock.now()).await;

    assert_eq!(report.removed(), 0);
    assert_eq!(report.refreshed, 1);
    let kept = cacher.store.all().await;
    assert_eq!(kept.len(), 1);
    let expiry = kept[0].expires_on().unwrap();
    assert!(expiry > clock.now());
    assert!(expiry > first_expiry);
    assert_eq!(cacher.fetcher.fetch_count(), 1);
    assert_eq!(origin.store.all().await[0].expires_on(), Some(expiry));

    let again = cacher.engine.reaper().reap(clock.now()).await;
    assert_eq!(again, vrd_engine::ReapReport::default());
}

#[tokio::test]
async fn expired_copy_is_kept_while_catalog_is_down() {
    let pair = pair();
    pair.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    pair.cacher.tick_and_drain("recently-added").await;
    pair.cacher.catalog.set_unavailable(true);

    pair.clock.advance(Duration::from_secs(3_601));
    let report = pair.cacher.engine.reaper().reap(pair.clock.now()).await;

    assert_eq!(report.removed(), 0);
    assert_eq!(report.failed, 1);
    assert_eq!(pair.cacher.store.len().await, 1);
}
