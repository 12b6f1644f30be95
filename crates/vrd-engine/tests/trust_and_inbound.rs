//! Trust policy and inbound duplication requests across two instances.

use url::Url;
use vrd_core::{
    AcceptancePolicy, ArtifactKey, CacheDirection, DenyReason, DuplicationRequest,
    DuplicationResponse, FederationMessage, StrategyName, VideoId,
};
use vrd_engine::DuplicationHandler;
use vrd_store::{RecordFilter, RedundancyStore};
use vrd_testkit::{LoopbackNetwork, TestInstance, fixtures, init_test_tracing};

const ORIGIN: &str = "origin.example";
const CACHER: &str = "cache.example";
const STRATEGY: &str = "recently-added";

fn pair(origin_policy: AcceptancePolicy) -> (LoopbackNetwork, TestInstance, TestInstance) {
    init_test_tracing();
    let network = LoopbackNetwork::new();
    let origin = TestInstance::new(
        &network,
        fixtures::engine_config(ORIGIN).with_accept_from(origin_policy),
    );
    let cacher = TestInstance::new(
        &network,
        fixtures::engine_config(CACHER).with_strategy(fixtures::recently_added(10_000)),
    );
    (network, origin, cacher)
}

fn request(key: ArtifactKey, expires_in_hours: Option<i64>) -> FederationMessage {
    FederationMessage::Duplicate(DuplicationRequest {
        requesting_host: fixtures::host(CACHER),
        key,
        file_url: Url::parse("https://cache.example/static/redundancy/1-720.mp4").unwrap(),
        size_bytes: 1_000,
        strategy: expires_in_hours.map(|_| StrategyName::new(STRATEGY)),
        expires_on: expires_in_hours
            .map(|hours| fixtures::epoch() + chrono::TimeDelta::hours(hours)),
    })
}

#[tokio::test]
async fn origin_accepting_nobody_blocks_replication() {
    let (network, origin, cacher) = pair(AcceptancePolicy::Nobody);
    let video = fixtures::video(1, ORIGIN).with_file(720, 1_000);
    origin.publish(&video);
    cacher.publish(&video);

    let (tick, drained) = cacher.tick_and_drain(STRATEGY).await;

    assert_eq!(tick.admitted, 1);
    assert_eq!(drained.completed, 0);
    assert_eq!(drained.failed, 1);
    assert_eq!(cacher.fetcher.fetch_count(), 0, "nothing fetched without consent");
    assert!(cacher.store.is_empty().await);
    assert!(origin.store.is_empty().await);
    assert_eq!(network.sent_to(&fixtures::host(ORIGIN)).len(), 1);
}

#[tokio::test]
async fn followings_requires_origin_to_follow_the_requester() {
    let (_network, origin, cacher) = pair(AcceptancePolicy::Followings);
    let video = fixtures::video(1, ORIGIN).with_file(720, 1_000);
    origin.publish(&video);
    cacher.publish(&video);

    // The cacher following the origin proves nothing.
    cacher.follow(&origin.host);
    let (_, drained) = cacher.tick_and_drain(STRATEGY).await;
    assert_eq!(drained.failed, 1);
    assert!(cacher.store.is_empty().await);

    origin.follow(&cacher.host);
    let (_, drained) = cacher.tick_and_drain(STRATEGY).await;
    assert_eq!(drained.completed, 1);

    let local = cacher
        .store
        .list(&RecordFilter::direction(CacheDirection::LocalCopyOfRemote))
        .await;
    assert_eq!(local.len(), 1);

    let remote = origin
        .store
        .list(&RecordFilter::direction(CacheDirection::RemoteCopyOfLocal))
        .await;
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].holder, cacher.host);
    assert_eq!(
        remote[0].file_url.as_str(),
        "https://cache.example/static/redundancy/1-720.mp4"
    );
    assert_eq!(remote[0].strategy(), Some(&StrategyName::new(STRATEGY)));
    assert_eq!(remote[0].expires_on(), local[0].expires_on());
}

#[tokio::test]
async fn inbound_rejects_unknown_and_foreign_videos() {
    let (_network, origin, _cacher) = pair(AcceptancePolicy::Anybody);
    let inbound = origin.engine.inbound();

    let missing = inbound
        .handle(request(ArtifactKey::file(VideoId::new(404), 720), Some(1)))
        .await;
    assert_eq!(
        missing,
        DuplicationResponse::Denied {
            reason: DenyReason::UnknownVideo
        }
    );

    // A video hosted elsewhere is not ours to grant.
    origin.publish(&fixtures::video(2, "third.example").with_file(720, 1_000));
    let foreign = inbound
        .handle(request(ArtifactKey::file(VideoId::new(2), 720), Some(1)))
        .await;
    assert_eq!(
        foreign,
        DuplicationResponse::Denied {
            reason: DenyReason::UnknownVideo
        }
    );

    origin.publish(&fixtures::video(3, ORIGIN).with_file(720, 1_000));
    let wrong_resolution = inbound
        .handle(request(ArtifactKey::file(VideoId::new(3), 1080), Some(1)))
        .await;
    assert_eq!(
        wrong_resolution,
        DuplicationResponse::Denied {
            reason: DenyReason::UnknownArtifact
        }
    );

    assert!(origin.store.is_empty().await);
}

#[tokio::test]
async fn repeated_duplicate_refreshes_instead_of_duplicating() {
    let (_network, origin, _cacher) = pair(AcceptancePolicy::Anybody);
    origin.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    let key = ArtifactKey::file(VideoId::new(1), 720);
    let inbound = origin.engine.inbound();

    assert!(inbound.handle(request(key, Some(1))).await.is_accepted());
    assert!(inbound.handle(request(key, Some(5))).await.is_accepted());

    let records = origin.store.all().await;
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].expires_on(),
        Some(fixtures::epoch() + chrono::TimeDelta::hours(5))
    );
}

#[tokio::test]
async fn manual_request_is_recorded_without_expiry() {
    let (_network, origin, _cacher) = pair(AcceptancePolicy::Anybody);
    origin.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));

    let response = origin
        .engine
        .inbound()
        .handle(request(ArtifactKey::file(VideoId::new(1), 720), None))
        .await;

    assert!(response.is_accepted());
    let records = origin.store.all().await;
    assert!(records[0].is_manual());
    assert_eq!(records[0].expires_on(), None);
}

#[tokio::test]
async fn stop_duplicating_is_idempotent() {
    let (_network, origin, _cacher) = pair(AcceptancePolicy::Anybody);
    origin.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    let key = ArtifactKey::file(VideoId::new(1), 720);
    let inbound = origin.engine.inbound();
    inbound.handle(request(key, Some(1))).await;

    let stop = FederationMessage::StopDuplicating {
        requesting_host: fixtures::host(CACHER),
        key,
    };
    assert!(inbound.handle(stop.clone()).await.is_accepted());
    assert!(inbound.handle(stop).await.is_accepted());
    assert!(origin.store.is_empty().await);
}

#[tokio::test]
async fn stop_from_another_host_leaves_record_alone() {
    let (_network, origin, _cacher) = pair(AcceptancePolicy::Anybody);
    origin.publish(&fixtures::video(1, ORIGIN).with_file(720, 1_000));
    let key = ArtifactKey::file(VideoId::new(1), 720);
    let inbound = origin.engine.inbound();
    inbound.handle(request(key, Some(1))).await;

    inbound
        .handle(FederationMessage::StopDuplicating {
            requesting_host: fixtures::host("intruder.example"),
            key,
        })
        .await;

    assert_eq!(origin.store.len().await, 1);
}
