//! Integration tests for the byte-level video cache: fetch sharing, eviction
//! policy, access-pattern prediction, and failure reporting.

mod fixture;

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use tokio::time::timeout;
use video_precache::{
    CacheError, CacheEvent, CacheSettings, CancellationToken, EventChannel, LoadStrategy,
    ResourceFetcher, VideoCache, VideoResource,
};

use fixture::Fixture;

fn build_cache(settings: &CacheSettings) -> Arc<VideoCache> {
    let fetcher = ResourceFetcher::from_settings(settings, CancellationToken::new());
    let events = EventChannel::new(settings.event_channel_capacity);
    Arc::new(VideoCache::new(settings, fetcher, events))
}

#[tokio::test]
async fn concurrent_gets_share_a_single_fetch() {
    let fx = Fixture::start().await;
    fx.set_body("/videos/zen.mp4", "zen-bytes");
    // Widen the race window so every caller arrives while the fetch is
    // outstanding.
    fx.set_delay("/videos/zen.mp4", Duration::from_millis(100));

    let settings = CacheSettings::new().max_retries(0);
    let cache = build_cache(&settings);
    let url = fx.url("/videos/zen.mp4");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let url = url.clone();
            tokio::spawn(async move { cache.get("zen.mp4", &url, LoadStrategy::Eager).await })
        })
        .collect();

    for task in tasks {
        match task.await.unwrap().unwrap() {
            VideoResource::Cached(bytes) => assert_eq!(&bytes[..], b"zen-bytes"),
            VideoResource::Remote(url) => panic!("expected cached payload, got remote {url}"),
        }
    }
    assert_eq!(fx.hits("/videos/zen.mp4"), 1);
    assert_eq!(cache.len(), 1);
}

#[rstest]
#[case(LoadStrategy::Lazy)]
#[case(LoadStrategy::Progressive)]
#[tokio::test]
async fn non_eager_strategies_return_remote_immediately(#[case] strategy: LoadStrategy) {
    let fx = Fixture::start().await;
    fx.set_body("/videos/zen.mp4", "zen-bytes");
    let settings = CacheSettings::new().max_retries(0);
    let cache = build_cache(&settings);
    let url = fx.url("/videos/zen.mp4");

    let resource = cache.get("zen.mp4", &url, strategy).await.unwrap();
    match resource {
        VideoResource::Remote(remote) => assert_eq!(remote, url),
        VideoResource::Cached(_) => panic!("cold cache should not return a payload"),
    }
}

#[tokio::test]
async fn progressive_get_fills_the_cache_in_the_background() {
    let fx = Fixture::start().await;
    fx.set_body("/videos/zen.mp4", "zen-bytes");
    let settings = CacheSettings::new().max_retries(0);
    let cache = build_cache(&settings);
    let url = fx.url("/videos/zen.mp4");

    let first = cache.get("zen.mp4", &url, LoadStrategy::Progressive).await.unwrap();
    assert!(!first.is_cached());

    // The second get joins the background fetch started by the first one
    // instead of issuing its own.
    let second = cache.get("zen.mp4", &url, LoadStrategy::Lazy).await.unwrap();
    assert!(second.is_cached());
    assert_eq!(fx.hits("/videos/zen.mp4"), 1);
}

#[tokio::test]
async fn spawn_preload_registers_the_entry_before_returning() {
    let fx = Fixture::start().await;
    fx.set_body("/videos/zen.mp4", "zen-bytes");
    fx.set_delay("/videos/zen.mp4", Duration::from_millis(100));

    let settings = CacheSettings::new().max_retries(0);
    let cache = build_cache(&settings);
    let url = fx.url("/videos/zen.mp4");

    // The in-flight entry exists as soon as the call returns, with no
    // intervening await point for the background task to run in.
    cache.spawn_preload("zen.mp4", &url);
    assert_eq!(cache.len(), 1);

    // A follow-up request joins that fetch rather than starting a second one.
    let resource = cache.get("zen.mp4", &url, LoadStrategy::Lazy).await.unwrap();
    assert!(resource.is_cached());
    assert_eq!(fx.hits("/videos/zen.mp4"), 1);
}

#[tokio::test]
async fn eviction_never_removes_in_flight_entries() {
    let fx = Fixture::start().await;
    for name in ["a", "b", "c"] {
        fx.set_body(&format!("/videos/{name}.mp4"), "fast");
    }
    fx.set_body("/videos/slow.mp4", "slow-bytes");
    fx.set_delay("/videos/slow.mp4", Duration::from_millis(300));

    // The constrained preset keeps three entries.
    let settings = CacheSettings::new().constrained();
    let cache = build_cache(&settings);
    assert_eq!(cache.stats().capacity, 3);

    cache.preload("a.mp4", &fx.url("/videos/a.mp4")).await.unwrap();
    cache.preload("b.mp4", &fx.url("/videos/b.mp4")).await.unwrap();

    let slow = {
        let cache = Arc::clone(&cache);
        let url = fx.url("/videos/slow.mp4");
        tokio::spawn(async move { cache.preload("slow.mp4", &url).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Completing this preload runs an eviction pass while the slow fetch is
    // still outstanding; only ready entries may be dropped.
    cache.preload("c.mp4", &fx.url("/videos/c.mp4")).await.unwrap();
    assert!(cache.stats().ids.iter().any(|id| id == "slow.mp4"));

    slow.await.unwrap().unwrap();
    let stats = cache.stats();
    assert!(stats.len <= stats.capacity, "{} entries over capacity {}", stats.len, stats.capacity);
    assert!(stats.ids.iter().any(|id| id == "slow.mp4"));
}

#[tokio::test]
async fn lowest_priority_entry_is_evicted_at_capacity() {
    let fx = Fixture::start().await;
    for i in 1..=6 {
        fx.set_body(&format!("/videos/v{i}.mp4"), "payload");
    }
    let settings = CacheSettings::new().cache_capacity(5).max_retries(0);
    let cache = build_cache(&settings);

    for i in 1..=5 {
        let id = format!("v{i}.mp4");
        cache.preload(&id, &fx.url(&format!("/videos/v{i}.mp4"))).await.unwrap();
    }
    // Later entries accumulate more accesses and fresher timestamps, leaving
    // v1 with the lowest priority score.
    for i in 1..=5u32 {
        let id = format!("v{i}.mp4");
        for _ in 0..i {
            cache.record_access(&id);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    cache.preload("v6.mp4", &fx.url("/videos/v6.mp4")).await.unwrap();

    let stats = cache.stats();
    assert_eq!(stats.len, 5);
    assert!(!stats.ids.iter().any(|id| id == "v1.mp4"), "v1 should be evicted: {:?}", stats.ids);
    for i in 2..=6 {
        let id = format!("v{i}.mp4");
        assert!(stats.ids.contains(&id), "{id} missing from {:?}", stats.ids);
    }
}

#[tokio::test]
async fn prediction_follows_observed_transitions() {
    let settings = CacheSettings::new();
    let cache = build_cache(&settings);

    for id in ["a", "b", "a", "b", "a", "c"] {
        cache.record_access(id);
    }

    assert_eq!(cache.predict_next("a", 1), vec!["b".to_string()]);
    assert_eq!(cache.predict_next("a", 2), vec!["b".to_string(), "c".to_string()]);
    // No outgoing transitions from "c": ties resolve in first-seen order.
    assert_eq!(cache.predict_next("c", 2), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn background_preload_failures_are_reported_not_raised() {
    let fx = Fixture::start().await;
    fx.set_fail("/videos/broken.mp4");

    let settings = CacheSettings::new()
        .max_retries(0)
        .retry_base_delay(Duration::from_millis(1));
    let cache = build_cache(&settings);

    let mut failures = cache.take_failure_reports().expect("first take yields the receiver");
    assert!(cache.take_failure_reports().is_none());

    cache.spawn_preload("broken.mp4", &fx.url("/videos/broken.mp4"));

    let report = timeout(Duration::from_secs(5), failures.recv())
        .await
        .expect("report within timeout")
        .expect("channel open");
    assert_eq!(report.id, "broken.mp4");
    assert!(cache.is_empty());
}

#[tokio::test]
async fn load_events_are_broadcast() {
    let fx = Fixture::start().await;
    fx.set_body("/videos/zen.mp4", "zen");
    fx.set_fail("/videos/broken.mp4");

    let settings = CacheSettings::new().max_retries(0);
    let fetcher = ResourceFetcher::from_settings(&settings, CancellationToken::new());
    let events = EventChannel::new(16);
    let mut rx = events.subscribe();
    let cache = Arc::new(VideoCache::new(&settings, fetcher, events));

    cache.preload("zen.mp4", &fx.url("/videos/zen.mp4")).await.unwrap();
    assert!(matches!(
        rx.recv().await.unwrap(),
        CacheEvent::VideoLoaded { id } if id == "zen.mp4"
    ));

    assert!(cache.preload("broken.mp4", &fx.url("/videos/broken.mp4")).await.is_err());
    assert!(matches!(
        rx.recv().await.unwrap(),
        CacheEvent::VideoLoadFailed { id, .. } if id == "broken.mp4"
    ));
}

#[tokio::test]
async fn clear_releases_every_payload() {
    let fx = Fixture::start().await;
    fx.set_body("/videos/zen.mp4", "zen");
    let settings = CacheSettings::new().max_retries(0);
    let cache = build_cache(&settings);

    cache.preload("zen.mp4", &fx.url("/videos/zen.mp4")).await.unwrap();
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());

    // A cleared identifier is fetched again on the next preload.
    cache.preload("zen.mp4", &fx.url("/videos/zen.mp4")).await.unwrap();
    assert_eq!(fx.hits("/videos/zen.mp4"), 2);
}

#[tokio::test]
async fn cancellation_aborts_a_pending_fetch() {
    let fx = Fixture::start().await;
    fx.set_body("/videos/slow.mp4", "slow-bytes");
    fx.set_delay("/videos/slow.mp4", Duration::from_secs(30));

    let settings = CacheSettings::new().max_retries(0);
    let fetcher = ResourceFetcher::from_settings(&settings, CancellationToken::new());
    let url = fx.url("/videos/slow.mp4");

    let pending = {
        let fetcher = fetcher.clone();
        let url = url.clone();
        tokio::spawn(async move { fetcher.fetch_bytes(&url).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    fetcher.cancel_token().cancel();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, CacheError::Cancelled));
}
