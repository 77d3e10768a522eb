//! Integration tests for the video session layer: startup warmup, transition
//! debouncing, and prediction-driven preloading.

mod fixture;

use std::sync::Arc;
use std::time::Duration;

use url::Url;
use video_precache::{
    default_catalog, CacheError, CacheSettings, CancellationToken, CatalogResolver, EventChannel,
    HttpObjectStore, ObjectStore, ResourceFetcher, VideoCache, VideoSession,
};

use fixture::Fixture;

const CATALOG_FILES: [&str; 4] = ["zen.mp4", "forest.mp4", "lake.mp4", "campfire.mp4"];

fn build_session(fx: &Fixture, settings: CacheSettings) -> Arc<VideoSession> {
    for name in CATALOG_FILES {
        fx.set_body(&format!("/media/{name}"), "video-bytes");
    }
    let fetcher = ResourceFetcher::from_settings(&settings, CancellationToken::new());
    let events = EventChannel::new(settings.event_channel_capacity);
    let base = Url::parse(&format!("{}/media/", fx.base_url)).expect("fixture base url");
    let store: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new(base, fetcher.clone()));
    let cache = Arc::new(VideoCache::new(&settings, fetcher, events.clone()));
    let resolver = Arc::new(CatalogResolver::new(default_catalog(), Some(store), &settings));
    Arc::new(VideoSession::new(&settings, cache, resolver, events))
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}

#[tokio::test]
async fn start_makes_the_first_catalog_entry_current() {
    let fx = Fixture::start().await;
    let settings = CacheSettings::new().max_retries(0);
    let session = build_session(&fx, settings);

    let descriptors = session.start().await;
    assert_eq!(descriptors.len(), 4);
    assert_eq!(session.current().as_deref(), Some("zen.mp4"));

    // Warmup preloads the first entry before start returns, the rest follow.
    assert!(!session.cache().is_empty());
    wait_for(|| session.cache().len() == 4).await;
}

#[tokio::test]
async fn rapid_transitions_are_debounced() {
    let fx = Fixture::start().await;
    let settings = CacheSettings::new()
        .max_retries(0)
        .min_transition_interval(Duration::from_millis(200));
    let session = build_session(&fx, settings);
    session.start().await;

    session.switch_to("forest.mp4").await.unwrap();
    assert_eq!(session.current().as_deref(), Some("forest.mp4"));

    // Inside the window: dropped, not queued; the active video is unchanged.
    let denied = session.switch_to("lake.mp4").await;
    assert!(matches!(
        denied.unwrap_err(),
        CacheError::TransitionDebounced { .. }
    ));
    assert_eq!(session.current().as_deref(), Some("forest.mp4"));

    tokio::time::sleep(Duration::from_millis(250)).await;
    session.switch_to("lake.mp4").await.unwrap();
    assert_eq!(session.current().as_deref(), Some("lake.mp4"));
}

#[tokio::test]
async fn switching_to_an_unknown_video_fails() {
    let fx = Fixture::start().await;
    let settings = CacheSettings::new()
        .max_retries(0)
        .min_transition_interval(Duration::from_millis(1));
    let session = build_session(&fx, settings);
    session.start().await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let err = session.switch_to("nope.mp4").await.unwrap_err();
    assert!(matches!(err, CacheError::UnknownVideo(id) if id == "nope.mp4"));
}

#[tokio::test]
async fn failed_switch_leaves_session_state_intact() {
    let fx = Fixture::start().await;
    let settings = CacheSettings::new()
        .max_retries(0)
        .min_transition_interval(Duration::from_millis(200));
    let session = build_session(&fx, settings);
    session.start().await;

    let err = session.switch_to("nope.mp4").await.unwrap_err();
    assert!(matches!(err, CacheError::UnknownVideo(_)));
    // The rejected id never becomes current.
    assert_eq!(session.current().as_deref(), Some("zen.mp4"));

    // The failed attempt did not consume the debounce window either: the
    // next legitimate switch goes through immediately.
    session.switch_to("forest.mp4").await.unwrap();
    assert_eq!(session.current().as_deref(), Some("forest.mp4"));
}

#[tokio::test]
async fn accepted_transitions_preload_the_predicted_next_video() {
    let fx = Fixture::start().await;
    let settings = CacheSettings::new()
        .max_retries(0)
        .min_transition_interval(Duration::from_millis(1));
    let session = build_session(&fx, settings);

    // Teach the cache a zen -> forest habit without starting the session, so
    // only prediction decides what gets preloaded.
    for _ in 0..3 {
        session.cache().record_access("zen.mp4");
        session.cache().record_access("forest.mp4");
    }

    session.switch_to("zen.mp4").await.unwrap();
    wait_for(|| {
        session
            .cache()
            .stats()
            .ids
            .iter()
            .any(|id| id == "forest.mp4")
    })
    .await;
}
