//! Video session glue.
//!
//! `VideoSession` sits between the presentation layer and the caching
//! subsystems: it tracks the active video, debounces rapid manual
//! transitions, records accesses, emits typed events, and schedules
//! prediction-driven background preloads after every accepted transition.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::cache::{LoadStrategy, VideoCache, VideoResource};
use crate::catalog::{CatalogResolver, VideoDescriptor};
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, EventChannel};
use crate::settings::CacheSettings;

struct SessionState {
    current: Option<String>,
    last_transition: Option<Instant>,
}

/// Presentation-facing session over the caching subsystem.
pub struct VideoSession {
    cache: Arc<VideoCache>,
    resolver: Arc<CatalogResolver>,
    events: EventChannel,
    min_transition_interval: Duration,
    predicted_preload_count: usize,
    state: Mutex<SessionState>,
}

impl VideoSession {
    pub fn new(
        settings: &CacheSettings,
        cache: Arc<VideoCache>,
        resolver: Arc<CatalogResolver>,
        events: EventChannel,
    ) -> Self {
        Self {
            cache,
            resolver,
            events,
            min_transition_interval: settings.min_transition_interval,
            predicted_preload_count: settings.predicted_preload_count,
            state: Mutex::new(SessionState {
                current: None,
                last_transition: None,
            }),
        }
    }

    /// Resolve the catalog, warm the cache (first entry eagerly, the rest
    /// progressively), and make the first entry the active video.
    pub async fn start(self: &Arc<Self>) -> Arc<Vec<VideoDescriptor>> {
        let descriptors = self.resolver.resolve_with_warmup(&self.cache).await;

        if let Some(first) = descriptors.first() {
            {
                let mut st = self.lock_state();
                st.current = Some(first.id.clone());
            }
            self.cache.record_access(&first.id);
            self.events.emit(CacheEvent::VideoChanged {
                id: first.id.clone(),
            });
            debug!(id = %first.id, "session started");
        }

        descriptors
    }

    /// Identifier of the active video, if any.
    pub fn current(&self) -> Option<String> {
        self.lock_state().current.clone()
    }

    /// Switch to another video with the default (progressive) strategy.
    pub async fn switch_to(self: &Arc<Self>, id: &str) -> CacheResult<VideoResource> {
        self.switch_to_with(id, LoadStrategy::Progressive).await
    }

    /// Switch the active video.
    ///
    /// Requests arriving inside the debounce window are rejected with
    /// [`CacheError::TransitionDebounced`] and dropped, not queued. An
    /// accepted transition records the access, emits `VideoChanged`, and
    /// schedules background preloads for the predicted next videos.
    pub async fn switch_to_with(
        self: &Arc<Self>,
        id: &str,
        strategy: LoadStrategy,
    ) -> CacheResult<VideoResource> {
        {
            let st = self.lock_state();
            if let Some(last) = st.last_transition {
                let elapsed = Instant::now().saturating_duration_since(last);
                if elapsed < self.min_transition_interval {
                    let remaining = self.min_transition_interval - elapsed;
                    trace!(id = id, ?remaining, "transition dropped (debounce)");
                    return Err(CacheError::TransitionDebounced { remaining });
                }
            }
        }

        let descriptor = self
            .resolver
            .by_filename(id)
            .await
            .ok_or_else(|| CacheError::UnknownVideo(id.to_string()))?;

        let resource = self.cache.get(id, &descriptor.url, strategy).await?;

        // A failed switch leaves the session untouched: the active video and
        // the debounce window are committed only once the resource is in hand.
        {
            let mut st = self.lock_state();
            st.last_transition = Some(Instant::now());
            st.current = Some(id.to_string());
        }
        // Cached hits were already recorded inside `get`.
        if !resource.is_cached() {
            self.cache.record_access(id);
        }

        self.events.emit(CacheEvent::VideoChanged { id: id.to_string() });
        self.preload_predicted(id);

        Ok(resource)
    }

    /// Kick background preloads for the most likely next videos.
    pub fn preload_predicted(self: &Arc<Self>, current_id: &str) {
        let session = Arc::clone(self);
        let current = current_id.to_string();
        tokio::spawn(async move {
            let predictions = session
                .cache
                .predict_next(&current, session.predicted_preload_count);
            trace!(current = %current, ?predictions, "scheduling predicted preloads");
            for id in predictions {
                if let Some(desc) = session.resolver.by_filename(&id).await {
                    session.cache.spawn_preload(&desc.id, &desc.url);
                }
            }
        });
    }

    /// The byte-level cache backing this session.
    pub fn cache(&self) -> &Arc<VideoCache> {
        &self.cache
    }

    /// The catalog resolver backing this session.
    pub fn resolver(&self) -> &Arc<CatalogResolver> {
        &self.resolver
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
