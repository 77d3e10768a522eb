//! Byte-level video cache with predictive preloading.
//!
//! Retains fully fetched video payloads in memory, bounded by entry count,
//! and predicts which video will be wanted next from the observed access
//! sequence.
//!
//! Invariants
//! ----------
//! - At most one network fetch is outstanding per identifier: concurrent
//!   callers share the same in-flight fetch future.
//! - An entry is "ready" only when its payload is present and no fetch is in
//!   flight; entries with an in-flight fetch are never eviction candidates.
//! - Mutation safety relies on never holding the state lock across an await
//!   and re-checking entry existence right before acting, since evictions
//!   and insertions interleave across suspension points.
//!
//! Eviction ranks ready entries by a composite priority score
//! (`access_count * 2 + 1000 / (age_ms + 1) + sequential_probability * 3`,
//! higher is kept longer) and removes the lowest-scoring entries until the
//! cache is back at capacity.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, EventChannel};
use crate::fetch::ResourceFetcher;
use crate::settings::CacheSettings;

/// Retrieval behavior selected by caller intent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Block until the payload is fully fetched and cached.
    Eager,
    /// Return the raw URL immediately; the consumer streams it itself.
    Lazy,
    /// Return the raw URL immediately while filling the cache in the
    /// background.
    #[default]
    Progressive,
}

impl LoadStrategy {
    /// Parse a strategy name. Unknown names fall back to progressive.
    pub fn parse(name: &str) -> Self {
        match name {
            "eager" => LoadStrategy::Eager,
            "lazy" => LoadStrategy::Lazy,
            "progressive" => LoadStrategy::Progressive,
            other => {
                trace!(name = other, "unknown loading strategy, using progressive");
                LoadStrategy::Progressive
            }
        }
    }
}

/// A locally usable video resource returned by [`VideoCache::get`].
#[derive(Clone, Debug)]
pub enum VideoResource {
    /// The payload is resident in the cache.
    Cached(Bytes),
    /// Not cached (yet); play directly from this URL.
    Remote(String),
}

impl VideoResource {
    /// Whether this resource is backed by a cached payload.
    pub fn is_cached(&self) -> bool {
        matches!(self, VideoResource::Cached(_))
    }
}

/// A background preload failure captured for observability.
#[derive(Clone, Debug)]
pub struct PreloadFailure {
    /// Video identifier that failed to preload.
    pub id: String,
    /// Failure description.
    pub reason: String,
}

/// Snapshot of cache occupancy for debug logging.
#[derive(Clone, Debug)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub access_events: usize,
    pub ids: Vec<String>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, Arc<CacheError>>>>;

struct CacheEntry {
    #[allow(dead_code)]
    url: String,
    payload: Option<Bytes>,
    #[allow(dead_code)]
    loaded_at: Instant,
    access_count: u64,
    last_accessed_at: Instant,
    in_flight: Option<SharedFetch>,
}

/// Append-only access record used purely for pattern prediction.
struct AccessEvent {
    video_id: String,
    #[allow(dead_code)]
    access_time: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    // Identifier insertion order; drives the stable tie-break in prediction.
    known_order: Vec<String>,
    access_events: VecDeque<AccessEvent>,
}

impl CacheInner {
    fn register_known(&mut self, id: &str) {
        if !self.known_order.iter().any(|known| known == id) {
            self.known_order.push(id.to_string());
        }
    }

    /// Most recent events scored for prediction.
    fn prediction_slice(&self, window: usize) -> Vec<&str> {
        let skip = self.access_events.len().saturating_sub(window);
        self.access_events
            .iter()
            .skip(skip)
            .map(|e| e.video_id.as_str())
            .collect()
    }

    /// Fraction of the prediction window occupied by `from -> to` pairs.
    fn transition_probability(&self, window: usize, from: &str, to: &str) -> f64 {
        let events = self.prediction_slice(window);
        if events.is_empty() {
            return 0.0;
        }
        let pairs = events
            .windows(2)
            .filter(|pair| pair[0] == from && pair[1] == to)
            .count();
        pairs as f64 / events.len() as f64
    }

    /// Strongest outgoing transition probability for `from`; used by the
    /// eviction score as "how likely is this video the next one".
    fn sequential_probability(&self, window: usize, from: &str) -> f64 {
        let events = self.prediction_slice(window);
        if events.is_empty() {
            return 0.0;
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for pair in events.windows(2) {
            if pair[0] == from {
                *counts.entry(pair[1]).or_default() += 1;
            }
        }
        let max = counts.values().copied().max().unwrap_or(0);
        max as f64 / events.len() as f64
    }

    fn priority_score(&self, window: usize, id: &str, entry: &CacheEntry, now: Instant) -> f64 {
        let age_ms = now.saturating_duration_since(entry.last_accessed_at).as_millis() as f64;
        let probability = self.sequential_probability(window, id);
        entry.access_count as f64 * 2.0 + 1000.0 / (age_ms + 1.0) + probability * 3.0
    }
}

/// In-memory, process-wide video payload cache.
///
/// Constructed explicitly and shared by `Arc`; one instance per process is
/// the intended lifecycle, torn down only via [`VideoCache::clear`].
pub struct VideoCache {
    fetcher: ResourceFetcher,
    events: EventChannel,

    capacity: usize,
    access_event_window: usize,
    prediction_window: usize,

    inner: Mutex<CacheInner>,

    failure_tx: mpsc::Sender<PreloadFailure>,
    failure_rx: Mutex<Option<mpsc::Receiver<PreloadFailure>>>,
}

impl VideoCache {
    /// Create a cache using the crate settings, fetcher, and event channel.
    pub fn new(settings: &CacheSettings, fetcher: ResourceFetcher, events: EventChannel) -> Self {
        let (failure_tx, failure_rx) = mpsc::channel(settings.preload_failure_capacity.max(1));
        Self {
            fetcher,
            events,
            capacity: settings.cache_capacity.max(1),
            access_event_window: settings.access_event_window.max(1),
            prediction_window: settings.prediction_window.max(2),
            inner: Mutex::new(CacheInner::default()),
            failure_tx,
            failure_rx: Mutex::new(Some(failure_rx)),
        }
    }

    /// Take the receiving end of the bounded preload-failure channel.
    ///
    /// Returns `None` after the first call.
    pub fn take_failure_reports(&self) -> Option<mpsc::Receiver<PreloadFailure>> {
        self.lock_failure_rx().take()
    }

    /// Fetch and retain the payload for `id`, idempotently.
    ///
    /// If an entry already exists (ready or in-flight) this returns
    /// immediately. Otherwise exactly one network fetch is started; on
    /// success the payload is stored and eviction runs, on failure the
    /// partial entry is removed and the error is returned to this (direct)
    /// caller only.
    pub async fn preload(&self, id: &str, url: &str) -> CacheResult<()> {
        match self.begin_fetch(id, url) {
            Some(shared) => self.finish_fetch(id, shared).await,
            None => Ok(()),
        }
    }

    /// Fire-and-forget preload. Failures are reported through the bounded
    /// failure channel instead of being surfaced to the caller.
    ///
    /// The entry and its shared fetch are registered before this returns, so
    /// a caller that asks for `id` right afterwards joins the in-flight fetch
    /// instead of starting its own.
    pub fn spawn_preload(self: &Arc<Self>, id: &str, url: &str) {
        let Some(shared) = self.begin_fetch(id, url) else {
            return;
        };
        let cache = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.finish_fetch(&id, shared).await {
                let report = PreloadFailure {
                    id: id.clone(),
                    reason: e.to_string(),
                };
                if cache.failure_tx.try_send(report).is_err() {
                    trace!(id = %id, "preload failure channel full, report dropped");
                }
            }
        });
    }

    /// Insert a fresh in-flight entry for `id` and return its shared fetch,
    /// or `None` if an entry (ready or in flight) already exists.
    fn begin_fetch(&self, id: &str, url: &str) -> Option<SharedFetch> {
        let mut inner = self.lock_inner();
        if inner.entries.contains_key(id) {
            trace!(id = id, "preload: entry exists, nothing to do");
            return None;
        }

        let fetcher = self.fetcher.clone();
        let fetch_url = url.to_string();
        let fut: BoxFuture<'static, Result<Bytes, Arc<CacheError>>> =
            async move { fetcher.fetch_bytes(&fetch_url).await.map_err(Arc::new) }.boxed();
        let shared = fut.shared();

        let now = Instant::now();
        inner.register_known(id);
        inner.entries.insert(
            id.to_string(),
            CacheEntry {
                url: url.to_string(),
                payload: None,
                loaded_at: now,
                access_count: 0,
                last_accessed_at: now,
                in_flight: Some(shared.clone()),
            },
        );
        trace!(id = id, url = url, "preload: fetch started");
        Some(shared)
    }

    /// Await a fetch started by [`Self::begin_fetch`], promote or remove the
    /// entry, and emit the load event.
    async fn finish_fetch(&self, id: &str, shared: SharedFetch) -> CacheResult<()> {
        match shared.await {
            Ok(bytes) => {
                {
                    let mut inner = self.lock_inner();
                    // The entry may have been cleared while the fetch was in
                    // flight; only promote it if it still exists.
                    if let Some(entry) = inner.entries.get_mut(id) {
                        entry.payload = Some(bytes);
                        entry.in_flight = None;
                        entry.loaded_at = Instant::now();
                    }
                    self.evict_locked(&mut inner);
                }
                trace!(id = id, "preload: payload stored");
                self.events.emit(CacheEvent::VideoLoaded { id: id.to_string() });
                Ok(())
            }
            Err(e) => {
                {
                    let mut inner = self.lock_inner();
                    // Remove only if the entry is still the failed in-flight
                    // one; a ready payload must not be discarded.
                    if inner
                        .entries
                        .get(id)
                        .is_some_and(|entry| entry.payload.is_none())
                    {
                        inner.entries.remove(id);
                    }
                }
                warn!(id = id, "preload failed: {}", e);
                self.events.emit(CacheEvent::VideoLoadFailed {
                    id: id.to_string(),
                    reason: e.to_string(),
                });
                Err(CacheError::msg(format!("preload failed for {id}: {e}")))
            }
        }
    }

    /// Return a locally usable resource for `id`.
    ///
    /// Cached and ready: record an access and return the payload. In flight:
    /// await the same fetch. Absent: delegate to `strategy`.
    pub async fn get(
        self: &Arc<Self>,
        id: &str,
        url: &str,
        strategy: LoadStrategy,
    ) -> CacheResult<VideoResource> {
        if let Some(res) = self.await_existing(id).await {
            return res.map(VideoResource::Cached);
        }

        match strategy {
            LoadStrategy::Eager => {
                self.preload(id, url).await?;
                match self.await_existing(id).await {
                    Some(res) => res.map(VideoResource::Cached),
                    // Evicted between store and read; degrade to direct playback.
                    None => Ok(VideoResource::Remote(url.to_string())),
                }
            }
            LoadStrategy::Lazy => Ok(VideoResource::Remote(url.to_string())),
            LoadStrategy::Progressive => {
                self.spawn_preload(id, url);
                Ok(VideoResource::Remote(url.to_string()))
            }
        }
    }

    /// Record an access for `id`: bump counters, append an access event, and
    /// trim the event window.
    pub fn record_access(&self, id: &str) {
        let mut inner = self.lock_inner();
        inner.register_known(id);
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.access_count += 1;
            entry.last_accessed_at = Instant::now();
        }
        inner.access_events.push_back(AccessEvent {
            video_id: id.to_string(),
            access_time: Instant::now(),
        });
        while inner.access_events.len() > self.access_event_window {
            inner.access_events.pop_front();
        }
    }

    /// Predict the most likely next videos after `current_id`.
    ///
    /// Every known identifier other than `current_id` is scored by its
    /// sequential transition probability over the recent event window;
    /// the top `count` are returned in descending order, ties broken by
    /// identifier insertion order.
    pub fn predict_next(&self, current_id: &str, count: usize) -> Vec<String> {
        let inner = self.lock_inner();
        let mut scored: Vec<(String, f64)> = inner
            .known_order
            .iter()
            .filter(|id| id.as_str() != current_id)
            .map(|id| {
                let p = inner.transition_probability(self.prediction_window, current_id, id);
                (id.clone(), p)
            })
            .collect();

        // Stable sort keeps insertion order among equal probabilities.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(count);
        scored.into_iter().map(|(id, _)| id).collect()
    }

    /// Release all payloads and empty the cache. Debug/reset flows only.
    pub fn clear(&self) {
        let mut inner = self.lock_inner();
        let dropped = inner.entries.len();
        inner.entries.clear();
        trace!(dropped, "cache cleared");
    }

    /// Occupancy snapshot.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock_inner();
        let ids = inner
            .known_order
            .iter()
            .filter(|id| inner.entries.contains_key(id.as_str()))
            .cloned()
            .collect();
        CacheStats {
            len: inner.entries.len(),
            capacity: self.capacity,
            access_events: inner.access_events.len(),
            ids,
        }
    }

    /// Number of resident entries (ready or in flight).
    pub fn len(&self) -> usize {
        self.lock_inner().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ----------------------------
    // Internals
    // ----------------------------

    /// Resolve an existing entry: `Some(Ok(payload))` for ready or
    /// successfully awaited in-flight entries (recording an access),
    /// `Some(Err(..))` if the shared fetch failed, `None` if absent.
    async fn await_existing(&self, id: &str) -> Option<CacheResult<Bytes>> {
        enum Existing {
            Ready(Bytes),
            InFlight(SharedFetch),
            Absent,
        }

        let state = {
            let inner = self.lock_inner();
            match inner.entries.get(id) {
                Some(entry) => match (&entry.payload, &entry.in_flight) {
                    (Some(bytes), None) => Existing::Ready(bytes.clone()),
                    (_, Some(shared)) => Existing::InFlight(shared.clone()),
                    (None, None) => Existing::Absent,
                },
                None => Existing::Absent,
            }
        };

        match state {
            Existing::Ready(bytes) => {
                self.record_access(id);
                trace!(id = id, "cache HIT");
                Some(Ok(bytes))
            }
            Existing::InFlight(pending) => {
                trace!(id = id, "cache WAIT (fetch in flight)");
                match pending.await {
                    Ok(bytes) => {
                        self.record_access(id);
                        Some(Ok(bytes))
                    }
                    Err(e) => Some(Err(CacheError::msg(e.to_string()))),
                }
            }
            Existing::Absent => None,
        }
    }

    fn evict_locked(&self, inner: &mut CacheInner) {
        let overflow = inner.entries.len().saturating_sub(self.capacity);
        if overflow == 0 {
            return;
        }

        let now = Instant::now();
        let mut scored: Vec<(String, f64)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.in_flight.is_none())
            .map(|(id, entry)| {
                (
                    id.clone(),
                    inner.priority_score(self.prediction_window, id, entry, now),
                )
            })
            .collect();

        // Lowest score evicted first; in-flight entries are never candidates.
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        for (id, score) in scored.into_iter().take(overflow) {
            trace!(id = %id, score, "evicting entry");
            // Dropping the entry releases its payload.
            inner.entries.remove(&id);
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn lock_failure_rx(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<mpsc::Receiver<PreloadFailure>>> {
        self.failure_rx
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_strategy_falls_back_to_progressive() {
        assert_eq!(LoadStrategy::parse("eager"), LoadStrategy::Eager);
        assert_eq!(LoadStrategy::parse("lazy"), LoadStrategy::Lazy);
        assert_eq!(LoadStrategy::parse("progressive"), LoadStrategy::Progressive);
        assert_eq!(LoadStrategy::parse("warp-speed"), LoadStrategy::Progressive);
    }

    #[test]
    fn transition_probability_counts_pairs_over_window() {
        let mut inner = CacheInner::default();
        for id in ["a", "b", "a", "b", "a", "c"] {
            inner.access_events.push_back(AccessEvent {
                video_id: id.to_string(),
                access_time: Instant::now(),
            });
        }
        // Two a->b pairs out of a window of six events.
        let p_ab = inner.transition_probability(20, "a", "b");
        let p_ac = inner.transition_probability(20, "a", "c");
        assert!((p_ab - 2.0 / 6.0).abs() < f64::EPSILON);
        assert!((p_ac - 1.0 / 6.0).abs() < f64::EPSILON);
        assert!(p_ab > p_ac);
    }

    #[test]
    fn sequential_probability_takes_strongest_transition() {
        let mut inner = CacheInner::default();
        for id in ["a", "b", "a", "c", "a", "b"] {
            inner.access_events.push_back(AccessEvent {
                video_id: id.to_string(),
                access_time: Instant::now(),
            });
        }
        // a->b twice, a->c once; strongest is 2/6.
        let p = inner.sequential_probability(20, "a");
        assert!((p - 2.0 / 6.0).abs() < f64::EPSILON);
        assert_eq!(inner.sequential_probability(20, "b"), 1.0 / 6.0);
    }
}
