//! Unified configuration for the `video-precache` crate.
//!
//! This structure flattens the configuration of every subsystem into a single
//! type, eliminating the need for separate fetcher/cache/partition config
//! structs across the crate.
//!
//! Included configuration domains:
//! - HTTP fetcher behavior (timeout, retries, backoff)
//! - Byte-level video cache behavior (capacity, access window, prediction)
//! - Catalog / object-store resolution (public base URL, local fallback,
//!   presigned URL expiry)
//! - Session behavior (transition debounce)
//! - Partitioned HTTP response cache (app prefix, version tag, trusted
//!   cross-origin hosts, critical-asset manifest)
//!
//! Notes:
//! - `public_base_url` is optional. When unset, catalog resolution always
//!   falls back to the local path convention (`/videos/<file>`), which keeps
//!   the library usable without any remote object store.

use std::time::Duration;

use url::Url;

/// Unified settings for video caching and delivery.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    // ----------------------------
    // HTTP fetcher
    // ----------------------------
    /// Timeout for a single HTTP attempt (request + body collection).
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Maximum number of retry attempts for failed requests.
    /// Default: 3 retries.
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries.
    /// Default: 100ms.
    pub retry_base_delay: Duration,

    /// Maximum backoff delay (cap for exponential growth).
    /// Default: 5 seconds.
    pub max_retry_delay: Duration,

    // ----------------------------
    // Byte-level video cache
    // ----------------------------
    /// Maximum number of entries retained by the video cache.
    /// Default: 5.
    pub cache_capacity: usize,

    /// Number of access events retained for pattern analysis.
    /// Default: 100.
    pub access_event_window: usize,

    /// Number of most recent access events scored for next-video prediction.
    /// Default: 20.
    pub prediction_window: usize,

    /// Number of predicted videos preloaded after each transition.
    /// Default: 2.
    pub predicted_preload_count: usize,

    /// Capacity of the bounded channel that captures background preload
    /// failures. Overflowing reports are dropped.
    /// Default: 32.
    pub preload_failure_capacity: usize,

    // ----------------------------
    // Catalog / object store
    // ----------------------------
    /// Public base URL of the remote object store. `None` disables remote
    /// resolution entirely and every catalog entry resolves to its local
    /// fallback path.
    pub public_base_url: Option<Url>,

    /// Local path prefix used when remote resolution fails.
    /// Default: `/videos`.
    pub local_fallback_prefix: String,

    /// Expiry for presigned object URLs.
    /// Default: 3600 seconds.
    pub signed_url_expiry: Duration,

    /// Prefer presigned URLs over public URLs during catalog resolution.
    /// Default: false.
    pub prefer_signed_urls: bool,

    // ----------------------------
    // Session
    // ----------------------------
    /// Minimum interval between accepted video transitions. Requests inside
    /// the window are rejected, not queued.
    /// Default: 300ms.
    pub min_transition_interval: Duration,

    /// Capacity of the broadcast event channel.
    /// Default: 16.
    pub event_channel_capacity: usize,

    // ----------------------------
    // Partitioned HTTP response cache
    // ----------------------------
    /// Application prefix for partition names (`<app>-<kind>-<version>`).
    /// Default: `wellness`.
    pub app_cache_prefix: String,

    /// Version tag of the current cache generation. Activation deletes any
    /// partition of this app with a different version.
    /// Default: `v1`.
    pub cache_version: String,

    /// Origin used for same-origin request qualification.
    /// Default: `http://localhost`.
    pub origin: Url,

    /// Trusted cross-origin hosts, matched by host suffix.
    pub trusted_hosts: Vec<String>,

    /// Critical assets precached at install time. Same-origin paths are
    /// inserted as one all-or-nothing batch; absolute cross-origin URLs are
    /// fetched individually and failures are logged, not fatal.
    pub critical_assets: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),

            cache_capacity: 5,
            access_event_window: 100,
            prediction_window: 20,
            predicted_preload_count: 2,
            preload_failure_capacity: 32,

            public_base_url: None,
            local_fallback_prefix: "/videos".to_string(),
            signed_url_expiry: Duration::from_secs(3600),
            prefer_signed_urls: false,

            min_transition_interval: Duration::from_millis(300),
            event_channel_capacity: 16,

            app_cache_prefix: "wellness".to_string(),
            cache_version: "v1".to_string(),
            origin: Url::parse("http://localhost").expect("static origin"),
            trusted_hosts: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
                "unpkg.com".to_string(),
                "cdn.jsdelivr.net".to_string(),
            ],
            critical_assets: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/assets/icons/ripple.svg".to_string(),
                "/assets/icons/mindfulness.svg".to_string(),
                "/assets/icons/sine.svg".to_string(),
                "https://fonts.googleapis.com/css2?family=Source+Sans+Pro:wght@300;400;600;700&display=swap"
                    .to_string(),
            ],
        }
    }
}

impl CacheSettings {
    // -------------------------
    // Constructors
    // -------------------------

    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings tuned for constrained networks: shorter timeouts, more
    /// aggressive retries, a smaller cache.
    pub fn constrained(mut self) -> Self {
        self.request_timeout = Duration::from_secs(15);
        self.max_retries = 5;
        self.retry_base_delay = Duration::from_millis(50);
        self.max_retry_delay = Duration::from_secs(3);
        self.cache_capacity = 3;
        self.predicted_preload_count = 1;
        self
    }

    // -------------------------
    // Fetcher setters
    // -------------------------

    pub fn request_timeout(mut self, v: Duration) -> Self {
        self.request_timeout = v;
        self
    }

    pub fn max_retries(mut self, v: u32) -> Self {
        self.max_retries = v;
        self
    }

    pub fn retry_base_delay(mut self, v: Duration) -> Self {
        self.retry_base_delay = v;
        self
    }

    pub fn max_retry_delay(mut self, v: Duration) -> Self {
        self.max_retry_delay = v;
        self
    }

    // -------------------------
    // Video cache setters
    // -------------------------

    pub fn cache_capacity(mut self, v: usize) -> Self {
        self.cache_capacity = v;
        self
    }

    pub fn access_event_window(mut self, v: usize) -> Self {
        self.access_event_window = v;
        self
    }

    pub fn prediction_window(mut self, v: usize) -> Self {
        self.prediction_window = v;
        self
    }

    pub fn predicted_preload_count(mut self, v: usize) -> Self {
        self.predicted_preload_count = v;
        self
    }

    pub fn preload_failure_capacity(mut self, v: usize) -> Self {
        self.preload_failure_capacity = v;
        self
    }

    // -------------------------
    // Catalog / store setters
    // -------------------------

    pub fn public_base_url(mut self, v: Option<Url>) -> Self {
        self.public_base_url = v;
        self
    }

    pub fn local_fallback_prefix(mut self, v: impl Into<String>) -> Self {
        self.local_fallback_prefix = v.into();
        self
    }

    pub fn signed_url_expiry(mut self, v: Duration) -> Self {
        self.signed_url_expiry = v;
        self
    }

    pub fn prefer_signed_urls(mut self, v: bool) -> Self {
        self.prefer_signed_urls = v;
        self
    }

    // -------------------------
    // Session setters
    // -------------------------

    pub fn min_transition_interval(mut self, v: Duration) -> Self {
        self.min_transition_interval = v;
        self
    }

    pub fn event_channel_capacity(mut self, v: usize) -> Self {
        self.event_channel_capacity = v;
        self
    }

    // -------------------------
    // HTTP cache setters
    // -------------------------

    pub fn app_cache_prefix(mut self, v: impl Into<String>) -> Self {
        self.app_cache_prefix = v.into();
        self
    }

    pub fn cache_version(mut self, v: impl Into<String>) -> Self {
        self.cache_version = v.into();
        self
    }

    pub fn origin(mut self, v: Url) -> Self {
        self.origin = v;
        self
    }

    pub fn trusted_hosts(mut self, v: Vec<String>) -> Self {
        self.trusted_hosts = v;
        self
    }

    pub fn critical_assets(mut self, v: Vec<String>) -> Self {
        self.critical_assets = v;
        self
    }
}
