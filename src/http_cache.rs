//! Service-level HTTP response cache.
//!
//! A worker that intercepts page-level GET requests and applies one of three
//! caching strategies depending on resource class, independent of the
//! byte-level video cache:
//!
//! - *cache-first* for static assets (with a non-blocking background refresh
//!   for fonts and icons),
//! - *stale-while-revalidate* for bundle chunks and dynamic modules,
//! - *network-first* for HTML-like resources, with stored-copy fallback and a
//!   synthetic offline response as the last resort.
//!
//! Lifecycle: installing -> activating -> active. Install precaches the
//! critical-asset manifest (same-origin paths as one all-or-nothing batch,
//! cross-origin fonts individually, best-effort); after population the
//! worker immediately supersedes any waiting predecessor. Activation deletes
//! partitions of this app whose parsed version differs from the running one,
//! then the worker serves requests.
//!
//! A command channel carries page-side requests: force-activate, clear all
//! partitions, and cache-assets-on-demand, the latter two reporting
//! completion through a reply port.

use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::fetch::ResourceFetcher;
use crate::partition::{CachedHttpResponse, PartitionKind, PartitionName, PartitionStorage};
use crate::settings::CacheSettings;

/// Lifecycle state of the cache worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Activating,
    Active,
}

/// Commands accepted over the worker's message channel.
#[derive(Debug)]
pub enum CacheCommand {
    /// Stop waiting and activate immediately.
    SkipWaiting,
    /// Delete every partition belonging to this app.
    ClearCache {
        /// Completion reply; `true` on success.
        reply: oneshot::Sender<bool>,
    },
    /// Fetch the given URLs and insert them into the dynamic partition.
    /// Individual failures are logged and skipped.
    CacheAssets {
        assets: Vec<String>,
        /// Completion reply; `true` on success.
        reply: oneshot::Sender<bool>,
    },
}

/// Result of routing one intercepted request.
#[derive(Clone, Debug)]
pub enum Served {
    /// The worker produced a response (cached, fetched, or synthetic).
    Response(CachedHttpResponse),
    /// The request is not intercepted; the caller talks to the network
    /// directly.
    PassThrough,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResourceClass {
    /// Bundle chunk or dynamic module: stale-while-revalidate.
    Chunk,
    /// Static asset: cache-first.
    Static,
    /// HTML-like: network-first.
    Html,
    /// Qualifying but unclassified: network only, no caching.
    Other,
}

/// Partitioned HTTP cache worker.
///
/// Cheap to clone; clones share storage and lifecycle state, so one clone can
/// run the command loop while others serve intercepted requests.
#[derive(Clone)]
pub struct HttpCacheWorker {
    app: String,
    version: String,
    origin: Url,
    trusted_hosts: Vec<String>,
    critical_assets: Vec<String>,
    storage: PartitionStorage,
    fetcher: ResourceFetcher,
    state: Arc<Mutex<WorkerState>>,
}

impl HttpCacheWorker {
    /// Create a worker in the installing state.
    pub fn new(settings: &CacheSettings, fetcher: ResourceFetcher, storage: PartitionStorage) -> Self {
        Self {
            app: settings.app_cache_prefix.clone(),
            version: settings.cache_version.clone(),
            origin: settings.origin.clone(),
            trusted_hosts: settings.trusted_hosts.clone(),
            critical_assets: settings.critical_assets.clone(),
            storage,
            fetcher,
            state: Arc::new(Mutex::new(WorkerState::Installing)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Shared response storage.
    pub fn storage(&self) -> &PartitionStorage {
        &self.storage
    }

    /// Rendered name of one of this worker's partitions.
    pub fn partition(&self, kind: PartitionKind) -> String {
        PartitionName::new(self.app.clone(), kind, self.version.clone()).to_string()
    }

    // ----------------------------
    // Lifecycle
    // ----------------------------

    /// Populate the static partition from the critical-asset manifest.
    ///
    /// Same-origin paths are fetched concurrently and inserted only if every
    /// fetch succeeded (all-or-nothing batch). Cross-origin assets are
    /// fetched individually; their failures are logged, not fatal. On
    /// success the worker supersedes any waiting predecessor immediately and
    /// moves to activating.
    pub async fn install(&self) -> CacheResult<()> {
        debug!(app = %self.app, version = %self.version, "installing cache worker");
        let partition = self.partition(PartitionKind::Static);
        self.storage.open(&partition);

        let (local, external): (Vec<&String>, Vec<&String>) = self
            .critical_assets
            .iter()
            .partition(|asset| asset.starts_with('/'));

        // All-or-nothing batch for same-origin assets: fetch everything
        // concurrently first, insert only when the whole batch succeeded.
        let fetches = local.into_iter().map(|asset| async move {
            let url = self
                .origin
                .join(asset)
                .map_err(CacheError::url_parse)?
                .to_string();
            let resp = self
                .fetcher
                .fetch_response(&url, &[])
                .await
                .map_err(|e| e.with_context("precaching critical asset"))?;
            if !resp.is_success() {
                return Err(CacheError::HttpStatus {
                    status: resp.status,
                    url,
                });
            }
            Ok((url, CachedHttpResponse::from(resp)))
        });
        let mut batch = Vec::with_capacity(self.critical_assets.len());
        for fetched in join_all(fetches).await {
            batch.push(fetched?);
        }
        for (url, resp) in batch {
            self.storage.put(&partition, &url, resp);
        }

        // Cross-origin fonts and CDN assets: individually, best-effort.
        for asset in external {
            match self.fetcher.fetch_response(asset, &[]).await {
                Ok(resp) if resp.is_success() => {
                    self.storage.put(&partition, asset, resp.into());
                }
                Ok(resp) => {
                    warn!(url = %asset, status = resp.status, "skipping cross-origin asset");
                }
                Err(e) => {
                    warn!(url = %asset, "failed to precache cross-origin asset: {}", e);
                }
            }
        }

        // No waiting phase: the freshly installed worker takes over at once.
        self.set_state(WorkerState::Activating);
        debug!("cache worker installed");
        Ok(())
    }

    /// Delete partitions of this app with a stale version, open the current
    /// generation, and start serving.
    pub async fn activate(&self) -> CacheResult<()> {
        debug!(version = %self.version, "activating cache worker");
        for name in self.storage.partition_names() {
            if let Some(parsed) = PartitionName::parse(&name, &self.app) {
                if parsed.version != self.version {
                    trace!(partition = %name, "deleting stale partition");
                    self.storage.delete_partition(&name);
                }
            }
        }
        for kind in PartitionKind::ALL {
            self.storage.open(&self.partition(kind));
        }
        self.set_state(WorkerState::Active);
        debug!("cache worker active");
        Ok(())
    }

    /// Convenience: install then activate.
    pub async fn install_and_activate(&self) -> CacheResult<()> {
        self.install().await?;
        self.activate().await
    }

    // ----------------------------
    // Fetch interception
    // ----------------------------

    /// Route one intercepted request.
    ///
    /// Only GET requests over http(s) to the own origin or a trusted host are
    /// considered; everything else (and any request before activation) passes
    /// through untouched.
    pub async fn handle_request(&self, method: &str, url: &str) -> CacheResult<Served> {
        if !method.eq_ignore_ascii_case("GET") {
            return Ok(Served::PassThrough);
        }
        if self.state() != WorkerState::Active {
            return Ok(Served::PassThrough);
        }

        let parsed = Url::parse(url).map_err(CacheError::url_parse)?;
        if !self.qualifies(&parsed) {
            return Ok(Served::PassThrough);
        }

        let class = Self::classify(&parsed);
        trace!(url = url, class = ?class, "routing intercepted request");
        let response = match class {
            ResourceClass::Chunk => self.stale_while_revalidate(url).await?,
            ResourceClass::Static => self.cache_first(url).await?,
            ResourceClass::Html => self.network_first(url).await?,
            ResourceClass::Other => self.fetcher.fetch_response(url, &[]).await?.into(),
        };
        Ok(Served::Response(response))
    }

    fn qualifies(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        if url.origin() == self.origin.origin() {
            return true;
        }
        let Some(host) = url.host_str() else {
            return false;
        };
        self.trusted_hosts
            .iter()
            .any(|trusted| host == trusted || host.ends_with(&format!(".{trusted}")))
    }

    fn classify(url: &Url) -> ResourceClass {
        let path = url.path();

        // Bundle chunks are matched before the generic static-extension rule
        // so hashed JS under /assets/ revalidates instead of sticking.
        if (path.contains("/assets/") && path.ends_with(".js")) || path.contains("/chunks/") {
            return ResourceClass::Chunk;
        }

        const STATIC_EXTENSIONS: [&str; 10] = [
            ".css", ".js", ".woff", ".woff2", ".ttf", ".svg", ".png", ".jpg", ".jpeg", ".webp",
        ];
        let font_host = url.host_str().is_some_and(|h| h.starts_with("fonts.g"));
        if STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            || path.contains("/assets/")
            || font_host
        {
            return ResourceClass::Static;
        }

        let last_segment = path.rsplit('/').next().unwrap_or("");
        if path.ends_with(".html") || path == "/" || !last_segment.contains('.') {
            return ResourceClass::Html;
        }

        ResourceClass::Other
    }

    // ----------------------------
    // Strategies
    // ----------------------------

    /// Cached copy if present (with a background refresh for fonts/icons);
    /// otherwise fetch, cache on success, and return. Any internal error
    /// degrades to an uncached network fetch.
    async fn cache_first(&self, url: &str) -> CacheResult<CachedHttpResponse> {
        let partition = self.partition(PartitionKind::Static);

        if let Some(hit) = self.storage.get(&partition, url) {
            if Self::should_refresh_in_background(url) {
                self.spawn_refresh(partition, url.to_string());
            }
            return Ok(hit);
        }

        match self.fetch_and_store(&partition, url).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                warn!(url = url, "cache-first failed, uncached network fallback: {}", e);
                Ok(self.fetcher.fetch_response(url, &[]).await?.into())
            }
        }
    }

    /// Always refresh in the background; serve the cached copy immediately
    /// when present, otherwise wait on the refresh (synthetic 408 if the
    /// network fetch itself rejects).
    async fn stale_while_revalidate(&self, url: &str) -> CacheResult<CachedHttpResponse> {
        let partition = self.partition(PartitionKind::Dynamic);

        let refresh = {
            let worker = self.clone();
            let partition = partition.clone();
            let url = url.to_string();
            tokio::spawn(async move { worker.fetch_and_store(&partition, &url).await })
        };

        if let Some(hit) = self.storage.get(&partition, url) {
            // The refresh task keeps running; we do not wait on it.
            return Ok(hit);
        }

        match refresh.await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => {
                warn!(url = url, "revalidation fetch failed: {}", e);
                Ok(CachedHttpResponse::request_timeout())
            }
            Err(e) => {
                warn!(url = url, "revalidation task failed: {}", e);
                Ok(CachedHttpResponse::request_timeout())
            }
        }
    }

    /// Network with cache-busting headers first; cache and return on
    /// success. On any failure (including non-success status) fall back to a
    /// stored copy, else a synthetic 503 offline response.
    async fn network_first(&self, url: &str) -> CacheResult<CachedHttpResponse> {
        let partition = self.partition(PartitionKind::Dynamic);

        match self
            .fetcher
            .fetch_response(url, &[("cache-control", "no-cache")])
            .await
        {
            Ok(resp) if resp.is_success() => {
                let cached = CachedHttpResponse::from(resp);
                self.storage.put(&partition, url, cached.clone());
                Ok(cached)
            }
            Ok(resp) => {
                warn!(url = url, status = resp.status, "network-first got non-success, trying cache");
                Ok(self.cached_or_offline(&partition, url))
            }
            Err(e) => {
                warn!(url = url, "network-first fetch failed, trying cache: {}", e);
                Ok(self.cached_or_offline(&partition, url))
            }
        }
    }

    fn cached_or_offline(&self, partition: &str, url: &str) -> CachedHttpResponse {
        self.storage
            .get(partition, url)
            .unwrap_or_else(CachedHttpResponse::offline)
    }

    /// Fetch `url` and store it in `partition` when the status is a success.
    /// The response is returned either way.
    async fn fetch_and_store(&self, partition: &str, url: &str) -> CacheResult<CachedHttpResponse> {
        let resp = self.fetcher.fetch_response(url, &[]).await?;
        let cached = CachedHttpResponse::from(resp);
        if cached.is_success() {
            self.storage.put(partition, url, cached.clone());
        }
        Ok(cached)
    }

    fn should_refresh_in_background(url: &str) -> bool {
        url.contains("font") || url.contains("icon")
    }

    fn spawn_refresh(&self, partition: String, url: String) {
        let worker = self.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.fetch_and_store(&partition, &url).await {
                trace!(url = %url, "background refresh failed: {}", e);
            }
        });
    }

    // ----------------------------
    // Command channel
    // ----------------------------

    /// Serve commands until the channel closes or `cancel` fires.
    pub async fn run(self, mut commands: mpsc::Receiver<CacheCommand>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
            }
        }
        debug!("cache worker command loop stopped");
    }

    async fn handle_command(&self, command: CacheCommand) {
        match command {
            CacheCommand::SkipWaiting => {
                if self.state() != WorkerState::Active {
                    if let Err(e) = self.activate().await {
                        warn!("forced activation failed: {}", e);
                    }
                }
            }
            CacheCommand::ClearCache { reply } => {
                self.clear_all_partitions();
                let _ = reply.send(true);
            }
            CacheCommand::CacheAssets { assets, reply } => {
                self.cache_assets(&assets).await;
                let _ = reply.send(true);
            }
        }
    }

    /// Delete every partition belonging to this app, any version.
    pub fn clear_all_partitions(&self) {
        for name in self.storage.partition_names() {
            if PartitionName::parse(&name, &self.app).is_some() {
                self.storage.delete_partition(&name);
            }
        }
    }

    /// Fetch and insert the given URLs into the dynamic partition.
    /// Individual failures are logged and skipped.
    pub async fn cache_assets(&self, assets: &[String]) {
        let partition = self.partition(PartitionKind::Dynamic);
        for asset in assets {
            match self.fetcher.fetch_response(asset, &[]).await {
                Ok(resp) if resp.is_success() => {
                    self.storage.put(&partition, asset, resp.into());
                }
                Ok(resp) => {
                    warn!(url = %asset, status = resp.status, "skipping on-demand asset");
                }
                Err(e) => {
                    warn!(url = %asset, "failed to cache on-demand asset: {}", e);
                }
            }
        }
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(|poison| poison.into_inner()) = state;
    }
}
