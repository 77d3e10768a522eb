//! Video catalog resolution.
//!
//! The catalog is a fixed, ordered list of known video identifiers. The
//! resolver turns each identifier into a playable URL, preferring the remote
//! object store and falling back to the local path convention
//! (`/videos/<file>`) when remote resolution fails. Each entry resolves or
//! falls back independently; the batch always yields exactly one descriptor
//! per entry, in catalog order.
//!
//! The resolver memoizes the first successful batch for the process lifetime
//! and shares one in-flight resolution among concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use crate::cache::VideoCache;
use crate::error::{CacheError, CacheResult};
use crate::fetch::ResourceFetcher;
use crate::settings::CacheSettings;
use crate::store::{HttpObjectStore, ObjectStore};

/// One entry of the build-time video catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Object key / filename, also the stable video identifier.
    pub file_key: String,
    /// Display name shown by the presentation layer.
    pub display_title: String,
    /// Presentation order.
    pub order_index: u32,
}

impl CatalogEntry {
    pub fn new(file_key: impl Into<String>, display_title: impl Into<String>, order_index: u32) -> Self {
        Self {
            file_key: file_key.into(),
            display_title: display_title.into(),
            order_index,
        }
    }
}

/// The known ambient videos, in presentation order.
pub fn default_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new("zen.mp4", "Garden", 1),
        CatalogEntry::new("forest.mp4", "Forest", 2),
        CatalogEntry::new("lake.mp4", "Lake", 3),
        CatalogEntry::new("campfire.mp4", "Campfire", 4),
    ]
}

/// A resolved, playable video asset. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoDescriptor {
    /// Stable identifier (the catalog file key).
    pub id: String,
    /// Display name.
    pub title: String,
    /// Resolved playable URL (remote or local fallback).
    pub url: String,
}

/// Result of probing a single asset for reachability.
#[derive(Clone, Debug)]
pub struct AssetProbe {
    /// URL the probe was issued against.
    pub url: String,
    /// Whether the asset answered with a success status.
    pub reachable: bool,
}

/// Resolves the fixed catalog to playable URLs, once per process.
pub struct CatalogResolver {
    catalog: Vec<CatalogEntry>,
    store: Option<Arc<dyn ObjectStore>>,
    local_fallback_prefix: String,
    prefer_signed_urls: bool,
    signed_url_expiry: Duration,

    // Memoized batch result; concurrent first callers share one resolution.
    resolved: OnceCell<Arc<Vec<VideoDescriptor>>>,
}

impl CatalogResolver {
    /// Create a resolver over `catalog`. `store` is the remote object store;
    /// `None` makes every entry resolve to its local fallback path.
    pub fn new(
        catalog: Vec<CatalogEntry>,
        store: Option<Arc<dyn ObjectStore>>,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            catalog,
            store,
            local_fallback_prefix: settings.local_fallback_prefix.clone(),
            prefer_signed_urls: settings.prefer_signed_urls,
            signed_url_expiry: settings.signed_url_expiry,
            resolved: OnceCell::new(),
        }
    }

    /// Create a resolver over the default catalog, backed by an HTTP object
    /// store rooted at `settings.public_base_url` when one is configured.
    ///
    /// Without a base URL every entry resolves to its local fallback path.
    pub fn from_settings(settings: &CacheSettings, fetcher: ResourceFetcher) -> Self {
        let store = settings
            .public_base_url
            .clone()
            .map(|base| Arc::new(HttpObjectStore::new(base, fetcher)) as Arc<dyn ObjectStore>);
        Self::new(default_catalog(), store, settings)
    }

    /// The catalog this resolver was built over.
    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    /// Resolve all catalog entries to descriptors, concurrently.
    ///
    /// The first call performs the batch; later (and concurrent) callers get
    /// the memoized result. Partial failures never abort the batch.
    pub async fn resolve(&self) -> Arc<Vec<VideoDescriptor>> {
        self.resolved
            .get_or_init(|| async {
                let futures = self.catalog.iter().map(|entry| self.resolve_entry(entry));
                let descriptors = join_all(futures).await;
                debug!(count = descriptors.len(), "catalog resolved");
                Arc::new(descriptors)
            })
            .await
            .clone()
    }

    /// Resolve the batch and warm the byte-level cache: the first entry is
    /// preloaded eagerly, the rest progressively in the background.
    ///
    /// Warmup failures are contained; the resolved batch is always returned.
    pub async fn resolve_with_warmup(&self, cache: &Arc<VideoCache>) -> Arc<Vec<VideoDescriptor>> {
        let descriptors = self.resolve().await;

        let mut iter = descriptors.iter();
        if let Some(first) = iter.next() {
            if let Err(e) = cache.preload(&first.id, &first.url).await {
                warn!(id = %first.id, "eager warmup failed: {}", e);
            }
        }
        for desc in iter {
            cache.spawn_preload(&desc.id, &desc.url);
        }

        descriptors
    }

    /// Exact-filename lookup against the resolved catalog.
    pub async fn by_filename(&self, filename: &str) -> Option<VideoDescriptor> {
        self.resolve()
            .await
            .iter()
            .find(|desc| desc.id == filename)
            .cloned()
    }

    /// Connectivity probe: HEAD-check one known asset and report boolean
    /// reachability. Probe errors read as unreachable.
    pub async fn probe_connectivity(&self) -> bool {
        let Some(entry) = self.catalog.first() else {
            return false;
        };
        match self.probe_asset(&entry.file_key).await {
            Ok(probe) => probe.reachable,
            Err(e) => {
                warn!("connectivity probe failed: {}", e);
                false
            }
        }
    }

    /// Probe a single asset: resolve its remote URL and HEAD-check it.
    pub async fn probe_asset(&self, filename: &str) -> CacheResult<AssetProbe> {
        let store = self
            .store
            .as_ref()
            .ok_or(CacheError::Unsupported("no remote object store configured"))?;
        let url = store.public_url(filename)?;
        let reachable = store.exists(filename).await?;
        Ok(AssetProbe {
            url: url.to_string(),
            reachable,
        })
    }

    // ----------------------------
    // Internals
    // ----------------------------

    async fn resolve_entry(&self, entry: &CatalogEntry) -> VideoDescriptor {
        match self.remote_url(&entry.file_key).await {
            Ok(url) => {
                trace!(id = %entry.file_key, url = %url, "resolved remote URL");
                VideoDescriptor {
                    id: entry.file_key.clone(),
                    title: entry.display_title.clone(),
                    url,
                }
            }
            Err(e) => {
                let fallback = format!("{}/{}", self.local_fallback_prefix, entry.file_key);
                warn!(
                    id = %entry.file_key,
                    fallback = %fallback,
                    "remote resolution failed, using local fallback: {}",
                    e
                );
                VideoDescriptor {
                    id: entry.file_key.clone(),
                    title: entry.display_title.clone(),
                    url: fallback,
                }
            }
        }
    }

    async fn remote_url(&self, key: &str) -> CacheResult<String> {
        let store = self
            .store
            .as_ref()
            .ok_or(CacheError::Unsupported("no remote object store configured"))?;

        let url = if self.prefer_signed_urls {
            store.signed_url(key, self.signed_url_expiry).await?
        } else {
            store.public_url(key)?
        };
        Ok(url.to_string())
    }
}
