//! Client-side video caching and delivery.
//!
//! This crate makes video playback feel instant by combining two independent
//! caching layers:
//! - a byte-level video cache with priority-scored eviction and sequential
//!   access prediction, fed by a fixed catalog of known videos resolved
//!   against a remote object store (with local fallback), and
//! - a partitioned HTTP response cache applying cache-first,
//!   stale-while-revalidate, and network-first strategies per resource
//!   class, with versioned generational cleanup.
//!
//! This crate is composed of several modules:
//! - `settings`: Unified configuration with builder setters.
//! - `error`: Unified error types.
//! - `fetch`: HTTP fetcher with retries, backoff, and cancellation.
//! - `store`: Object-store boundary (public/presigned URLs, existence probe).
//! - `catalog`: Catalog resolution with per-entry fallback and memoization.
//! - `cache`: Byte-level video cache, loading strategies, prediction.
//! - `events`: Typed event channel for cache/session observers.
//! - `partition`: Versioned partitions and stored HTTP responses.
//! - `http_cache`: The partitioned cache worker and its strategies.
//! - `manager`: Session glue (debounced transitions, predicted preloads).
//!
//! This file (`lib.rs`) acts as a facade: it re-exports the main types and
//! functions from the internal modules to form the public API of the
//! `video-precache` crate.

mod cache;
mod catalog;
mod error;
mod events;
mod fetch;
mod http_cache;
mod manager;
mod partition;
mod settings;
mod store;

pub use crate::cache::{
    CacheStats, LoadStrategy, PreloadFailure, VideoCache, VideoResource,
};
pub use crate::catalog::{
    default_catalog, AssetProbe, CatalogEntry, CatalogResolver, VideoDescriptor,
};
pub use crate::error::{CacheError, CacheResult};
pub use crate::events::{CacheEvent, EventChannel};
pub use crate::fetch::{FetchedResponse, ResourceFetcher};
pub use crate::http_cache::{CacheCommand, HttpCacheWorker, Served, WorkerState};
pub use crate::manager::VideoSession;
pub use crate::partition::{
    CachedHttpResponse, PartitionKind, PartitionName, PartitionStorage,
};
pub use crate::settings::CacheSettings;
pub use crate::store::{HttpObjectStore, ObjectStore, DEFAULT_SIGNED_URL_EXPIRY};

pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
