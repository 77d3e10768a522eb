//! Object-store boundary.
//!
//! The remote object store is an external black box reached over HTTPS,
//! either through a public base URL + object key or a time-limited presigned
//! URL. This module defines the seam ([`ObjectStore`]) and ships an HTTP
//! implementation that builds public URLs and performs HEAD-style existence
//! probes.
//!
//! Presigning requires credentials this library deliberately does not hold;
//! [`HttpObjectStore::signed_url`] reports the operation as unsupported, and
//! deployments with a presigning service provide their own [`ObjectStore`].

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::{CacheError, CacheResult};
use crate::fetch::ResourceFetcher;

/// Default expiry for presigned object URLs.
pub const DEFAULT_SIGNED_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Resolves object keys to fetchable URLs and probes object existence.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Build a public URL for `key`.
    fn public_url(&self, key: &str) -> CacheResult<Url>;

    /// Obtain a time-limited presigned URL for `key`.
    async fn signed_url(&self, key: &str, expires_in: Duration) -> CacheResult<Url>;

    /// Lightweight existence check (HEAD-style) for `key`.
    async fn exists(&self, key: &str) -> CacheResult<bool>;
}

/// [`ObjectStore`] backed by a public HTTP(S) base URL.
#[derive(Clone, Debug)]
pub struct HttpObjectStore {
    base: Url,
    fetcher: ResourceFetcher,
}

impl HttpObjectStore {
    /// Create a store rooted at `base`. The base should end with `/` so that
    /// keys join as path segments.
    pub fn new(base: Url, fetcher: ResourceFetcher) -> Self {
        Self { base, fetcher }
    }

    /// Base URL this store resolves against.
    pub fn base(&self) -> &Url {
        &self.base
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn public_url(&self, key: &str) -> CacheResult<Url> {
        self.base.join(key).map_err(CacheError::url_parse)
    }

    async fn signed_url(&self, _key: &str, _expires_in: Duration) -> CacheResult<Url> {
        Err(CacheError::Unsupported(
            "presigned URLs require a credentialed presigner",
        ))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let url = self.public_url(key)?;
        self.fetcher.probe_exists(url.as_str()).await
    }
}
