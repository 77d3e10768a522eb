//! Versioned cache partitions for stored HTTP responses.
//!
//! This module centralizes partition naming and the request-URL-keyed
//! response store so the cache worker is not littered with string formatting
//! rules.
//!
//! Naming
//! ------
//! A partition renders as `<app>-<kind>-<version>` (e.g. `wellness-static-v1`)
//! and parses back into its structured parts. Generational cleanup compares
//! the parsed version exactly; substring matching against version tags is
//! intentionally avoided.
//!
//! Concurrency
//! -----------
//! The store is shared across clones. Writes are keyed by request URL and
//! last-write-wins is the accepted resolution for concurrent writers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bytes::Bytes;
use tracing::trace;

use crate::fetch::FetchedResponse;

/// The three logical partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    /// Long-lived static assets (fonts, icons, stylesheets).
    Static,
    /// Bundle chunks, HTML, and on-demand cached assets.
    Dynamic,
    /// Reserved for large media payloads; currently written by nothing at
    /// runtime but covered by generational cleanup and clear-all.
    Media,
}

impl PartitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionKind::Static => "static",
            PartitionKind::Dynamic => "dynamic",
            PartitionKind::Media => "media",
        }
    }

    pub const ALL: [PartitionKind; 3] =
        [PartitionKind::Static, PartitionKind::Dynamic, PartitionKind::Media];
}

impl FromStr for PartitionKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(PartitionKind::Static),
            "dynamic" => Ok(PartitionKind::Dynamic),
            "media" => Ok(PartitionKind::Media),
            _ => Err(()),
        }
    }
}

/// Structured partition name: `<app>-<kind>-<version>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionName {
    pub app: String,
    pub kind: PartitionKind,
    pub version: String,
}

impl PartitionName {
    pub fn new(app: impl Into<String>, kind: PartitionKind, version: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            kind,
            version: version.into(),
        }
    }

    /// Parse a stored partition name belonging to `app`.
    ///
    /// Returns `None` for names of other apps or names that do not follow the
    /// `<app>-<kind>-<version>` layout; such partitions are left untouched.
    pub fn parse(name: &str, app: &str) -> Option<Self> {
        let rest = name.strip_prefix(app)?.strip_prefix('-')?;
        let (kind_str, version) = rest.split_once('-')?;
        let kind = kind_str.parse().ok()?;
        if version.is_empty() {
            return None;
        }
        Some(Self {
            app: app.to_string(),
            kind,
            version: version.to_string(),
        })
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.app, self.kind.as_str(), self.version)
    }
}

/// A stored response body plus headers, keyed by request URL inside one
/// partition.
#[derive(Clone, Debug)]
pub struct CachedHttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers as name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Full response body.
    pub body: Bytes,
    /// When this response was written to the partition.
    pub stored_at: SystemTime,
}

impl CachedHttpResponse {
    /// Whether the status code is in the success range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Synthetic 408 returned when revalidation has no cache to fall back on
    /// and the network fetch itself rejected.
    pub fn request_timeout() -> Self {
        Self::synthetic(408, "network error")
    }

    /// Synthetic 503 plain-text offline response.
    pub fn offline() -> Self {
        Self::synthetic(503, "offline - please check your connection")
    }

    fn synthetic(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: Bytes::copy_from_slice(body.as_bytes()),
            stored_at: SystemTime::now(),
        }
    }
}

impl From<FetchedResponse> for CachedHttpResponse {
    fn from(resp: FetchedResponse) -> Self {
        Self {
            status: resp.status,
            headers: resp.headers,
            body: resp.body,
            stored_at: SystemTime::now(),
        }
    }
}

/// Request-URL-keyed response storage, grouped into named partitions.
///
/// Cheap to clone; all clones share state. Stands in for the browser's
/// origin-scoped persistent cache storage.
#[derive(Clone, Default)]
pub struct PartitionStorage {
    inner: Arc<Mutex<HashMap<String, HashMap<String, CachedHttpResponse>>>>,
}

impl PartitionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a response under `url` in `partition`, creating the partition
    /// on first write. Last write wins.
    pub fn put(&self, partition: &str, url: &str, response: CachedHttpResponse) {
        let mut inner = self.lock();
        inner
            .entry(partition.to_string())
            .or_default()
            .insert(url.to_string(), response);
        trace!(partition = partition, url = url, "cache: stored response");
    }

    /// Look up a stored response.
    pub fn get(&self, partition: &str, url: &str) -> Option<CachedHttpResponse> {
        let inner = self.lock();
        let hit = inner.get(partition).and_then(|p| p.get(url)).cloned();
        match hit {
            Some(resp) => {
                trace!(partition = partition, url = url, "cache: HIT");
                Some(resp)
            }
            None => {
                trace!(partition = partition, url = url, "cache: MISS");
                None
            }
        }
    }

    /// Create an (empty) partition if it does not exist yet.
    pub fn open(&self, partition: &str) {
        self.lock().entry(partition.to_string()).or_default();
    }

    /// Delete an entire partition. Returns whether it existed.
    pub fn delete_partition(&self, partition: &str) -> bool {
        let existed = self.lock().remove(partition).is_some();
        if existed {
            trace!(partition = partition, "cache: partition deleted");
        }
        existed
    }

    /// Names of all existing partitions.
    pub fn partition_names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of responses stored in a partition.
    pub fn partition_len(&self, partition: &str) -> usize {
        self.lock().get(partition).map(|p| p.len()).unwrap_or(0)
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, CachedHttpResponse>>> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_name_round_trips() {
        let name = PartitionName::new("wellness", PartitionKind::Static, "v1");
        assert_eq!(name.to_string(), "wellness-static-v1");
        assert_eq!(
            PartitionName::parse("wellness-static-v1", "wellness"),
            Some(name)
        );
    }

    #[test]
    fn parse_rejects_foreign_and_malformed_names() {
        assert_eq!(PartitionName::parse("other-static-v1", "wellness"), None);
        assert_eq!(PartitionName::parse("wellness-static", "wellness"), None);
        assert_eq!(PartitionName::parse("wellness-bogus-v1", "wellness"), None);
        // An app prefix that merely shares a substring must not match.
        assert_eq!(PartitionName::parse("wellnessx-static-v1", "wellness"), None);
    }

    #[test]
    fn parse_is_exact_on_version() {
        let parsed = PartitionName::parse("wellness-dynamic-v10", "wellness").unwrap();
        assert_eq!(parsed.version, "v10");
        assert_ne!(parsed.version, "v1");
    }
}
