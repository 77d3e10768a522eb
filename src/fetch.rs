//! HTTP resource fetcher for whole-blob downloads.
//!
//! Every payload handled by this crate (video binaries, precached page
//! assets, probe requests) is fetched as a complete blob, so this module
//! exposes collect-into-memory operations only. Supports cancellation and
//! bounded retries with exponential backoff.
//!
//! One [`reqwest::Client`] is shared per fetcher (and across clones) so
//! connection pooling and DNS caching stay consistent crate-wide.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::{CacheError, CacheResult};

/// A complete HTTP response collected into memory.
#[derive(Clone, Debug)]
pub struct FetchedResponse {
    /// Final URL of the response.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response headers as name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Full response body.
    pub body: Bytes,
}

impl FetchedResponse {
    /// Whether the status code is in the success range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP fetcher with bounded retries, backoff, and cancellation.
///
/// `request_timeout` bounds a single attempt (connection + body collection).
#[derive(Debug, Clone)]
pub struct ResourceFetcher {
    client: reqwest::Client,

    // Request / retry configuration.
    request_timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    max_retry_delay: Duration,

    // Cancellation token used for all network operations performed by this fetcher.
    cancel: CancellationToken,
}

impl ResourceFetcher {
    /// Creates a new fetcher.
    pub fn new(
        request_timeout: Duration,
        max_retries: u32,
        retry_base_delay: Duration,
        max_retry_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            request_timeout,
            max_retries,
            retry_base_delay,
            max_retry_delay,
            cancel,
        }
    }

    /// Creates a fetcher from crate settings.
    pub fn from_settings(settings: &crate::settings::CacheSettings, cancel: CancellationToken) -> Self {
        Self::new(
            settings.request_timeout,
            settings.max_retries,
            settings.retry_base_delay,
            settings.max_retry_delay,
            cancel,
        )
    }

    /// Returns the cancellation token used by this fetcher.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // Public API: full downloads

    /// Downloads a URL into memory (with retries and cancellation).
    ///
    /// Non-success statuses are errors here; callers that need to inspect the
    /// status themselves should use [`Self::fetch_response`].
    pub async fn fetch_bytes(&self, url: &str) -> CacheResult<Bytes> {
        let parsed = Self::parse_url(url)?;
        let resp = self
            .retry_with_backoff(url, "fetch", || self.try_fetch_once(&parsed, &[]))
            .await?;
        if !resp.is_success() {
            return Err(CacheError::HttpStatus {
                status: resp.status,
                url: url.to_string(),
            });
        }
        Ok(resp.body)
    }

    /// Downloads a URL into memory, preserving status and headers.
    ///
    /// Transport failures are retried; a completed response is returned as-is
    /// regardless of status so the caller can apply its own policy.
    pub async fn fetch_response(
        &self,
        url: &str,
        extra_headers: &[(&str, &str)],
    ) -> CacheResult<FetchedResponse> {
        let parsed = Self::parse_url(url)?;
        self.retry_with_backoff(url, "fetch", || self.try_fetch_once(&parsed, extra_headers))
            .await
    }

    /// Lightweight existence probe (HEAD), no retries.
    ///
    /// Returns `Ok(true)` when the server answers with a success status.
    pub async fn probe_exists(&self, url: &str) -> CacheResult<bool> {
        let parsed = Self::parse_url(url)?;
        let send_fut = timeout(self.request_timeout, self.client.head(parsed.clone()).send());

        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CacheError::Cancelled),
            res = send_fut => res,
        };

        match res {
            Ok(Ok(resp)) => Ok(resp.status().is_success()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(CacheError::Timeout(url.to_string())),
        }
    }

    // ----------------------------
    // Internals: retry policy
    // ----------------------------

    async fn retry_with_backoff<T, F, Fut>(&self, url: &str, op_name: &str, mut f: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = CacheResult<T>>,
    {
        let mut last_error: Option<CacheError> = None;
        let mut delay = self.retry_base_delay;

        for attempt in 0..=self.max_retries {
            if self.cancel.is_cancelled() {
                return Err(CacheError::Cancelled);
            }

            match f().await {
                Ok(v) => {
                    if attempt > 0 {
                        debug!(
                            url = url,
                            attempts = attempt + 1,
                            operation = op_name,
                            "fetch succeeded after retry"
                        );
                    }
                    return Ok(v);
                }
                Err(CacheError::Cancelled) => return Err(CacheError::Cancelled),
                Err(e) => {
                    debug!(
                        url = url,
                        attempt = attempt + 1,
                        max_attempts = self.max_retries + 1,
                        operation = op_name,
                        "fetch attempt failed: {}",
                        e
                    );
                    last_error = Some(e);

                    if attempt < self.max_retries {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return Err(CacheError::Cancelled),
                            _ = tokio::time::sleep(delay) => {},
                        }
                        delay = (delay * 2).min(self.max_retry_delay);
                    }
                }
            }
        }

        debug!(
            url = url,
            attempts = self.max_retries + 1,
            operation = op_name,
            "fetch giving up after retries"
        );

        Err(last_error.unwrap_or_else(|| CacheError::msg("fetch failed with no error")))
    }

    // ----------------------------
    // Internals: single attempt
    // ----------------------------

    async fn try_fetch_once(
        &self,
        url: &Url,
        extra_headers: &[(&str, &str)],
    ) -> CacheResult<FetchedResponse> {
        let headers = Self::build_headers(extra_headers)?;

        let attempt = async {
            let resp = self
                .client
                .get(url.clone())
                .headers(headers)
                .send()
                .await?;

            let status = resp.status().as_u16();
            let final_url = resp.url().to_string();
            let collected: Vec<(String, String)> = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect();
            let body = resp.bytes().await?;

            Ok::<FetchedResponse, reqwest::Error>(FetchedResponse {
                url: final_url,
                status,
                headers: collected,
                body,
            })
        };

        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CacheError::Cancelled),
            res = timeout(self.request_timeout, attempt) => res,
        };

        match res {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(CacheError::Timeout(url.to_string())),
        }
    }

    fn build_headers(extra: &[(&str, &str)]) -> CacheResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (k, v) in extra {
            let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| {
                CacheError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid header name `{}`: {}", k, e),
                ))
            })?;
            let value = HeaderValue::from_str(v).map_err(|e| {
                CacheError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid header value for `{}`: {}", k, e),
                ))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn parse_url(url: &str) -> CacheResult<Url> {
        Url::parse(url).map_err(CacheError::url_parse)
    }
}
