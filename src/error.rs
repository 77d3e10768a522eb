//! Unified crate-level error types.
//!
//! This module provides a single [`CacheError`] type used across the crate and
//! a convenient [`CacheResult`] alias.
//!
//! Rationale
//! ---------
//! The caching layers (catalog resolution, byte-level video cache, partitioned
//! HTTP cache) share the same failure surface: URL construction, network
//! fetches, and storage bookkeeping. A single error type keeps the seams
//! between them free of wrapper enums.
//!
//! Note: some variants intentionally remain string-based to avoid pulling
//! concrete HTTP client error types into the public API.

use std::io;
use std::time::Duration;

/// Result type used by this crate.
pub type CacheResult<T> = Result<T, CacheError>;

/// Unified error type for the `video-precache` crate.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A generic error with a message.
    #[error("{0}")]
    Message(String),

    /// Invalid parameters provided by the caller.
    #[error("invalid parameters: {0}")]
    InvalidParams(&'static str),

    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    ///
    /// Uses the concrete `std::io::Error` to preserve error kinds and sources.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request could not be performed (connection, TLS, protocol).
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// Server answered with a non-success status.
    #[error("HTTP error: {status} for {url}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// URL that failed.
        url: String,
    },

    /// Request timed out.
    #[error("request timeout for {0}")]
    Timeout(String),

    /// A URL could not be parsed or joined.
    #[error("invalid URL: {0}")]
    UrlParse(String),

    /// The requested video is not part of the known catalog.
    #[error("unknown video: {0}")]
    UnknownVideo(String),

    /// A transition request arrived inside the debounce window and was dropped.
    #[error("transition debounced; retry after {remaining:?}")]
    TransitionDebounced {
        /// Time left until the next transition is accepted.
        remaining: Duration,
    },

    /// The operation is not supported by this implementation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Extra context around a lower-level error.
    ///
    /// Use this for adding human-readable context without creating many
    /// wrapper enums.
    #[error("{context}: {source}")]
    Context {
        /// What we were doing when the error occurred.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<CacheError>,
    },
}

impl CacheError {
    /// Convenience helper to construct a simple message error.
    pub fn msg(msg: impl Into<String>) -> Self {
        CacheError::Message(msg.into())
    }

    /// Construct an [`CacheError::UrlParse`] from any URL error.
    pub fn url_parse(e: impl std::fmt::Display) -> Self {
        CacheError::UrlParse(e.to_string())
    }

    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        CacheError::Context {
            context,
            source: Box::new(self),
        }
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CacheError::Timeout(
                e.url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "<unknown url>".into()),
            )
        } else {
            CacheError::Request(e.to_string())
        }
    }
}
