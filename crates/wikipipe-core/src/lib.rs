use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid language code: {0}")]
    InvalidLanguage(String),
    /// Non-2xx upstream response that was not (or no longer) retried.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// Transport-level failure (connect, TLS, client timeout).
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("{0}")]
    NoHtml(String),
    #[error("deadline exceeded after {0}ms")]
    DeadlineExceeded(u64),
}

impl Error {
    /// HTTP status carried by the error, if it came from an upstream response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_THROTTLE_MS: u64 = 150;

/// Per-call knobs for the resilient fetch layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Max retry attempts after the first failure.
    pub retries: u32,
    /// 0 disables caching for this call.
    pub cache_ttl_ms: u64,
    /// Defaults to the request URL.
    pub cache_key: Option<String>,
    /// Minimum spacing enforced by the rate limiter before each attempt.
    pub throttle_ms: u64,
    /// Overall deadline for the operation (throttle waits and retry sleeps included).
    pub timeout_ms: Option<u64>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            cache_ttl_ms: 0,
            cache_key: None,
            throttle_ms: DEFAULT_THROTTLE_MS,
            timeout_ms: None,
        }
    }
}

impl FetchOptions {
    pub fn cached(ttl: Duration) -> Self {
        Self {
            cache_ttl_ms: ttl.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms;
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn caching(&self) -> bool {
        self.cache_ttl_ms > 0
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub url: String,
    pub status: u16,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 429 and every 5xx are worth another attempt.
    pub fn is_transient(&self) -> bool {
        self.status == 429 || self.status >= 500
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// `retry-after` in seconds (fractions allowed). HTTP-date forms and junk yield `None`.
    pub fn retry_after(&self) -> Option<Duration> {
        let raw = self.header("retry-after")?.trim();
        if raw.is_empty() {
            return None;
        }
        let secs = raw.parse::<f64>().ok()?;
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        Some(Duration::from_millis((secs * 1000.0).round() as u64))
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// One HTTP GET against the upstream. Non-2xx statuses are returned as responses, not errors.
#[async_trait::async_trait]
pub trait UpstreamBackend: Send + Sync {
    async fn get(&self, url: &str) -> Result<UpstreamResponse>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub pageid: Option<u64>,
    pub snippet: Option<String>,
    pub wordcount: Option<u64>,
    pub size: Option<u64>,
    pub timestamp: Option<String>,
}
