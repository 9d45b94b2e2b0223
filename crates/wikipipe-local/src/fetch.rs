//! Cache-first, throttled, retrying GET for JSON and text payloads.

use crate::cache::TtlCache;
use crate::limiter::RateLimiter;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wikipipe_core::{Error, FetchOptions, Result, UpstreamBackend, UpstreamResponse};

/// All upstream calls pace against this single limiter key.
pub const THROTTLE_KEY: &str = "wmf";
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const TEXT_KEY_SUFFIX: &str = "::text";

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Text,
}

impl BodyKind {
    fn cache_key(self, base: &str) -> String {
        match self {
            Self::Json => base.to_string(),
            Self::Text => format!("{base}{TEXT_KEY_SUFFIX}"),
        }
    }

    fn decode(self, resp: &UpstreamResponse) -> Result<Payload> {
        match self {
            Self::Json => serde_json::from_slice(&resp.body)
                .map(Payload::Json)
                .map_err(|e| Error::Decode(format!("{}: {e}", resp.url))),
            Self::Text => Ok(Payload::Text(resp.text_lossy())),
        }
    }
}

type Pending = Shared<BoxFuture<'static, Result<Payload>>>;

/// The fetch layer. Cheap to clone; clones share cache, limiter and in-flight state.
#[derive(Clone)]
pub struct ResilientFetcher {
    backend: Arc<dyn UpstreamBackend>,
    cache: Arc<TtlCache<Payload>>,
    limiter: Arc<RateLimiter>,
    inflight: Arc<Mutex<HashMap<String, Pending>>>,
}

impl std::fmt::Debug for ResilientFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetcher")
            .field("cache_len", &self.cache.len())
            .field("cache_max_entries", &self.cache.max_entries())
            .finish_non_exhaustive()
    }
}

impl ResilientFetcher {
    pub fn new(
        backend: Arc<dyn UpstreamBackend>,
        cache: Arc<TtlCache<Payload>>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            backend,
            cache,
            limiter,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fresh unbounded cache and limiter around `backend`.
    pub fn with_backend(backend: Arc<dyn UpstreamBackend>) -> Self {
        Self::new(
            backend,
            Arc::new(TtlCache::new()),
            Arc::new(RateLimiter::new()),
        )
    }

    pub fn cache(&self) -> &Arc<TtlCache<Payload>> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn fetch_json(&self, url: &str, opts: &FetchOptions) -> Result<serde_json::Value> {
        match self.fetch(url, opts, BodyKind::Json).await? {
            Payload::Json(v) => Ok(v),
            Payload::Text(_) => Err(Error::Decode(format!("{url}: cached payload is not JSON"))),
        }
    }

    pub async fn fetch_text(&self, url: &str, opts: &FetchOptions) -> Result<String> {
        match self.fetch(url, opts, BodyKind::Text).await? {
            Payload::Text(s) => Ok(s),
            Payload::Json(_) => Err(Error::Decode(format!("{url}: cached payload is not text"))),
        }
    }

    async fn fetch(&self, url: &str, opts: &FetchOptions, kind: BodyKind) -> Result<Payload> {
        let key = kind.cache_key(opts.cache_key.as_deref().unwrap_or(url));
        if opts.caching() {
            if let Some(hit) = self.cache.get(&key) {
                tracing::debug!(url, key = key.as_str(), "cache hit");
                return Ok(hit);
            }
        }

        let work = async {
            if opts.caching() {
                self.coalesced(key, url, opts, kind).await
            } else {
                self.fetch_network(url, opts, kind).await
            }
        };
        match opts.timeout() {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| Error::DeadlineExceeded(limit.as_millis() as u64))?,
            None => work.await,
        }
    }

    fn inflight_lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Concurrent misses on one key share a single network operation. The leader
    /// runs as its own task so a dropped or timed-out caller cannot strand it; it
    /// fills the cache before leaving the in-flight table.
    async fn coalesced(
        &self,
        key: String,
        url: &str,
        opts: &FetchOptions,
        kind: BodyKind,
    ) -> Result<Payload> {
        let pending = {
            let mut inflight = self.inflight_lock();
            if let Some(p) = inflight.get(&key) {
                tracing::debug!(url, key = key.as_str(), "joining in-flight request");
                p.clone()
            } else if let Some(hit) = self.cache.get(&key) {
                return Ok(hit);
            } else {
                let this = self.clone();
                let url = url.to_string();
                let opts = opts.clone();
                let leader_key = key.clone();
                let leader = tokio::spawn(async move {
                    let out = this.fetch_network(&url, &opts, kind).await;
                    if let Ok(v) = &out {
                        this.cache.set(leader_key.clone(), v.clone(), opts.cache_ttl());
                    }
                    this.inflight_lock().remove(&leader_key);
                    out
                });
                let fut = leader
                    .map(|joined| {
                        joined.unwrap_or_else(|e| Err(Error::Fetch(format!("fetch task failed: {e}"))))
                    })
                    .boxed()
                    .shared();
                inflight.insert(key, fut.clone());
                fut
            }
        };
        pending.await
    }

    async fn fetch_network(&self, url: &str, opts: &FetchOptions, kind: BodyKind) -> Result<Payload> {
        let mut attempt: u32 = 0;
        let mut backoff = INITIAL_BACKOFF;
        loop {
            self.limiter.wait(THROTTLE_KEY, opts.throttle()).await;
            tracing::debug!(url, attempt, "upstream request");
            let resp = self.backend.get(url).await?;
            if resp.is_success() {
                return kind.decode(&resp);
            }
            if resp.is_transient() && attempt < opts.retries {
                let wait = resp.retry_after().unwrap_or(backoff);
                attempt += 1;
                tracing::warn!(
                    url,
                    status = resp.status,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(wait).await;
                backoff = backoff.saturating_mul(2);
                continue;
            }
            return Err(Error::Http {
                status: resp.status,
                body: resp.text_lossy(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeUpstream, Reply};
    use tokio::time::Instant;

    fn fetcher(fake: &Arc<FakeUpstream>) -> ResilientFetcher {
        ResilientFetcher::with_backend(fake.clone())
    }

    const URL: &str = "https://en.wikipedia.org/w/api.php?action=query";

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_with_exponential_backoff() {
        let fake = Arc::new(FakeUpstream::new().route(
            "api.php",
            vec![
                Reply::status(503),
                Reply::status(503),
                Reply::json(200, serde_json::json!({"ok": true})),
            ],
        ));
        let t0 = Instant::now();
        let v = fetcher(&fake)
            .fetch_json(URL, &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(v, serde_json::json!({"ok": true}));
        assert_eq!(
            fake.call_offsets(t0),
            vec![
                Duration::ZERO,
                Duration::from_millis(500),
                Duration::from_millis(1_500)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_with_status_and_body() {
        let fake = Arc::new(
            FakeUpstream::new().route("api.php", vec![Reply::text(503, "upstream down")]),
        );
        let err = fetcher(&fake)
            .fetch_json(URL, &FetchOptions::default().with_retries(1))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("503"), "{err}");
        assert!(err.to_string().contains("upstream down"), "{err}");
        assert_eq!(fake.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_the_wait_but_not_the_backoff_counter() {
        let fake = Arc::new(FakeUpstream::new().route(
            "api.php",
            vec![
                Reply::status(429).with_header("retry-after", "2"),
                Reply::status(503),
                Reply::json(200, serde_json::json!([1, 2])),
            ],
        ));
        let t0 = Instant::now();
        fetcher(&fake)
            .fetch_json(URL, &FetchOptions::default())
            .await
            .unwrap();
        // 2000ms from the header, then the doubled internal delay (1000ms).
        assert_eq!(
            fake.call_offsets(t0),
            vec![
                Duration::ZERO,
                Duration::from_millis(2_000),
                Duration::from_millis(3_000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let fake =
            Arc::new(FakeUpstream::new().route("api.php", vec![Reply::text(404, "missing")]));
        let err = fetcher(&fake)
            .fetch_text(URL, &FetchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::Http {
                status: 404,
                body: "missing".to_string()
            }
        );
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_not_retried() {
        let fake = Arc::new(
            FakeUpstream::new().route("api.php", vec![Reply::transport("connection reset")]),
        );
        let err = fetcher(&fake)
            .fetch_json(URL, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)), "{err:?}");
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_json_is_a_decode_error() {
        let fake = Arc::new(FakeUpstream::new().route("api.php", vec![Reply::text(200, "<html>")]));
        let err = fetcher(&fake)
            .fetch_json(URL, &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)), "{err:?}");
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_applies_to_every_retry() {
        let fake = Arc::new(FakeUpstream::new().route(
            "api.php",
            vec![Reply::status(500), Reply::json(200, serde_json::json!({}))],
        ));
        let t0 = Instant::now();
        fetcher(&fake)
            .fetch_json(URL, &FetchOptions::default().with_throttle_ms(1_000))
            .await
            .unwrap();
        // Backoff is 500ms, but the limiter holds the retry until 1000ms.
        assert_eq!(
            fake.call_offsets(t0),
            vec![Duration::ZERO, Duration::from_millis(1_000)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cached_calls_skip_the_network_until_expiry() {
        let fake = Arc::new(FakeUpstream::new().route(
            "api.php",
            vec![
                Reply::json(200, serde_json::json!({"n": 1})),
                Reply::json(200, serde_json::json!({"n": 2})),
            ],
        ));
        let f = fetcher(&fake);
        let opts = FetchOptions::cached(Duration::from_secs(60));

        assert_eq!(f.fetch_json(URL, &opts).await.unwrap()["n"], 1);
        assert_eq!(f.fetch_json(URL, &opts).await.unwrap()["n"], 1);
        assert_eq!(fake.call_count(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(f.fetch_json(URL, &opts).await.unwrap()["n"], 2);
        assert_eq!(fake.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_caches() {
        let fake = Arc::new(
            FakeUpstream::new().route("api.php", vec![Reply::json(200, serde_json::json!(1))]),
        );
        let f = fetcher(&fake);
        f.fetch_json(URL, &FetchOptions::default()).await.unwrap();
        f.fetch_json(URL, &FetchOptions::default()).await.unwrap();
        assert_eq!(fake.call_count(), 2);
        assert!(f.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let fake = Arc::new(FakeUpstream::new().route(
            "api.php",
            vec![Reply::status(404), Reply::json(200, serde_json::json!("late"))],
        ));
        let f = fetcher(&fake);
        let opts = FetchOptions::cached(Duration::from_secs(60));
        assert!(f.fetch_json(URL, &opts).await.is_err());
        assert_eq!(f.fetch_json(URL, &opts).await.unwrap(), "late");
    }

    #[tokio::test(start_paused = true)]
    async fn text_and_json_cache_entries_are_isolated() {
        let fake = Arc::new(
            FakeUpstream::new().route("api.php", vec![Reply::text(200, r#"{"a":1}"#)]),
        );
        let f = fetcher(&fake);
        let opts = FetchOptions::cached(Duration::from_secs(60));

        let json = f.fetch_json(URL, &opts).await.unwrap();
        assert_eq!(json, serde_json::json!({"a": 1}));
        let text = f.fetch_text(URL, &opts).await.unwrap();
        assert_eq!(text, r#"{"a":1}"#);
        assert_eq!(fake.call_count(), 2, "text must not be served from the JSON entry");

        assert_eq!(f.fetch_json(URL, &opts).await.unwrap(), json);
        assert_eq!(f.fetch_text(URL, &opts).await.unwrap(), text);
        assert_eq!(fake.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_cache_key_is_shared_across_urls() {
        let fake = Arc::new(
            FakeUpstream::new()
                .route("/a", vec![Reply::json(200, serde_json::json!("a"))])
                .route("/b", vec![Reply::json(200, serde_json::json!("b"))]),
        );
        let f = fetcher(&fake);
        let opts = FetchOptions::cached(Duration::from_secs(60)).with_cache_key("shared");
        assert_eq!(f.fetch_json("https://x.test/a", &opts).await.unwrap(), "a");
        assert_eq!(f.fetch_json("https://x.test/b", &opts).await.unwrap(), "a");
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_a_long_retry_after() {
        let fake = Arc::new(FakeUpstream::new().route(
            "api.php",
            vec![Reply::status(429).with_header("retry-after", "3600")],
        ));
        let t0 = Instant::now();
        let err = fetcher(&fake)
            .fetch_json(URL, &FetchOptions::default().with_timeout_ms(5_000))
            .await
            .unwrap_err();
        assert_eq!(err, Error::DeadlineExceeded(5_000));
        assert_eq!(Instant::now() - t0, Duration::from_millis(5_000));
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_cached_misses_share_one_request() {
        let fake = Arc::new(
            FakeUpstream::new()
                .with_latency(Duration::from_millis(200))
                .route("api.php", vec![Reply::json(200, serde_json::json!({"v": 1}))]),
        );
        let f = fetcher(&fake);
        let opts = FetchOptions::cached(Duration::from_secs(60));

        let (a, b, c) = tokio::join!(
            f.fetch_json(URL, &opts),
            f.fetch_json(URL, &opts),
            f.fetch_json(URL, &opts)
        );
        assert_eq!(a.unwrap(), serde_json::json!({"v": 1}));
        assert_eq!(b.unwrap(), serde_json::json!({"v": 1}));
        assert_eq!(c.unwrap(), serde_json::json!({"v": 1}));
        assert_eq!(fake.call_count(), 1);
        assert!(f.inflight_lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_cached_call_does_not_stall_later_fetches() {
        let fake = Arc::new(
            FakeUpstream::new()
                .route("/a", vec![Reply::json(200, serde_json::json!("a"))])
                .route("/b", vec![Reply::json(200, serde_json::json!("b"))])
                .route("/c", vec![Reply::json(200, serde_json::json!("c"))]),
        );
        let f = fetcher(&fake);
        let t0 = Instant::now();

        // Pushes the next throttle slot to t0 + 150ms.
        f.fetch_json("https://x.test/a", &FetchOptions::default())
            .await
            .unwrap();

        let cached = FetchOptions::cached(Duration::from_secs(60));
        let err = f
            .fetch_json("https://x.test/b", &cached.clone().with_timeout_ms(50))
            .await
            .unwrap_err();
        assert_eq!(err, Error::DeadlineExceeded(50));

        let c = f
            .fetch_json(
                "https://x.test/c",
                &FetchOptions::default().with_timeout_ms(60_000),
            )
            .await
            .unwrap();
        assert_eq!(c, "c");
        assert_eq!(
            fake.call_offsets(t0),
            vec![
                Duration::ZERO,
                Duration::from_millis(150),
                Duration::from_millis(300)
            ]
        );

        // The abandoned leader still completed and filled the cache.
        assert!(f.inflight_lock().is_empty());
        assert_eq!(f.fetch_json("https://x.test/b", &cached).await.unwrap(), "b");
        assert_eq!(fake.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_cached_call_leaves_no_inflight_entry() {
        let fake = Arc::new(
            FakeUpstream::new()
                .with_latency(Duration::from_millis(200))
                .route("api.php", vec![Reply::json(200, serde_json::json!({"v": 1}))]),
        );
        let f = fetcher(&fake);
        let opts = FetchOptions::cached(Duration::from_secs(60));
        tokio::select! {
            _ = f.fetch_json(URL, &opts) => panic!("request should still be in flight"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(f.inflight_lock().is_empty());
        assert_eq!(f.fetch_json(URL, &opts).await.unwrap(), serde_json::json!({"v": 1}));
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn uncached_calls_are_not_coalesced() {
        let fake = Arc::new(
            FakeUpstream::new()
                .with_latency(Duration::from_millis(200))
                .route("api.php", vec![Reply::json(200, serde_json::json!(0))]),
        );
        let f = fetcher(&fake);
        let opts = FetchOptions::default();
        let (a, b) = tokio::join!(f.fetch_json(URL, &opts), f.fetch_json(URL, &opts));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(fake.call_count(), 2);
    }
}
