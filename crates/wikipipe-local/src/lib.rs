//! Local fetch layer: reqwest upstream, TTL cache, per-host throttle,
//! retrying fetch and the extract/HTML/search resolvers built on top.

pub mod backend;
pub mod cache;
pub mod fetch;
pub mod limiter;
pub mod resolve;
pub mod urls;

#[cfg(test)]
mod testing;

pub use backend::{BackendConfig, ReqwestBackend, DEFAULT_USER_AGENT};
pub use cache::TtlCache;
pub use fetch::{Payload, ResilientFetcher};
pub use limiter::RateLimiter;
pub use resolve::{FallbackChain, WikiClient};
pub use urls::WikiSite;
pub use wikipipe_core::{Error, FetchOptions, Result, SearchHit, UpstreamBackend};
