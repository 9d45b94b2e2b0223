//! Process configuration: env-file loading, client settings and tracing setup.

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wikipipe_local::{
    BackendConfig, RateLimiter, ReqwestBackend, ResilientFetcher, TtlCache, WikiClient, WikiSite,
    DEFAULT_USER_AGENT,
};

pub(crate) const ENV_FILE_VAR: &str = "WIKIPIPE_ENV_FILE";
pub(crate) const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("invalid WIKIPIPE_BASE_URL: {0}")]
    BaseUrl(wikipipe_core::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(wikipipe_core::Error),
    #[error("invalid log filter {filter:?}: {reason}")]
    LogFilter { filter: String, reason: String },
}

/// Load `KEY=VALUE` lines from the file named by `WIKIPIPE_ENV_FILE`.
///
/// Variables already present in the process environment win. Values are never logged
/// (tracing is not initialised yet anyway).
pub(crate) fn load_env_file() {
    let Ok(path) = std::env::var(ENV_FILE_VAR) else {
        return;
    };
    let path = path.trim();
    if path.is_empty() {
        return;
    }
    if let Ok(txt) = std::fs::read_to_string(path) {
        for (k, v) in parse_env_lines(&txt) {
            if std::env::var_os(k).is_none() {
                std::env::set_var(k, v);
            }
        }
    }
}

fn parse_env_lines(txt: &str) -> Vec<(&str, &str)> {
    txt.lines()
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .filter_map(|s| s.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Settings shared by every subcommand that talks to the upstream.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct ClientArgs {
    /// Upstream site template; `{lang}` is replaced by the language subdomain.
    #[arg(
        long,
        env = "WIKIPIPE_BASE_URL",
        default_value = wikipipe_local::urls::DEFAULT_SITE_TEMPLATE,
        global = true
    )]
    pub(crate) base_url: String,
    /// Client identifier sent as User-Agent and Api-User-Agent.
    #[arg(long, env = "WIKIPIPE_USER_AGENT", default_value = DEFAULT_USER_AGENT, global = true)]
    pub(crate) user_agent: String,
    /// In-memory cache bound (entries). 0 = unbounded.
    #[arg(long, env = "WIKIPIPE_CACHE_MAX_ENTRIES", default_value_t = 2048, global = true)]
    pub(crate) cache_max_entries: usize,
    #[arg(long, env = "WIKIPIPE_CONNECT_TIMEOUT_MS", default_value_t = 10_000, global = true)]
    pub(crate) connect_timeout_ms: u64,
    #[arg(long, env = "WIKIPIPE_REQUEST_TIMEOUT_MS", default_value_t = 30_000, global = true)]
    pub(crate) request_timeout_ms: u64,
}

impl ClientArgs {
    /// Composition root: one cache and one limiter per process.
    pub(crate) fn build_client(&self) -> Result<WikiClient, ConfigError> {
        let site = WikiSite::new(&self.base_url).map_err(ConfigError::BaseUrl)?;
        let backend = ReqwestBackend::new(BackendConfig {
            user_agent: self.user_agent.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        })
        .map_err(ConfigError::Client)?;
        let fetcher = ResilientFetcher::new(
            Arc::new(backend),
            Arc::new(TtlCache::with_max_entries(self.cache_max_entries)),
            Arc::new(RateLimiter::new()),
        );
        tracing::debug!(
            site = site.template(),
            cache_max_entries = self.cache_max_entries,
            "client configured"
        );
        Ok(WikiClient::new(fetcher, site))
    }
}

/// Explicit level, else `RUST_LOG`, else `warn`.
pub(crate) fn log_filter(level: Option<&str>) -> Result<EnvFilter, ConfigError> {
    match level.map(str::trim).filter(|l| !l.is_empty()) {
        Some(l) => EnvFilter::try_new(l).map_err(|e| ConfigError::LogFilter {
            filter: l.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))),
    }
}

/// Logs go to stderr: stdout carries the MCP stream.
pub(crate) fn init_tracing(level: Option<&str>) -> Result<(), ConfigError> {
    let filter = log_filter(level)?;
    // A second init (tests) is not an error worth surfacing.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    Ok(())
}
