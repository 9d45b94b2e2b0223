//! Source resolvers: ordered fallback over the Action API and REST endpoints.

use crate::fetch::ResilientFetcher;
use crate::urls::WikiSite;
use futures_util::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::time::Duration;
use wikipipe_core::{Error, FetchOptions, Result, SearchHit};

pub const EXTRACT_TTL: Duration = Duration::from_secs(60 * 60);
pub const HTML_TTL: Duration = Duration::from_secs(10 * 60);
pub const SEARCH_TTL: Duration = Duration::from_secs(30);
pub const NO_HTML_MESSAGE: &str = "No HTML returned by parse API";

struct Attempt<'a, T> {
    source: &'static str,
    fut: BoxFuture<'a, Result<Option<T>>>,
}

/// Ordered list of sources. Each yields `Ok(Some(_))` (usable), `Ok(None)`
/// (empty) or `Err`. The first usable result wins; empties and errors fall
/// through. The outcome of the last source is what the caller sees.
pub struct FallbackChain<'a, T> {
    attempts: Vec<Attempt<'a, T>>,
}

impl<T> Default for FallbackChain<'_, T> {
    fn default() -> Self {
        Self {
            attempts: Vec::new(),
        }
    }
}

impl<'a, T: Send + 'a> FallbackChain<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources are lazy: nothing runs until `resolve` reaches them.
    pub fn then<F>(mut self, source: &'static str, fut: F) -> Self
    where
        F: Future<Output = Result<Option<T>>> + Send + 'a,
    {
        self.attempts.push(Attempt {
            source,
            fut: fut.boxed(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub async fn resolve(self) -> Result<Option<T>> {
        let mut last = Ok(None);
        for Attempt { source, fut } in self.attempts {
            match fut.await {
                Ok(Some(v)) => {
                    tracing::debug!(source, "source resolved");
                    return Ok(Some(v));
                }
                Ok(None) => {
                    tracing::debug!(source, "source empty, falling through");
                    last = Ok(None);
                }
                Err(e) => {
                    tracing::debug!(source, error = %e, "source failed, falling through");
                    last = Err(e);
                }
            }
        }
        last
    }
}

fn non_empty_str(v: &serde_json::Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// First page entry of an Action API `query.pages` result (object keyed by
/// page id, or the `formatversion=2` array form).
fn first_page(data: &serde_json::Value) -> Option<&serde_json::Value> {
    let pages = data.get("query")?.get("pages")?;
    match pages {
        serde_json::Value::Object(m) => m.values().next(),
        serde_json::Value::Array(a) => a.first(),
        _ => None,
    }
}

fn action_search_hits(data: &serde_json::Value) -> Vec<SearchHit> {
    let Some(items) = data
        .get("query")
        .and_then(|q| q.get("search"))
        .and_then(|s| s.as_array())
    else {
        return Vec::new();
    };
    items
        .iter()
        .map(|s| SearchHit {
            title: s["title"].as_str().unwrap_or_default().to_string(),
            pageid: s["pageid"].as_u64(),
            snippet: s["snippet"].as_str().map(str::to_string),
            wordcount: s["wordcount"].as_u64(),
            size: s["size"].as_u64(),
            timestamp: s["timestamp"].as_str().map(str::to_string),
        })
        .collect()
}

fn rest_search_hits(data: &serde_json::Value) -> Vec<SearchHit> {
    let Some(pages) = data.get("pages").and_then(|p| p.as_array()) else {
        return Vec::new();
    };
    pages
        .iter()
        .map(|p| SearchHit {
            title: p["title"].as_str().unwrap_or_default().to_string(),
            pageid: p["id"].as_u64(),
            snippet: p["excerpt"].as_str().map(str::to_string),
            wordcount: None,
            size: None,
            timestamp: None,
        })
        .collect()
}

/// Encyclopedia lookups over the resilient fetch layer.
#[derive(Debug, Clone)]
pub struct WikiClient {
    fetcher: ResilientFetcher,
    site: WikiSite,
}

impl WikiClient {
    pub fn new(fetcher: ResilientFetcher, site: WikiSite) -> Self {
        Self { fetcher, site }
    }

    pub fn fetcher(&self) -> &ResilientFetcher {
        &self.fetcher
    }

    pub fn site(&self) -> &WikiSite {
        &self.site
    }

    /// Plain-text lead section. Never fails: `""` means nothing was found.
    pub async fn get_extract(&self, title: &str, lang: Option<&str>) -> String {
        let opts = FetchOptions::cached(EXTRACT_TTL);
        FallbackChain::new()
            .then("action_extracts", async {
                let url = self.site.extract_url(title, lang)?;
                let data = self.fetcher.fetch_json(&url, &opts).await?;
                Ok(first_page(&data).and_then(|p| non_empty_str(&p["extract"])))
            })
            .then("rest_summary", async {
                let url = self.site.summary_url(title, lang)?;
                let data = self.fetcher.fetch_json(&url, &opts).await?;
                Ok(non_empty_str(&data["extract"]).or_else(|| non_empty_str(&data["description"])))
            })
            .resolve()
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    /// Full rendered HTML. Fails when neither source produced any.
    pub async fn get_html(&self, title: &str, lang: Option<&str>) -> Result<String> {
        let opts = FetchOptions::cached(HTML_TTL);
        FallbackChain::new()
            .then("rest_html", async {
                let url = self.site.rest_html_url(title, lang)?;
                let html = self.fetcher.fetch_text(&url, &opts).await?;
                Ok((!html.is_empty()).then_some(html))
            })
            .then("action_parse", async {
                let url = self.site.parse_html_url(title, lang)?;
                let data = self.fetcher.fetch_json(&url, &opts).await?;
                match data["parse"]["text"]["*"].as_str() {
                    Some(html) => Ok(Some(html.to_string())),
                    None => Err(Error::NoHtml(NO_HTML_MESSAGE.to_string())),
                }
            })
            .resolve()
            .await?
            .ok_or_else(|| Error::NoHtml(NO_HTML_MESSAGE.to_string()))
    }

    /// Full-text search. Never fails: an empty list means no hits from either source.
    pub async fn search(&self, query: &str, limit: usize, lang: Option<&str>) -> Vec<SearchHit> {
        let opts = FetchOptions::cached(SEARCH_TTL);
        FallbackChain::new()
            .then("action_search", async {
                let url = self.site.search_url(query, limit, lang)?;
                let data = self.fetcher.fetch_json(&url, &opts).await?;
                let hits = action_search_hits(&data);
                Ok((!hits.is_empty()).then_some(hits))
            })
            .then("rest_search", async {
                let url = self.site.rest_search_url(query, limit, lang)?;
                let data = self.fetcher.fetch_json(&url, &opts).await?;
                Ok(Some(rest_search_hits(&data)))
            })
            .resolve()
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
    }
}
