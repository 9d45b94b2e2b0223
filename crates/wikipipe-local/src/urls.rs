//! Upstream URL builders.
//!
//! All builders are pure: they only assemble strings from the site template,
//! the language subdomain and the request parameters.

use wikipipe_core::{Error, Result};

pub const DEFAULT_SITE_TEMPLATE: &str = "https://{lang}.wikipedia.org";
pub const DEFAULT_LANG: &str = "en";
const LANG_PLACEHOLDER: &str = "{lang}";

pub const SEARCH_LIMIT_MAX: usize = 50;
pub const REST_SEARCH_LIMIT_MAX: usize = 100;

/// Lower-cased language subdomain, `en` when absent or blank.
pub fn normalize_lang(lang: Option<&str>) -> String {
    lang.map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(DEFAULT_LANG)
        .to_ascii_lowercase()
}

/// Accepts `xx`, `xxx`, and `xx-variant` style codes (`en`, `zh-yue`, `be-tarask`).
pub fn validate_lang(lang: &str) -> Result<()> {
    let l = lang.to_ascii_lowercase();
    let (base, variant) = match l.split_once('-') {
        Some((b, v)) => (b, Some(v)),
        None => (l.as_str(), None),
    };
    let base_ok = (2..=3).contains(&base.len()) && base.chars().all(|c| c.is_ascii_lowercase());
    let variant_ok = variant.map_or(true, |v| {
        (2..=8).contains(&v.len())
            && v
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    });
    if base_ok && variant_ok {
        Ok(())
    } else {
        Err(Error::InvalidLanguage(lang.to_string()))
    }
}

/// Where the upstream lives. `{lang}` in the template is replaced by the language subdomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiSite {
    template: String,
}

impl Default for WikiSite {
    fn default() -> Self {
        Self {
            template: DEFAULT_SITE_TEMPLATE.to_string(),
        }
    }
}

impl WikiSite {
    pub fn new(template: &str) -> Result<Self> {
        let template = template.trim().trim_end_matches('/').to_string();
        let sample = template.replace(LANG_PLACEHOLDER, DEFAULT_LANG);
        let url = url::Url::parse(&sample).map_err(|e| Error::InvalidUrl(format!("{sample}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(format!("{sample}: expected an http(s) origin")));
        }
        Ok(Self { template })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn origin(&self, lang: Option<&str>) -> String {
        self.template
            .replace(LANG_PLACEHOLDER, &normalize_lang(lang))
    }

    fn endpoint(&self, lang: Option<&str>, segments: &[&str]) -> Result<url::Url> {
        if let Some(l) = lang.map(str::trim).filter(|l| !l.is_empty()) {
            validate_lang(l)?;
        }
        let origin = self.origin(lang);
        let mut url =
            url::Url::parse(&origin).map_err(|e| Error::InvalidUrl(format!("{origin}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(origin.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn action_api(&self, lang: Option<&str>, params: &[(&str, &str)]) -> Result<String> {
        let mut url = self.endpoint(lang, &["w", "api.php"])?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.to_string())
    }

    /// Action API full-text search.
    pub fn search_url(&self, query: &str, limit: usize, lang: Option<&str>) -> Result<String> {
        let limit = limit.clamp(1, SEARCH_LIMIT_MAX).to_string();
        self.action_api(
            lang,
            &[
                ("action", "query"),
                ("format", "json"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("utf8", "1"),
                ("maxlag", "5"),
            ],
        )
    }

    /// REST v1 page search (`/w/rest.php/v1/search/page`).
    pub fn rest_search_url(&self, query: &str, limit: usize, lang: Option<&str>) -> Result<String> {
        let mut url = self.endpoint(lang, &["w", "rest.php", "v1", "search", "page"])?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("limit", &limit.clamp(1, REST_SEARCH_LIMIT_MAX).to_string());
        Ok(url.to_string())
    }

    /// Intro-only plain-text extract via the Action API.
    pub fn extract_url(&self, title: &str, lang: Option<&str>) -> Result<String> {
        self.action_api(
            lang,
            &[
                ("action", "query"),
                ("format", "json"),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("titles", title),
                ("utf8", "1"),
                ("redirects", "1"),
                ("maxlag", "5"),
            ],
        )
    }

    /// REST summary (`/api/rest_v1/page/summary/{title}`).
    pub fn summary_url(&self, title: &str, lang: Option<&str>) -> Result<String> {
        let title = path_title(title)?;
        Ok(self
            .endpoint(lang, &["api", "rest_v1", "page", "summary", title])?
            .to_string())
    }

    /// Action API parse, rendered HTML under `parse.text["*"]`.
    pub fn parse_html_url(&self, title: &str, lang: Option<&str>) -> Result<String> {
        self.action_api(
            lang,
            &[
                ("action", "parse"),
                ("format", "json"),
                ("page", title),
                ("redirects", "1"),
                ("maxlag", "5"),
            ],
        )
    }

    /// REST v1 HTML (`/w/rest.php/v1/page/{title}/html`).
    pub fn rest_html_url(&self, title: &str, lang: Option<&str>) -> Result<String> {
        let title = path_title(title)?;
        Ok(self
            .endpoint(lang, &["w", "rest.php", "v1", "page", title, "html"])?
            .to_string())
    }
}

/// `url` drops dot segments, and neither is a valid page title anyway.
fn path_title(title: &str) -> Result<&str> {
    match title {
        "." | ".." => Err(Error::InvalidUrl(format!("invalid page title: {title:?}"))),
        _ => Ok(title),
    }
}
