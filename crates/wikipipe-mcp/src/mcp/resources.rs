//! `wiki://` resource templates: plain-text extracts addressed by URI.

use rmcp::model::{ListResourceTemplatesResult, ReadResourceResult};
use rmcp::ErrorData as McpError;
use wikipipe_local::urls::validate_lang;

pub(crate) const SCHEME: &str = "wiki://";
pub(crate) const PAGE_TEMPLATE: &str = "wiki://page/{title}";
pub(crate) const PAGE_BY_LANG_TEMPLATE: &str = "wiki://{lang}/page/{title}";
const MIME_TEXT: &str = "text/plain";

/// A page addressed by a `wiki://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageRef {
    pub(crate) lang: Option<String>,
    pub(crate) title: String,
}

/// Match `wiki://page/{title}` or `wiki://{lang}/page/{title}`. The title is
/// percent-decoded and may contain `/`. `None` for any other shape.
pub(crate) fn parse_page_uri(uri: &str) -> Option<PageRef> {
    let rest = uri.strip_prefix(SCHEME)?;
    let (lang, raw_title) = match rest.strip_prefix("page/") {
        Some(t) => (None, t),
        None => {
            let (lang, tail) = rest.split_once('/')?;
            let t = tail.strip_prefix("page/")?;
            if lang.is_empty() {
                return None;
            }
            (Some(lang.to_string()), t)
        }
    };
    let title = urlencoding::decode(raw_title).ok()?.into_owned();
    Some(PageRef { lang, title })
}

fn from_json<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> Result<T, McpError> {
    serde_json::from_value(v).map_err(|e| McpError::internal_error(e.to_string(), None))
}

pub(crate) fn templates() -> Result<ListResourceTemplatesResult, McpError> {
    from_json(serde_json::json!({
        "resourceTemplates": [
            {
                "uriTemplate": PAGE_TEMPLATE,
                "name": "page",
                "title": "Wikipedia Page Extract",
                "description": "Plain-text extract for a Wikipedia page title",
                "mimeType": MIME_TEXT,
            },
            {
                "uriTemplate": PAGE_BY_LANG_TEMPLATE,
                "name": "page-by-lang",
                "title": "Wikipedia Page Extract (by language)",
                "description": "Plain-text extract for a Wikipedia page title on a given language wiki",
                "mimeType": MIME_TEXT,
            }
        ]
    }))
}

pub(crate) fn text_contents(uri: &str, text: String) -> Result<ReadResourceResult, McpError> {
    from_json(serde_json::json!({
        "contents": [{ "uri": uri, "mimeType": MIME_TEXT, "text": text }]
    }))
}

/// Resolve a URI into the page to read, rejecting unknown shapes and bad languages.
pub(crate) fn resolve_uri(uri: &str) -> Result<PageRef, McpError> {
    let page = parse_page_uri(uri).ok_or_else(|| {
        McpError::resource_not_found(
            format!("unknown resource uri: {uri}"),
            Some(serde_json::json!({ "uri": uri })),
        )
    })?;
    if let Some(lang) = page.lang.as_deref() {
        validate_lang(lang).map_err(|e| {
            McpError::invalid_params(e.to_string(), Some(serde_json::json!({ "uri": uri })))
        })?;
    }
    Ok(page)
}
