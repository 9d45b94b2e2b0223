use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        CallToolResult, ListResourceTemplatesResult, PaginatedRequestParam,
        ReadResourceRequestParam, ReadResourceResult, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, RoleServer, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use wikipipe_local::urls::{normalize_lang, validate_lang, SEARCH_LIMIT_MAX};
use wikipipe_local::WikiClient;

mod envelope;
#[cfg(feature = "http")]
pub(crate) mod http;
pub(crate) mod resources;
use envelope::*;

pub(crate) const DEFAULT_SEARCH_LIMIT: u32 = 5;

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct SearchWikipediaArgs {
    /// Free-text search query (required, non-empty).
    #[serde(default)]
    query: Option<String>,
    /// Max results (1..=50, default 5).
    #[serde(default)]
    limit: Option<u32>,
    /// Wiki language code, e.g. "en", "de", "zh-yue" (default "en").
    #[serde(default)]
    lang: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct PageArgs {
    /// Exact page title (required, non-empty).
    #[serde(default)]
    title: Option<String>,
    /// Wiki language code (default "en").
    #[serde(default)]
    lang: Option<String>,
}

/// Shared argument checks. The error is the tool-level failure to return as-is.
fn required_text(
    kind: &str,
    field: &str,
    value: Option<&str>,
    request: &serde_json::Value,
    t0: std::time::Instant,
) -> Result<String, CallToolResult> {
    match value.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Ok(s.to_string()),
        None => Err(tool_error(
            kind,
            ErrorCode::InvalidParams,
            format!("{field} must be a non-empty string"),
            request.clone(),
            t0.elapsed().as_millis(),
        )),
    }
}

fn checked_lang(
    kind: &str,
    lang: Option<&str>,
    request: &serde_json::Value,
    t0: std::time::Instant,
) -> Result<Option<String>, CallToolResult> {
    match lang.map(str::trim).filter(|l| !l.is_empty()) {
        None => Ok(None),
        Some(l) => match validate_lang(l) {
            Ok(()) => Ok(Some(l.to_ascii_lowercase())),
            Err(e) => Err(tool_error(
                kind,
                ErrorCode::from(&e),
                e,
                request.clone(),
                t0.elapsed().as_millis(),
            )),
        },
    }
}

#[derive(Clone)]
pub(crate) struct WikipipeMcp {
    tool_router: RmcpToolRouter<Self>,
    client: WikiClient,
}

#[tool_router]
impl WikipipeMcp {
    pub(crate) fn new(client: WikiClient) -> Self {
        Self {
            tool_router: Self::tool_router(),
            client,
        }
    }

    #[tool(description = "Search Wikipedia articles by text query")]
    async fn search_wikipedia(
        &self,
        params: Parameters<Option<SearchWikipediaArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let kind = "search_wikipedia";
        let args = params.0.unwrap_or_default();
        let request = serde_json::json!({
            "query": args.query,
            "limit": args.limit,
            "lang": args.lang,
        });
        let query = match required_text(kind, "query", args.query.as_deref(), &request, t0) {
            Ok(q) => q,
            Err(r) => return Ok(r),
        };
        let limit = args.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        if !(1..=SEARCH_LIMIT_MAX as u32).contains(&limit) {
            return Ok(tool_error(
                kind,
                ErrorCode::InvalidParams,
                format!("limit must be within 1..={SEARCH_LIMIT_MAX} (got {limit})"),
                request,
                t0.elapsed().as_millis(),
            ));
        }
        let lang = match checked_lang(kind, args.lang.as_deref(), &request, t0) {
            Ok(l) => l,
            Err(r) => return Ok(r),
        };

        let hits = self
            .client
            .search(&query, limit as usize, lang.as_deref())
            .await;
        tracing::info!(kind, hits = hits.len(), "tool call");
        let mut payload = serde_json::json!({
            "ok": true,
            "request": request,
            "lang": normalize_lang(lang.as_deref()),
            "results": hits,
        });
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }

    #[tool(description = "Get the plain-text lead section (summary) for a page title")]
    async fn get_page_extract(
        &self,
        params: Parameters<Option<PageArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let kind = "get_page_extract";
        let args = params.0.unwrap_or_default();
        let request = serde_json::json!({ "title": args.title, "lang": args.lang });
        let title = match required_text(kind, "title", args.title.as_deref(), &request, t0) {
            Ok(t) => t,
            Err(r) => return Ok(r),
        };
        let lang = match checked_lang(kind, args.lang.as_deref(), &request, t0) {
            Ok(l) => l,
            Err(r) => return Ok(r),
        };

        let extract = self.client.get_extract(&title, lang.as_deref()).await;
        if extract.is_empty() {
            tracing::info!(kind, title = title.as_str(), "no extract");
            return Ok(tool_error(
                kind,
                ErrorCode::NotFound,
                format!("No extract found for '{title}'."),
                request,
                t0.elapsed().as_millis(),
            ));
        }
        let mut payload = serde_json::json!({
            "ok": true,
            "request": request,
            "title": title,
            "lang": normalize_lang(lang.as_deref()),
            "extract": extract,
        });
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }

    #[tool(description = "Get full HTML for a page title (may be large)")]
    async fn get_page_html(
        &self,
        params: Parameters<Option<PageArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let kind = "get_page_html";
        let args = params.0.unwrap_or_default();
        let request = serde_json::json!({ "title": args.title, "lang": args.lang });
        let title = match required_text(kind, "title", args.title.as_deref(), &request, t0) {
            Ok(t) => t,
            Err(r) => return Ok(r),
        };
        let lang = match checked_lang(kind, args.lang.as_deref(), &request, t0) {
            Ok(l) => l,
            Err(r) => return Ok(r),
        };

        // Both sources failing is a protocol error, not a tool-level one.
        let html = self
            .client
            .get_html(&title, lang.as_deref())
            .await
            .map_err(|e| {
                tracing::warn!(kind, title = title.as_str(), error = %e, "html lookup failed");
                McpError::internal_error(
                    e.to_string(),
                    Some(serde_json::json!({
                        "code": ErrorCode::from(&e).as_str(),
                        "title": title,
                    })),
                )
            })?;
        let mut payload = serde_json::json!({
            "ok": true,
            "request": request,
            "title": title,
            "lang": normalize_lang(lang.as_deref()),
            "html": html,
        });
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }

    /// Resource read: the extract text, `""` when nothing was found.
    pub(crate) async fn read_page_uri(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let page = resources::resolve_uri(uri)?;
        let text = if page.title.is_empty() {
            String::new()
        } else {
            self.client
                .get_extract(&page.title, page.lang.as_deref())
                .await
        };
        resources::text_contents(uri, text)
    }
}

#[tool_handler]
impl rmcp::ServerHandler for WikipipeMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Read-only Wikipedia lookups: search, plain-text extracts and full HTML. Tool outputs are JSON and schema-versioned; extracts are also readable as wiki://page/{title} resources."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_resources()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        resources::templates()
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        self.read_page_uri(&request.uri).await
    }
}

pub(crate) async fn serve_stdio(client: WikiClient) -> Result<(), McpError> {
    let svc = WikipipeMcp::new(client);
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    // Keep the stdio server alive until the client closes.
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}
