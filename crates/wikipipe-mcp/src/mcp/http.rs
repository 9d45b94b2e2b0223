//! Streamable HTTP transport: MCP sessions keyed by `Mcp-Session-Id`, served at `/mcp`.

use super::WikipipeMcp;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use wikipipe_local::WikiClient;

pub(crate) const MCP_PATH: &str = "/mcp";
const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_HEADER: &str = "mcp-protocol-version";

/// Host/Origin allow-lists. Checked only when DNS-rebinding protection is on;
/// the origin list also drives CORS.
#[derive(Debug, Clone)]
pub(crate) struct HttpGuard {
    allowed_hosts: Vec<String>,
    allowed_origins: Vec<String>,
    dns_rebinding_protection: bool,
}

impl HttpGuard {
    pub(crate) fn new(
        allowed_hosts: &[String],
        allowed_origins: &[String],
        dns_rebinding_protection: bool,
    ) -> Self {
        let clean = |xs: &[String]| -> Vec<String> {
            xs.iter()
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect()
        };
        Self {
            allowed_hosts: clean(allowed_hosts),
            allowed_origins: clean(allowed_origins),
            dns_rebinding_protection,
        }
    }

    fn any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Matches the full `Host` value or just its hostname part.
    fn host_allowed(&self, host: Option<&str>) -> bool {
        let Some(host) = host.map(str::trim).filter(|h| !h.is_empty()) else {
            return false;
        };
        let name = hostname(host);
        self.allowed_hosts
            .iter()
            .any(|a| a.eq_ignore_ascii_case(host) || a.eq_ignore_ascii_case(name))
    }

    /// Requests without `Origin` (non-browser clients) pass.
    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(o) => {
                self.any_origin() || self.allowed_origins.iter().any(|a| a.eq_ignore_ascii_case(o))
            }
        }
    }

    fn cors(&self) -> CorsLayer {
        let origin = if self.any_origin() {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(
                self.allowed_origins
                    .iter()
                    .filter_map(|o| HeaderValue::from_str(o).ok()),
            )
        };
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static(SESSION_HEADER),
                HeaderName::from_static(PROTOCOL_HEADER),
            ])
            .expose_headers([HeaderName::from_static(SESSION_HEADER)])
    }
}

fn hostname(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn guard_requests(State(guard): State<Arc<HttpGuard>>, req: Request, next: Next) -> Response {
    if guard.dns_rebinding_protection {
        let host = header_str(req.headers(), header::HOST);
        if !guard.host_allowed(host) {
            tracing::warn!(host = host.unwrap_or(""), "rejected request: host not allowed");
            return (StatusCode::FORBIDDEN, "Invalid Host header").into_response();
        }
        let origin = header_str(req.headers(), header::ORIGIN);
        if !guard.origin_allowed(origin) {
            tracing::warn!(origin = origin.unwrap_or(""), "rejected request: origin not allowed");
            return (StatusCode::FORBIDDEN, "Invalid Origin header").into_response();
        }
    }
    next.run(req).await
}

/// One `WikipipeMcp` per session; all sessions share the client (cache and limiter).
pub(crate) fn router(client: WikiClient, guard: HttpGuard) -> Router {
    let service = StreamableHttpService::new(
        move || Ok(WikipipeMcp::new(client.clone())),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );
    let cors = guard.cors();
    Router::new()
        .nest_service(MCP_PATH, service)
        .layer(middleware::from_fn_with_state(Arc::new(guard), guard_requests))
        .layer(cors)
}

pub(crate) async fn serve_http(
    client: WikiClient,
    addr: SocketAddr,
    guard: HttpGuard,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::info!(%local, path = MCP_PATH, "serving MCP over streamable HTTP");
    axum::serve(listener, router(client, guard))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
