//! Local fixture standing in for the encyclopedia upstream (offline, deterministic).
#![allow(dead_code)]

use axum::{
    extract::{Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;

pub const PARIS_EXTRACT: &str = "Paris is the capital and largest city of France.";
pub const MADRID_SUMMARY: &str = "Madrid is the capital of Spain.";
pub const PARIS_HTML: &str = "<html><body><h1>Paris</h1></body></html>";

async fn action_api(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    let get = |k: &str| q.get(k).map(String::as_str).unwrap_or("");
    let body = match (get("action"), get("list"), get("prop")) {
        ("query", "search", _) if get("srsearch") == "paris" => serde_json::json!({
            "query": {"search": [
                {"title": "Paris", "pageid": 22989, "snippet": "capital of <span>France</span>",
                 "wordcount": 9000, "size": 200000, "timestamp": "2024-05-01T00:00:00Z"}
            ]}
        }),
        ("query", "search", _) => serde_json::json!({"query": {"search": []}}),
        ("query", _, "extracts") if get("titles") == "Paris" => serde_json::json!({
            "query": {"pages": {"22989": {"pageid": 22989, "title": "Paris", "extract": PARIS_EXTRACT}}}
        }),
        ("query", _, "extracts") => serde_json::json!({
            "query": {"pages": {"-1": {"title": get("titles"), "missing": ""}}}
        }),
        ("parse", _, _) => serde_json::json!({
            "error": {"code": "missingtitle", "info": "The page you specified doesn't exist."}
        }),
        _ => return (StatusCode::BAD_REQUEST, "unknown action").into_response(),
    };
    Json(body).into_response()
}

async fn summary(Path(title): Path<String>) -> impl IntoResponse {
    if title == "Madrid" {
        Json(serde_json::json!({"title": "Madrid", "extract": MADRID_SUMMARY})).into_response()
    } else {
        (StatusCode::NOT_FOUND, "not found").into_response()
    }
}

async fn rest_html(Path(title): Path<String>) -> impl IntoResponse {
    if title == "Paris" {
        ([(header::CONTENT_TYPE, "text/html")], PARIS_HTML).into_response()
    } else {
        (StatusCode::NOT_FOUND, "not found").into_response()
    }
}

async fn rest_search(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    let pages = if q.get("q").map(String::as_str) == Some("ferris") {
        serde_json::json!([{"id": 7, "title": "Ferris", "excerpt": "a crab"}])
    } else {
        serde_json::json!([])
    };
    Json(serde_json::json!({ "pages": pages }))
}

pub fn app() -> Router {
    Router::new()
        .route("/w/api.php", get(action_api))
        .route("/api/rest_v1/page/summary/:title", get(summary))
        .route("/w/rest.php/v1/page/:title/html", get(rest_html))
        .route("/w/rest.php/v1/search/page", get(rest_search))
}

/// Bind on an ephemeral port and serve in the background of the current runtime.
pub async fn serve() -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app()).await.expect("axum serve");
    });
    Ok(addr)
}
