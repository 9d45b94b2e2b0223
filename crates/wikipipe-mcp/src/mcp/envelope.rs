use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use wikipipe_core::Error;

pub(crate) const SCHEMA_VERSION: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorCode {
    InvalidParams,
    InvalidLanguage,
    NotFound,
    FetchFailed,
    RateLimited,
    DeadlineExceeded,
}

impl ErrorCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::InvalidLanguage => "invalid_language",
            Self::NotFound => "not_found",
            Self::FetchFailed => "fetch_failed",
            Self::RateLimited => "rate_limited",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    pub(crate) fn retryable(self) -> bool {
        match self {
            Self::FetchFailed | Self::RateLimited | Self::DeadlineExceeded => true,
            // Bad input and missing pages stay that way until the caller changes something.
            Self::InvalidParams | Self::InvalidLanguage | Self::NotFound => false,
        }
    }

    pub(crate) fn hint(self) -> &'static str {
        match self {
            Self::InvalidParams => "Check the tool arguments (non-empty text, limit within 1..=50).",
            Self::InvalidLanguage => {
                "Use a wiki language code such as \"en\", \"de\" or \"zh-yue\"."
            }
            Self::NotFound => "Check the exact page title, or call search_wikipedia first.",
            Self::FetchFailed => "The upstream request failed; retry later.",
            Self::RateLimited => "The upstream is rate-limiting; wait before retrying.",
            Self::DeadlineExceeded => "The request ran out of time; retry later.",
        }
    }
}

impl From<&Error> for ErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::InvalidLanguage(_) => Self::InvalidLanguage,
            Error::InvalidUrl(_) => Self::InvalidParams,
            Error::Http { status: 429, .. } => Self::RateLimited,
            Error::Http { status: 404, .. } | Error::NoHtml(_) => Self::NotFound,
            Error::Http { .. } | Error::Fetch(_) | Error::Decode(_) => Self::FetchFailed,
            Error::DeadlineExceeded(_) => Self::DeadlineExceeded,
        }
    }
}

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
    if payload.get("request").is_none() {
        payload["request"] = serde_json::Value::Null;
    }
}

pub(crate) fn error_obj(code: ErrorCode, message: impl ToString) -> serde_json::Value {
    #[derive(Serialize)]
    struct ErrorObject {
        code: &'static str,
        message: String,
        hint: &'static str,
        retryable: bool,
    }

    let message = message.to_string();
    serde_json::to_value(ErrorObject {
        code: code.as_str(),
        message: message.clone(),
        hint: code.hint(),
        retryable: code.retryable(),
    })
    .unwrap_or_else(|_| {
        serde_json::json!({
            "code": code.as_str(),
            "message": message,
            "hint": code.hint(),
            "retryable": code.retryable()
        })
    })
}

/// Structured content for machine consumers plus a JSON text copy for clients that
/// only read `content[0].text`.
pub(crate) fn tool_result(payload: serde_json::Value) -> CallToolResult {
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

/// Tool-level failure: `ok=false` payload, `is_error=true`, not a protocol error.
pub(crate) fn tool_error(
    kind: &str,
    code: ErrorCode,
    message: impl ToString,
    request: serde_json::Value,
    elapsed_ms: u128,
) -> CallToolResult {
    let mut payload = serde_json::json!({
        "ok": false,
        "request": request,
        "error": error_obj(code, message),
    });
    add_envelope_fields(&mut payload, kind, elapsed_ms);
    let mut r = tool_result(payload);
    r.is_error = Some(true);
    r
}
