//! 请求日志中间件：每个请求分配 trace_id，记录出入两条结构化日志，
//! 并在响应头回传 `X-Trace-Id` 供调用方关联。

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Trace ID carried through request extensions.
///
/// A newtype rather than a bare `String`, so no other extension can
/// shadow it and a missing extension fails extraction loudly instead of
/// producing a confusing 500.
#[derive(Clone)]
pub struct TraceId(pub String);

impl TraceId {
    /// 8 random bytes rendered as 16 hex characters.
    fn generate() -> Self {
        let bytes: [u8; 8] = rand::thread_rng().gen();
        let mut s = String::with_capacity(16);
        for b in bytes {
            let _ = write!(s, "{b:02x}");
        }
        TraceId(s)
    }
}

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// 日志中正文片段的最大长度
const BODY_SNIPPET_LIMIT: usize = 200;

/// Renders at most `limit` bytes of a body for the log line, backing up
/// to a char boundary so multi-byte characters are never split.
fn body_snippet(bytes: &[u8], limit: usize) -> String {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return "<non-utf8 body>".to_string();
    };
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn format_elapsed(micros: u128) -> String {
    if micros < 1000 {
        format!("{micros}µs")
    } else if micros < 1_000_000 {
        format!("{}ms", micros / 1000)
    } else {
        format!("{:.1}s", micros as f64 / 1_000_000.0)
    }
}

/// Buffers the request body so it can be both logged and replayed to
/// the handler. Bodies above 1 MiB are logged empty rather than held.
async fn buffer_request(req: Request, limit: usize) -> (Request, String) {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, 1024 * 1024)
        .await
        .unwrap_or_default();
    let snippet = if bytes.is_empty() {
        String::new()
    } else {
        body_snippet(&bytes, limit)
    };
    (Request::from_parts(parts, Body::from(bytes)), snippet)
}

/// Request/response logging middleware.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = TraceId::generate();
    req.extensions_mut().insert(trace_id.clone());

    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path().to_string();

    // Swagger UI 静态资源不记日志
    if path.starts_with("/docs") {
        return next.run(req).await;
    }

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    // Security event payloads can carry prompt excerpts and user
    // identifiers; never log their bodies.
    let is_sensitive = path.starts_with("/v1/security/events");

    let wants_body_log =
        !is_sensitive && matches!(method.as_str(), "POST" | "PUT" | "PATCH");
    let (req, req_snippet) = if wants_body_log {
        buffer_request(req, BODY_SNIPPET_LIMIT).await
    } else {
        (req, String::new())
    };

    let url = match uri.query() {
        Some(q) => format!("{path}?{q}"),
        None => path.clone(),
    };

    if req_snippet.is_empty() {
        tracing::info!(
            trace_id = %trace_id.0,
            method = %method,
            path = %url,
            ua = %user_agent,
            "--> request"
        );
    } else {
        tracing::info!(
            trace_id = %trace_id.0,
            method = %method,
            path = %url,
            body = %req_snippet,
            ua = %user_agent,
            "--> request"
        );
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = format_elapsed(start.elapsed().as_micros());
    let status = response.status();

    // Buffer the response so the JSON envelope can appear in the log.
    let (parts, body) = response.into_parts();
    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let resp_snippet = if !is_sensitive && is_json && !body_bytes.is_empty() {
        body_snippet(&body_bytes, BODY_SNIPPET_LIMIT)
    } else {
        String::new()
    };

    // 按状态码分级：5xx error，4xx warn，其余 info
    let code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(
            trace_id = %trace_id.0,
            status = code,
            elapsed = %elapsed,
            body = %resp_snippet,
            "<-- response"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            trace_id = %trace_id.0,
            status = code,
            elapsed = %elapsed,
            body = %resp_snippet,
            "<-- response"
        );
    } else if resp_snippet.is_empty() {
        tracing::info!(
            trace_id = %trace_id.0,
            status = code,
            elapsed = %elapsed,
            "<-- response"
        );
    } else {
        tracing::info!(
            trace_id = %trace_id.0,
            status = code,
            elapsed = %elapsed,
            body = %resp_snippet,
            "<-- response"
        );
    }

    let mut response = Response::from_parts(parts, Body::from(body_bytes));
    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", val);
    }
    response
}
