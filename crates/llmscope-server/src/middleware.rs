use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::api::error_response;
use crate::logging::TraceId;
use crate::state::AppState;

/// Header carrying the shared scheduler secret.
static CRON_SECRET_HEADER: HeaderName = HeaderName::from_static("x-cron-secret");

/// Middleware that validates the `x-cron-secret` request header.
///
/// Every endpoint except `/v1/health` sits behind this check. The expected
/// value comes from `server.cron_secret`, which startup validation
/// guarantees to be non-empty.
pub async fn cron_secret_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let trace_id = req
        .extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default();

    let provided = req
        .headers()
        .get(&CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(secret) if secret == state.config.server.cron_secret => next.run(req).await,
        Some(_) => {
            tracing::warn!(
                trace_id = %trace_id,
                path = %req.uri().path(),
                "Request rejected: invalid x-cron-secret"
            );
            error_response(
                StatusCode::UNAUTHORIZED,
                &trace_id,
                "unauthorized",
                "invalid x-cron-secret",
            )
        }
        None => {
            tracing::warn!(
                trace_id = %trace_id,
                path = %req.uri().path(),
                "Request rejected: missing x-cron-secret header"
            );
            error_response(
                StatusCode::UNAUTHORIZED,
                &trace_id,
                "unauthorized",
                "missing x-cron-secret header",
            )
        }
    }
}
