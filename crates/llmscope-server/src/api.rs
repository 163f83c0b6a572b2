pub mod detect;
pub mod ingest;

use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// 错误响应（OpenAPI 文档用）
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    /// 业务错误码
    pub err_code: i32,
    /// 错误描述
    pub err_msg: String,
    /// 链路追踪 ID
    pub trace_id: String,
}

/// 统一响应包裹：成功时 `err_code=0`，`data` 携带业务数据；
/// 失败时 `data` 为 null。
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    let envelope = ApiResponse {
        err_code: 0,
        err_msg: "success".to_string(),
        trace_id: trace_id.to_string(),
        data: Some(data),
    };
    (status, Json(envelope)).into_response()
}

/// 业务错误码表。HTTP 状态码表达传输层语义，err_code 表达业务语义。
fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "unauthorized" => 1002,
        "not_found" => 1404,
        "storage_error" => 1501,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    let envelope = ApiResponse::<Value> {
        err_code: to_custom_error_code(code),
        err_msg: msg.to_string(),
        trace_id: trace_id.to_string(),
        data: None,
    };
    (status, Json(envelope)).into_response()
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
struct HealthResponse {
    /// 服务版本号
    version: String,
    /// 运行时长（秒）
    uptime_secs: i64,
    /// 存储状态
    storage_status: String,
}

/// 获取服务健康状态。
/// 鉴权：无需 x-cron-secret 请求头。
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "服务健康状态", body = HealthResponse)
    )
)]
async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let uptime = (Utc::now() - state.start_time).num_seconds();
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: uptime,
            storage_status: "ok".to_string(),
        },
    )
}

pub fn public_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(health))
}

pub fn protected_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(detect::detect_status))
        .routes(routes!(detect::run_detection))
        .routes(routes!(ingest::ingest_metrics))
        .routes(routes!(ingest::ingest_llm))
        .routes(routes!(ingest::security_events))
}
