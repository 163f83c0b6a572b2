use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use llmscope_common::id;
use llmscope_common::types::{
    LlmCallStatus, LlmRequestRecord, MetricBatch, MetricPoint, SecurityEvent, SecurityEventKind,
    Severity,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::api::{error_response, success_response, ApiError};
use crate::logging::TraceId;
use crate::state::AppState;

// ---- Generic metrics ----

/// 上报通用指标请求
#[derive(Deserialize, ToSchema)]
pub struct IngestMetricsRequest {
    /// 项目标识
    pub project_id: String,
    pub points: Vec<IngestMetricPoint>,
}

#[derive(Deserialize, ToSchema)]
pub struct IngestMetricPoint {
    /// 指标名
    pub name: String,
    pub value: f64,
    /// 缺省为服务器接收时间
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// 写入结果
#[derive(Serialize, ToSchema)]
pub struct IngestResponse {
    /// 写入的行数
    pub written: usize,
}

/// 上报通用指标点。
#[utoipa::path(
    post,
    path = "/v1/ingest/metrics",
    tag = "Ingest",
    security(("cron_secret" = [])),
    request_body = IngestMetricsRequest,
    responses(
        (status = 200, description = "写入成功", body = IngestResponse),
        (status = 400, description = "空批次", body = ApiError),
        (status = 401, description = "缺少或无效的 x-cron-secret", body = ApiError),
        (status = 500, description = "存储错误", body = ApiError)
    )
)]
pub async fn ingest_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<IngestMetricsRequest>,
) -> impl IntoResponse {
    if req.points.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "points must not be empty",
        );
    }

    let now = Utc::now();
    let points: Vec<MetricPoint> = req
        .points
        .into_iter()
        .map(|p| MetricPoint {
            id: id::next_id(),
            timestamp: p.timestamp.unwrap_or(now),
            project_id: req.project_id.clone(),
            name: p.name,
            value: p.value,
            labels: p.labels,
            created_at: now,
            updated_at: now,
        })
        .collect();
    let written = points.len();
    let batch = MetricBatch {
        project_id: req.project_id.clone(),
        timestamp: now,
        points,
    };

    if let Err(e) = state.telemetry.write_metrics(&batch) {
        tracing::error!(project_id = %req.project_id, error = %e, "Failed to write metrics");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &trace_id,
            "storage_error",
            "Failed to write metric points",
        );
    }

    success_response(StatusCode::OK, &trace_id, IngestResponse { written })
}

// ---- LLM request records ----

/// 上报 LLM 请求记录
#[derive(Deserialize, ToSchema)]
pub struct IngestLlmRequest {
    /// 项目标识
    pub project_id: String,
    pub requests: Vec<IngestLlmRecord>,
}

#[derive(Deserialize, ToSchema)]
pub struct IngestLlmRecord {
    /// 模型名（如 gpt-4o）
    pub model: String,
    /// 端到端延迟（毫秒）
    pub latency_ms: f64,
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    /// 缺省为 prompt_tokens + completion_tokens
    #[serde(default)]
    pub total_tokens: Option<i64>,
    #[serde(default)]
    pub cost_usd: f64,
    /// success | error
    pub status: LlmCallStatus,
    /// 失败分类（status 为 error 时有意义）
    #[serde(default)]
    pub error_type: Option<String>,
    /// 缺省为服务器接收时间
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// 上报 LLM 请求记录。
#[utoipa::path(
    post,
    path = "/v1/ingest/llm",
    tag = "Ingest",
    security(("cron_secret" = [])),
    request_body = IngestLlmRequest,
    responses(
        (status = 200, description = "写入成功", body = IngestResponse),
        (status = 400, description = "空批次", body = ApiError),
        (status = 401, description = "缺少或无效的 x-cron-secret", body = ApiError),
        (status = 500, description = "存储错误", body = ApiError)
    )
)]
pub async fn ingest_llm(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<IngestLlmRequest>,
) -> impl IntoResponse {
    if req.requests.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "requests must not be empty",
        );
    }

    let now = Utc::now();
    let records: Vec<LlmRequestRecord> = req
        .requests
        .into_iter()
        .map(|r| LlmRequestRecord {
            id: id::next_id(),
            timestamp: r.timestamp.unwrap_or(now),
            project_id: req.project_id.clone(),
            model: r.model,
            latency_ms: r.latency_ms,
            prompt_tokens: r.prompt_tokens,
            completion_tokens: r.completion_tokens,
            total_tokens: r.total_tokens.unwrap_or(r.prompt_tokens + r.completion_tokens),
            cost_usd: r.cost_usd,
            status: r.status,
            error_type: r.error_type,
            created_at: now,
            updated_at: now,
        })
        .collect();
    let written = records.len();

    if let Err(e) = state.telemetry.write_llm_requests(&records) {
        tracing::error!(project_id = %req.project_id, error = %e, "Failed to write LLM records");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &trace_id,
            "storage_error",
            "Failed to write LLM request records",
        );
    }

    success_response(StatusCode::OK, &trace_id, IngestResponse { written })
}

// ---- Security events ----

/// 上报安全事件请求
#[derive(Deserialize, ToSchema)]
pub struct SecurityEventsRequest {
    pub events: Vec<SecurityEventBody>,
}

#[derive(Deserialize, ToSchema)]
pub struct SecurityEventBody {
    /// 事件类型
    pub kind: SecurityEventKind,
    /// 事件级别
    pub severity: Severity,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// 事件详情（可能含敏感内容，不会出现在请求日志里）
    #[serde(default)]
    pub detail: Option<String>,
    /// 升级告警归属的项目，缺省 platform
    #[serde(default)]
    pub project_id: Option<String>,
    /// 缺省为服务器接收时间
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// 安全事件处理结果
#[derive(Serialize, ToSchema)]
pub struct SecurityEventsResponse {
    /// 进入滑动窗口缓冲的事件数
    pub accepted: usize,
    /// 触发的升级告警数
    pub escalations: usize,
}

/// 上报安全事件，升级的事件立即产生告警并通知。
#[utoipa::path(
    post,
    path = "/v1/security/events",
    tag = "Security",
    security(("cron_secret" = [])),
    request_body = SecurityEventsRequest,
    responses(
        (status = 200, description = "事件已缓冲", body = SecurityEventsResponse),
        (status = 400, description = "空批次", body = ApiError),
        (status = 401, description = "缺少或无效的 x-cron-secret", body = ApiError)
    )
)]
pub async fn security_events(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<SecurityEventsRequest>,
) -> impl IntoResponse {
    if req.events.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "events must not be empty",
        );
    }

    let now = Utc::now();
    let accepted = req.events.len();
    let mut escalations = 0usize;

    for body in req.events {
        let project_id = body
            .project_id
            .clone()
            .unwrap_or_else(|| "platform".to_string());
        let event = SecurityEvent {
            kind: body.kind,
            severity: body.severity,
            timestamp: body.timestamp.unwrap_or(now),
            user_id: body.user_id,
            ip: body.ip,
            detail: body.detail,
        };

        for escalation in state.security.log_event(event) {
            escalations += 1;
            tracing::warn!(
                kind = %escalation.event.kind,
                subject = %escalation.subject,
                severity = %escalation.severity,
                "Security escalation"
            );
            // A failed dispatch must not drop the remaining escalations
            if let Err(e) = state
                .dispatcher
                .dispatch_security_alert(&escalation, &project_id, now)
                .await
            {
                tracing::error!(
                    subject = %escalation.subject,
                    error = %e,
                    "Failed to dispatch security alert"
                );
            }
        }
    }

    success_response(
        StatusCode::OK,
        &trace_id,
        SecurityEventsResponse {
            accepted,
            escalations,
        },
    )
}
