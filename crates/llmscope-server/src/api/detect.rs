use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use llmscope_detect::rule::RuleKind;
use llmscope_detect::security::SecurityBufferStats;
use llmscope_storage::StorageError;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::{error_response, success_response, ApiError};
use crate::config::EvaluatorConfig;
use crate::logging::TraceId;
use crate::pipeline::cycle::CycleSummary;
use crate::state::AppState;

/// 检测子系统状态
#[derive(Serialize, ToSchema)]
pub struct DetectStatusResponse {
    /// 运行时长（秒）
    uptime_secs: i64,
    /// 启用的规则数
    enabled_rules: u64,
    /// 规则总数
    total_rules: u64,
    /// 活跃事件数（open + acknowledged）
    active_incidents: u64,
    /// 评估器设置
    evaluator: EvaluatorConfig,
    /// 安全事件缓冲区状态
    security: SecurityBufferStats,
    /// 进程内调度器是否启用
    scheduler_enabled: bool,
    /// 最近一次周期摘要（尚未运行过则为 null）
    last_cycle: Option<CycleSummary>,
    /// 最近一次周期完成时间
    last_cycle_at: Option<DateTime<Utc>>,
}

/// 获取检测子系统状态。
#[utoipa::path(
    get,
    path = "/v1/detect",
    tag = "Detection",
    security(("cron_secret" = [])),
    responses(
        (status = 200, description = "检测子系统状态", body = DetectStatusResponse),
        (status = 401, description = "缺少或无效的 x-cron-secret", body = ApiError),
        (status = 500, description = "存储错误", body = ApiError)
    )
)]
pub async fn detect_status(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let enabled_rules = match state.control.count_alert_rules(Some(true)).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "Failed to count enabled rules");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Failed to count alert rules",
            );
        }
    };
    let total_rules = match state.control.count_alert_rules(None).await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "Failed to count rules");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Failed to count alert rules",
            );
        }
    };
    let active_incidents = match state.control.count_active_incidents().await {
        Ok(n) => n,
        Err(e) => {
            tracing::error!(error = %e, "Failed to count active incidents");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Failed to count incidents",
            );
        }
    };

    let (last_cycle, last_cycle_at) = {
        let guard = state.lock_last_cycle();
        match guard.as_ref() {
            Some(last) => (Some(last.summary.clone()), Some(last.finished_at)),
            None => (None, None),
        }
    };

    success_response(
        StatusCode::OK,
        &trace_id,
        DetectStatusResponse {
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            enabled_rules,
            total_rules,
            active_incidents,
            evaluator: state.config.evaluator,
            security: state.security.stats(),
            scheduler_enabled: state.config.scheduler.enabled,
            last_cycle,
            last_cycle_at,
        },
    )
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RunParams {
    /// 只评估该类型的规则（threshold | anomaly）；缺省为全部
    pub kind: Option<String>,
}

/// The 500 path: the cycle could not even fetch its rules.
fn cycle_failure_response(trace_id: &str, err: &StorageError) -> Response {
    tracing::error!(error = %err, "Detection cycle aborted");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        trace_id,
        "storage_error",
        "Detection cycle aborted: failed to load alert rules",
    )
}

/// 立即运行一个检测周期。
/// 外部 cron 的触发入口；规则级错误不会使请求失败，而是以 207 返回。
#[utoipa::path(
    post,
    path = "/v1/detect/run",
    tag = "Detection",
    security(("cron_secret" = [])),
    params(RunParams),
    responses(
        (status = 200, description = "周期完成，无规则级错误", body = CycleSummary),
        (status = 207, description = "周期完成，部分规则出错", body = CycleSummary),
        (status = 400, description = "无效的 kind 参数", body = ApiError),
        (status = 401, description = "缺少或无效的 x-cron-secret", body = ApiError),
        (status = 500, description = "规则加载失败，周期中止", body = ApiError)
    )
)]
pub async fn run_detection(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> impl IntoResponse {
    let kind = match params.kind.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<RuleKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e);
            }
        },
    };

    let summary = match state.cycle.run_at(Utc::now(), kind).await {
        Ok(summary) => summary,
        Err(e) => return cycle_failure_response(&trace_id, &e),
    };

    state.record_cycle(kind, summary.clone());

    let status = if summary.errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    success_response(status, &trace_id, summary)
}
