#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use llmscope_common::types::{LlmCallStatus, LlmRequestRecord, MetricBatch, MetricPoint};
use llmscope_detect::security::{SecurityMonitor, SecurityMonitorConfig, SecurityThresholds};
use llmscope_notify::queue::{DeliveryJob, DeliveryQueue};
use llmscope_server::app;
use llmscope_server::config::ServerConfig;
use llmscope_server::pipeline::{DetectionCycle, Dispatcher};
use llmscope_server::state::AppState;
use llmscope_storage::control::{ChannelRow, NewAlertRule, NewChannel};
use llmscope_storage::{ControlStore, SqliteTelemetryStore, TelemetryStore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
    /// No delivery worker runs in tests. Holding the receiver keeps the
    /// queue open so dispatched jobs land as pending notification rows
    /// and can be inspected here.
    pub delivery_rx: mpsc::Receiver<DeliveryJob>,
}

static INIT_IDS: Once = Once::new();

pub async fn build_test_context() -> Result<TestContext> {
    // 重复 init 会重置序列号，并发用例下只装一次
    INIT_IDS.call_once(|| llmscope_common::id::init(1, 1));

    let temp_dir = tempfile::tempdir()?;
    let db_url = format!(
        "sqlite://{}/control.db?mode=rwc",
        temp_dir.path().to_string_lossy()
    );
    let control = Arc::new(ControlStore::new(&db_url).await?);
    let telemetry: Arc<dyn TelemetryStore> =
        Arc::new(SqliteTelemetryStore::new(temp_dir.path())?);

    let mut config = ServerConfig::default();
    config.server.cron_secret = "test-secret".to_string();

    let security = Arc::new(SecurityMonitor::new(SecurityMonitorConfig {
        window_minutes: config.security.window_minutes,
        horizon_hours: config.security.horizon_hours,
        max_events: config.security.max_events,
        thresholds: SecurityThresholds::default(),
    }));

    let (queue, delivery_rx) = DeliveryQueue::new(64);
    let dispatcher = Arc::new(Dispatcher::new(control.clone(), queue));
    let cycle = Arc::new(DetectionCycle::new(
        control.clone(),
        telemetry.clone(),
        dispatcher.clone(),
        &config,
    ));

    let state = AppState {
        control,
        telemetry,
        security,
        dispatcher,
        cycle,
        last_cycle: Arc::new(Mutex::new(None)),
        start_time: Utc::now(),
        config: Arc::new(config),
    };

    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
        delivery_rx,
    })
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    secret: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(secret) = secret {
        builder = builder.header("x-cron-secret", secret);
    }
    builder = builder.header("Content-Type", "application/json");

    let req_body = body.unwrap_or(Value::Null).to_string();
    let req = builder
        .body(Body::from(req_body))
        .expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
    secret: Option<&str>,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(secret) = secret {
        builder = builder.header("x-cron-secret", secret);
    }

    let req = builder.body(Body::empty()).expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub fn assert_ok_envelope(json: &Value) {
    assert_eq!(json["err_code"], 0);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
}

pub fn assert_err_envelope(json: &Value, err_code: i32) {
    assert_eq!(json["err_code"], err_code);
    assert!(json["err_msg"].is_string());
    assert!(json.get("trace_id").is_some());
    assert!(json.get("data").is_some());
    assert!(json["data"].is_null());
}

pub fn threshold_rule(name: &str, metric: &str, operator: &str, value: f64) -> NewAlertRule {
    NewAlertRule {
        project_id: "proj-a".to_string(),
        name: name.to_string(),
        description: None,
        metric: metric.to_string(),
        aggregation: "avg".to_string(),
        rule_type: "threshold".to_string(),
        config_json: format!(r#"{{"operator":"{operator}","value":{value}}}"#),
        window_minutes: 5,
        severity: "warning".to_string(),
        channels_json: "[]".to_string(),
        cooldown_minutes: 0,
        enabled: true,
    }
}

pub fn anomaly_rule(name: &str, metric: &str) -> NewAlertRule {
    NewAlertRule {
        rule_type: "anomaly".to_string(),
        config_json: r#"{"deviation_threshold":3.0,"min_samples":10}"#.to_string(),
        ..threshold_rule(name, metric, "gt", 0.0)
    }
}

pub async fn insert_webhook_channel(control: &ControlStore, name: &str) -> Result<ChannelRow> {
    let row = control
        .insert_channel(&NewChannel {
            name: name.to_string(),
            channel_type: "webhook".to_string(),
            config_json: r#"{"url":"https://alerts.example.com/hook"}"#.to_string(),
            min_severity: "info".to_string(),
            enabled: true,
        })
        .await?;
    Ok(row)
}

pub fn metric_point(project_id: &str, name: &str, value: f64, at: DateTime<Utc>) -> MetricPoint {
    MetricPoint {
        id: llmscope_common::id::next_id(),
        timestamp: at,
        project_id: project_id.to_string(),
        name: name.to_string(),
        value,
        labels: HashMap::new(),
        created_at: at,
        updated_at: at,
    }
}

pub fn write_metric_values(
    telemetry: &Arc<dyn TelemetryStore>,
    project_id: &str,
    name: &str,
    values: &[(DateTime<Utc>, f64)],
) -> Result<()> {
    let points = values
        .iter()
        .map(|(at, v)| metric_point(project_id, name, *v, *at))
        .collect();
    telemetry.write_metrics(&MetricBatch {
        project_id: project_id.to_string(),
        timestamp: Utc::now(),
        points,
    })?;
    Ok(())
}

pub fn llm_record(
    project_id: &str,
    latency_ms: f64,
    status: LlmCallStatus,
    at: DateTime<Utc>,
) -> LlmRequestRecord {
    LlmRequestRecord {
        id: llmscope_common::id::next_id(),
        timestamp: at,
        project_id: project_id.to_string(),
        model: "gpt-4o".to_string(),
        latency_ms,
        prompt_tokens: 120,
        completion_tokens: 80,
        total_tokens: 200,
        cost_usd: 0.004,
        status,
        error_type: match status {
            LlmCallStatus::Success => None,
            _ => Some("upstream_error".to_string()),
        },
        created_at: at,
        updated_at: at,
    }
}

pub fn write_llm_records(
    telemetry: &Arc<dyn TelemetryStore>,
    records: &[LlmRequestRecord],
) -> Result<()> {
    telemetry.write_llm_requests(records)?;
    Ok(())
}
