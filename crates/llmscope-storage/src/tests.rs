use crate::control::{ControlStore, NewAlert, NewAlertRule, NewChannel, NewIncident, NewNotification};
use crate::engine::SqliteTelemetryStore;
use crate::TelemetryStore;
use chrono::{DateTime, Duration, Utc};
use llmscope_common::metric::LlmMetric;
use llmscope_common::types::{LlmCallStatus, LlmRequestRecord, MetricBatch, MetricPoint};
use std::collections::HashMap;
use std::sync::Once;
use tempfile::TempDir;

static INIT_IDS: Once = Once::new();

// init 会重建生成器并重置序列号，测试并发跑时只装一次，
// 保证同一毫秒内的 id 仍然单调。
fn init_ids() {
    INIT_IDS.call_once(|| llmscope_common::id::init(1, 1));
}

fn setup_engine() -> (TempDir, SqliteTelemetryStore) {
    init_ids();
    let dir = TempDir::new().unwrap();
    let engine = SqliteTelemetryStore::new(dir.path()).unwrap();
    (dir, engine)
}

async fn setup_control() -> (TempDir, ControlStore) {
    init_ids();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("control.db");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let store = ControlStore::new(&url).await.unwrap();
    (dir, store)
}

fn make_batch(project: &str, name: &str, values: &[(f64, i64)]) -> MetricBatch {
    let now = Utc::now();
    MetricBatch {
        project_id: project.to_string(),
        timestamp: now,
        points: values
            .iter()
            .map(|(value, secs_ago)| {
                let ts = now - Duration::seconds(*secs_ago);
                MetricPoint {
                    id: llmscope_common::id::next_id(),
                    timestamp: ts,
                    project_id: project.to_string(),
                    name: name.to_string(),
                    value: *value,
                    labels: HashMap::new(),
                    created_at: ts,
                    updated_at: ts,
                }
            })
            .collect(),
    }
}

fn make_llm_record(project: &str, ts: DateTime<Utc>, latency_ms: f64, is_error: bool) -> LlmRequestRecord {
    LlmRequestRecord {
        id: llmscope_common::id::next_id(),
        timestamp: ts,
        project_id: project.to_string(),
        model: "gpt-4o".to_string(),
        latency_ms,
        prompt_tokens: 120,
        completion_tokens: 80,
        total_tokens: 200,
        cost_usd: 0.004,
        status: if is_error {
            LlmCallStatus::Error
        } else {
            LlmCallStatus::Success
        },
        error_type: if is_error {
            Some("timeout".to_string())
        } else {
            None
        },
        created_at: ts,
        updated_at: ts,
    }
}

fn sample_rule(project: &str, name: &str) -> NewAlertRule {
    NewAlertRule {
        project_id: project.to_string(),
        name: name.to_string(),
        description: None,
        metric: "llm.latency_ms".to_string(),
        aggregation: "avg".to_string(),
        rule_type: "threshold".to_string(),
        config_json: r#"{"operator":"gt","value":1000.0}"#.to_string(),
        window_minutes: 5,
        severity: "warning".to_string(),
        channels_json: "[]".to_string(),
        cooldown_minutes: 10,
        enabled: true,
    }
}

#[test]
fn write_and_query_metric_values() {
    let (_dir, engine) = setup_engine();

    let batch = make_batch("proj-1", "tokens.cached", &[(95.0, 10), (90.0, 5), (85.0, 0)]);
    engine.write_metrics(&batch).unwrap();

    let values = engine
        .query_metric_values(
            "proj-1",
            "tokens.cached",
            Utc::now() - Duration::minutes(1),
            Utc::now() + Duration::seconds(1),
        )
        .unwrap();
    assert_eq!(values, vec![95.0, 90.0, 85.0]);
}

#[test]
fn query_window_is_half_open() {
    let (_dir, engine) = setup_engine();

    let now = Utc::now();
    let batch = make_batch("proj-1", "queue.depth", &[(1.0, 60), (2.0, 30), (3.0, 0)]);
    engine.write_metrics(&batch).unwrap();

    // [now-60s, now): the row written exactly at `now` falls outside.
    let values = engine
        .query_metric_values("proj-1", "queue.depth", now - Duration::seconds(60), now)
        .unwrap();
    assert_eq!(values, vec![1.0, 2.0]);
}

#[test]
fn query_scopes_by_project_and_name() {
    let (_dir, engine) = setup_engine();

    engine
        .write_metrics(&make_batch("proj-1", "queue.depth", &[(1.0, 5)]))
        .unwrap();
    engine
        .write_metrics(&make_batch("proj-2", "queue.depth", &[(9.0, 5)]))
        .unwrap();
    engine
        .write_metrics(&make_batch("proj-1", "tokens.cached", &[(7.0, 5)]))
        .unwrap();

    let values = engine
        .query_metric_values(
            "proj-1",
            "queue.depth",
            Utc::now() - Duration::minutes(1),
            Utc::now(),
        )
        .unwrap();
    assert_eq!(values, vec![1.0]);
}

#[test]
fn metric_points_span_partition_days() {
    let (_dir, engine) = setup_engine();

    let now = Utc::now();
    let yesterday = now - Duration::days(1);
    let mut batch = make_batch("proj-1", "queue.depth", &[(2.0, 0)]);
    batch.points.push(MetricPoint {
        id: llmscope_common::id::next_id(),
        timestamp: yesterday,
        project_id: "proj-1".to_string(),
        name: "queue.depth".to_string(),
        value: 1.0,
        labels: HashMap::new(),
        created_at: yesterday,
        updated_at: yesterday,
    });
    engine.write_metrics(&batch).unwrap();

    assert_eq!(engine.list_partitions().unwrap().len(), 2);
    let values = engine
        .query_metric_values(
            "proj-1",
            "queue.depth",
            now - Duration::days(2),
            now + Duration::seconds(1),
        )
        .unwrap();
    assert_eq!(values, vec![1.0, 2.0]);
}

#[test]
fn llm_values_and_outcomes() {
    let (_dir, engine) = setup_engine();

    let now = Utc::now();
    let records: Vec<_> = [
        (800.0, false),
        (1200.0, true),
        (900.0, false),
        (1400.0, true),
        (1000.0, false),
    ]
    .iter()
    .enumerate()
    .map(|(i, (latency, err))| {
        make_llm_record("proj-1", now - Duration::seconds(50 - i as i64 * 10), *latency, *err)
    })
    .collect();
    engine.write_llm_requests(&records).unwrap();

    let from = now - Duration::minutes(5);
    let to = now + Duration::seconds(1);

    let latencies = engine
        .query_llm_values("proj-1", LlmMetric::LatencyMs, from, to)
        .unwrap();
    assert_eq!(latencies, vec![800.0, 1200.0, 900.0, 1400.0, 1000.0]);

    let outcomes = engine.query_llm_outcomes("proj-1", from, to).unwrap();
    assert_eq!(outcomes.total, 5);
    assert_eq!(outcomes.errored, 2);

    let series = engine.query_llm_outcome_series("proj-1", from, to).unwrap();
    assert_eq!(series.len(), 5);
    assert!(!series[0].is_error);
    assert!(series[1].is_error);
}

#[test]
fn relation_level_llm_metrics_have_no_column() {
    let (_dir, engine) = setup_engine();
    let now = Utc::now();

    let err = engine
        .query_llm_values("proj-1", LlmMetric::ErrorRate, now - Duration::minutes(5), now)
        .unwrap_err();
    assert!(err.to_string().contains("no per-request column"));
}

#[tokio::test]
async fn rule_insert_and_enabled_listing() {
    let (_dir, store) = setup_control().await;

    let a = store.insert_alert_rule(&sample_rule("proj-1", "规则A")).await.unwrap();
    let b = store.insert_alert_rule(&sample_rule("proj-1", "规则B")).await.unwrap();
    let mut disabled = sample_rule("proj-1", "规则C");
    disabled.enabled = false;
    store.insert_alert_rule(&disabled).await.unwrap();

    let enabled = store.list_enabled_alert_rules(None).await.unwrap();
    assert_eq!(enabled.len(), 2);
    // Snowflake ids are monotonic, so id order matches insertion order.
    assert_eq!(enabled[0].id, a.id);
    assert_eq!(enabled[1].id, b.id);

    assert_eq!(store.count_alert_rules(Some(true)).await.unwrap(), 2);
    assert_eq!(store.count_alert_rules(None).await.unwrap(), 3);

    let thresholds = store
        .list_enabled_alert_rules(Some("threshold"))
        .await
        .unwrap();
    assert_eq!(thresholds.len(), 2);
    let anomalies = store.list_enabled_alert_rules(Some("anomaly")).await.unwrap();
    assert!(anomalies.is_empty());
}

#[tokio::test]
async fn rule_last_triggered_roundtrip() {
    let (_dir, store) = setup_control().await;

    let rule = store.insert_alert_rule(&sample_rule("proj-1", "延迟过高")).await.unwrap();
    assert!(rule.last_triggered_at.is_none());

    let at = Utc::now() - Duration::minutes(3);
    store.set_rule_last_triggered(&rule.id, at).await.unwrap();

    let reloaded = store.get_alert_rule(&rule.id).await.unwrap().unwrap();
    let stored = reloaded.last_triggered_at.unwrap();
    assert!((stored - at).num_milliseconds().abs() < 1000);
}

#[tokio::test]
async fn incident_open_recur_resolve() {
    let (_dir, store) = setup_control().await;
    let now = Utc::now();

    let new = NewIncident {
        rule_id: "rule-1".to_string(),
        project_id: "proj-1".to_string(),
        title: "延迟过高".to_string(),
        severity: "warning".to_string(),
        metric: "llm.latency_ms".to_string(),
        last_value: Some(1120.0),
        threshold: Some(1000.0),
    };
    let incident = store.open_incident(&new, now).await.unwrap();
    assert_eq!(incident.status, "open");
    assert_eq!(incident.occurrence_count, 1);

    let later = now + Duration::minutes(1);
    let updated = store
        .record_incident_occurrence(&incident.id, Some(1300.0), later)
        .await
        .unwrap();
    assert_eq!(updated.occurrence_count, 2);
    assert_eq!(updated.last_value, Some(1300.0));
    assert_eq!(updated.first_occurrence_at, incident.first_occurrence_at);
    assert!(updated.last_occurrence_at > updated.first_occurrence_at);

    let resolved = store.resolve_incident(&incident.id, later).await.unwrap();
    assert_eq!(resolved.status, "resolved");
    assert!(resolved.resolved_at.is_some());
    assert!(store.find_active_incident("rule-1").await.unwrap().is_none());
}

#[tokio::test]
async fn second_active_incident_for_rule_is_rejected() {
    let (_dir, store) = setup_control().await;
    let now = Utc::now();

    let new = NewIncident {
        rule_id: "rule-1".to_string(),
        project_id: "proj-1".to_string(),
        title: "延迟过高".to_string(),
        severity: "warning".to_string(),
        metric: "llm.latency_ms".to_string(),
        last_value: Some(1120.0),
        threshold: Some(1000.0),
    };
    let first = store.open_incident(&new, now).await.unwrap();

    let err = store.open_incident(&new, now).await.unwrap_err();
    assert!(err.is_unique_violation(), "unexpected error: {err}");

    // An acknowledged incident still holds the slot.
    store.acknowledge_incident(&first.id).await.unwrap();
    let err = store.open_incident(&new, now).await.unwrap_err();
    assert!(err.is_unique_violation());

    // Resolution frees it.
    store.resolve_incident(&first.id, now).await.unwrap();
    store.open_incident(&new, now).await.unwrap();
}

#[tokio::test]
async fn alert_audit_rows_are_append_only() {
    let (_dir, store) = setup_control().await;
    let now = Utc::now();

    let mut new = NewAlert {
        rule_id: Some("rule-1".to_string()),
        incident_id: None,
        project_id: "proj-1".to_string(),
        source: "rule".to_string(),
        severity: "warning".to_string(),
        metric: "llm.latency_ms".to_string(),
        value: Some(1120.0),
        threshold: Some(1000.0),
        message: "avg(llm.latency_ms) over 5m is 1120.00 (> 1000)".to_string(),
        notified: true,
        suppressed_reason: None,
    };
    store.insert_alert(&new, now).await.unwrap();

    new.notified = false;
    new.suppressed_reason = Some("cooldown".to_string());
    store.insert_alert(&new, now + Duration::minutes(1)).await.unwrap();

    let rows = store.list_alerts_for_rule("rule-1").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].notified);
    assert_eq!(rows[1].suppressed_reason.as_deref(), Some("cooldown"));
    assert_eq!(store.count_alerts(Some("rule")).await.unwrap(), 2);
}

#[tokio::test]
async fn notification_status_writeback() {
    let (_dir, store) = setup_control().await;
    let now = Utc::now();

    let new = NewNotification {
        alert_id: "alert-1".to_string(),
        incident_id: None,
        channel_id: "chan-1".to_string(),
        channel_type: "webhook".to_string(),
        title: "[WARNING] 延迟过高".to_string(),
        body: "avg over 5m is 1120.00".to_string(),
    };
    let pending = store.insert_notification(&new, now).await.unwrap();
    assert_eq!(pending.status, "pending");

    store
        .mark_notification_sent(&pending.id, 1, Some("{\"ok\":true}"))
        .await
        .unwrap();
    let rows = store.list_notifications_for_alert("alert-1").await.unwrap();
    assert_eq!(rows[0].status, "sent");
    assert_eq!(rows[0].retry_count, 1);
    assert!(rows[0].sent_at.is_some());

    let second = store.insert_notification(&new, now).await.unwrap();
    store
        .mark_notification_failed(&second.id, "connect timeout", 3, None)
        .await
        .unwrap();
    let rows = store.list_notifications_for_alert("alert-1").await.unwrap();
    assert_eq!(rows[1].status, "failed");
    assert_eq!(rows[1].error.as_deref(), Some("connect timeout"));
    assert_eq!(store.count_notifications(Some("failed")).await.unwrap(), 1);
}

#[tokio::test]
async fn channel_listing_respects_enabled_and_ids() {
    let (_dir, store) = setup_control().await;

    let slack = store
        .insert_channel(&NewChannel {
            name: "值班 Slack".to_string(),
            channel_type: "slack".to_string(),
            config_json: r#"{"webhook_url":"https://hooks.slack.com/services/T0/B0/x"}"#.to_string(),
            min_severity: "info".to_string(),
            enabled: true,
        })
        .await
        .unwrap();
    let email = store
        .insert_channel(&NewChannel {
            name: "oncall-email".to_string(),
            channel_type: "email".to_string(),
            config_json: "{}".to_string(),
            min_severity: "critical".to_string(),
            enabled: false,
        })
        .await
        .unwrap();

    assert_eq!(store.list_enabled_channels().await.unwrap().len(), 1);
    assert_eq!(store.count_channels(None).await.unwrap(), 2);

    let by_ids = store
        .list_enabled_channels_by_ids(&[slack.id.clone(), email.id.clone()])
        .await
        .unwrap();
    assert_eq!(by_ids.len(), 1);
    assert_eq!(by_ids[0].id, slack.id);

    assert!(store.get_channel_by_name("值班 Slack").await.unwrap().is_some());
    assert!(store.get_channel_by_name("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn retention_cleanup_drops_only_old_rows() {
    let (_dir, store) = setup_control().await;
    let now = Utc::now();
    let old = now - Duration::days(120);

    let new = NewIncident {
        rule_id: "rule-old".to_string(),
        project_id: "proj-1".to_string(),
        title: "老事件".to_string(),
        severity: "warning".to_string(),
        metric: "llm.latency_ms".to_string(),
        last_value: None,
        threshold: None,
    };
    let stale = store.open_incident(&new, old).await.unwrap();
    store.resolve_incident(&stale.id, old).await.unwrap();

    let mut fresh = new.clone();
    fresh.rule_id = "rule-fresh".to_string();
    let open = store.open_incident(&fresh, now).await.unwrap();

    let cutoff = now - Duration::days(90);
    let removed = store.cleanup_resolved_incidents(cutoff).await.unwrap();
    assert_eq!(removed, 1);
    assert!(store.find_active_incident(&open.rule_id).await.unwrap().is_some());

    store
        .insert_alert(
            &NewAlert {
                rule_id: Some("rule-old".to_string()),
                incident_id: None,
                project_id: "proj-1".to_string(),
                source: "rule".to_string(),
                severity: "info".to_string(),
                metric: "llm.latency_ms".to_string(),
                value: None,
                threshold: None,
                message: "old alert".to_string(),
                notified: false,
                suppressed_reason: None,
            },
            old,
        )
        .await
        .unwrap();
    assert_eq!(store.cleanup_alerts(cutoff).await.unwrap(), 1);
}
