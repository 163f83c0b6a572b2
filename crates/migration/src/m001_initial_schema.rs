use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 按依赖顺序建表
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    metric TEXT NOT NULL,
    aggregation TEXT NOT NULL DEFAULT 'avg',
    rule_type TEXT NOT NULL DEFAULT 'threshold',
    config_json TEXT NOT NULL DEFAULT '{}',
    window_minutes INTEGER NOT NULL DEFAULT 5,
    severity TEXT NOT NULL DEFAULT 'warning',
    channels_json TEXT NOT NULL DEFAULT '[]',
    cooldown_minutes INTEGER NOT NULL DEFAULT 10,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_triggered_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_rules_enabled ON alert_rules(enabled);
CREATE INDEX IF NOT EXISTS idx_alert_rules_project ON alert_rules(project_id);

CREATE TABLE IF NOT EXISTS incidents (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    title TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    occurrence_count INTEGER NOT NULL DEFAULT 1,
    first_occurrence_at TEXT NOT NULL,
    last_occurrence_at TEXT NOT NULL,
    resolved_at TEXT,
    metric TEXT NOT NULL,
    last_value REAL,
    threshold REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_incidents_active_rule
    ON incidents(rule_id) WHERE status IN ('open', 'acknowledged');
CREATE INDEX IF NOT EXISTS idx_incidents_rule ON incidents(rule_id);
CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status);
CREATE INDEX IF NOT EXISTS idx_incidents_resolved_at ON incidents(resolved_at);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT,
    incident_id TEXT,
    project_id TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'rule',
    severity TEXT NOT NULL,
    metric TEXT NOT NULL,
    value REAL,
    threshold REAL,
    message TEXT NOT NULL,
    notified INTEGER NOT NULL DEFAULT 0,
    suppressed_reason TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_rule ON alerts(rule_id);
CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);

CREATE TABLE IF NOT EXISTS anomalies (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    metric TEXT NOT NULL,
    value REAL NOT NULL,
    baseline_mean REAL NOT NULL,
    baseline_stddev REAL NOT NULL,
    z_score REAL NOT NULL,
    confidence REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',
    detected_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_anomalies_rule ON anomalies(rule_id);
CREATE INDEX IF NOT EXISTS idx_anomalies_detected_at ON anomalies(detected_at);

CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY NOT NULL,
    alert_id TEXT NOT NULL,
    incident_id TEXT,
    channel_id TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    response_body TEXT,
    error TEXT,
    sent_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notifications_alert ON notifications(alert_id);
CREATE INDEX IF NOT EXISTS idx_notifications_status ON notifications(status);
CREATE INDEX IF NOT EXISTS idx_notifications_created_at ON notifications(created_at);

CREATE TABLE IF NOT EXISTS notification_channels (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    channel_type TEXT NOT NULL,
    config_json TEXT NOT NULL DEFAULT '{}',
    min_severity TEXT NOT NULL DEFAULT 'info',
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notification_channels_enabled ON notification_channels(enabled);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS notification_channels;
DROP TABLE IF EXISTS notifications;
DROP TABLE IF EXISTS anomalies;
DROP TABLE IF EXISTS alerts;
DROP TABLE IF EXISTS incidents;
DROP TABLE IF EXISTS alert_rules;
";
