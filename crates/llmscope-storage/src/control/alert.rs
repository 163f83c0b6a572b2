use crate::control::ControlStore;
use crate::entities::alert::{self, Column, Entity};
use crate::error::Result;
use chrono::{DateTime, Utc};
use llmscope_common::id;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

/// 告警审计数据行（来自 alerts 表）
///
/// 每次规则触发都会写入一行，无论通知是否因冷却而被抑制。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: String,
    pub rule_id: Option<String>,
    pub incident_id: Option<String>,
    pub project_id: String,
    pub source: String,
    pub severity: String,
    pub metric: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
    pub notified: bool,
    pub suppressed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 新建告警审计行请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub rule_id: Option<String>,
    pub incident_id: Option<String>,
    pub project_id: String,
    pub source: String,
    pub severity: String,
    pub metric: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub message: String,
    pub notified: bool,
    pub suppressed_reason: Option<String>,
}

fn to_row(m: alert::Model) -> AlertRow {
    AlertRow {
        id: m.id,
        rule_id: m.rule_id,
        incident_id: m.incident_id,
        project_id: m.project_id,
        source: m.source,
        severity: m.severity,
        metric: m.metric,
        value: m.value,
        threshold: m.threshold,
        message: m.message,
        notified: m.notified,
        suppressed_reason: m.suppressed_reason,
        created_at: m.created_at.with_timezone(&Utc),
    }
}

impl ControlStore {
    pub async fn insert_alert(&self, new: &NewAlert, now: DateTime<Utc>) -> Result<AlertRow> {
        let am = alert::ActiveModel {
            id: Set(id::next_id()),
            rule_id: Set(new.rule_id.clone()),
            incident_id: Set(new.incident_id.clone()),
            project_id: Set(new.project_id.clone()),
            source: Set(new.source.clone()),
            severity: Set(new.severity.clone()),
            metric: Set(new.metric.clone()),
            value: Set(new.value),
            threshold: Set(new.threshold),
            message: Set(new.message.clone()),
            notified: Set(new.notified),
            suppressed_reason: Set(new.suppressed_reason.clone()),
            created_at: Set(now.fixed_offset()),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn list_alerts_for_rule(&self, rule_id: &str) -> Result<Vec<AlertRow>> {
        let rows = Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn list_recent_alerts(&self, limit: u64) -> Result<Vec<AlertRow>> {
        let rows = Entity::find()
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_alerts(&self, source: Option<&str>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(src) = source {
            q = q.filter(Column::Source.eq(src));
        }
        Ok(q.count(self.db()).await?)
    }

    pub async fn cleanup_alerts(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = Entity::delete_many()
            .filter(Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
