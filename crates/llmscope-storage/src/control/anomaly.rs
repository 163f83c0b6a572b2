use crate::control::ControlStore;
use crate::entities::anomaly::{self, Column, Entity};
use crate::error::Result;
use chrono::{DateTime, Utc};
use llmscope_common::id;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};

/// 异常检测数据行（来自 anomalies 表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRow {
    pub id: String,
    pub rule_id: String,
    pub project_id: String,
    pub metric: String,
    pub value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub z_score: f64,
    pub confidence: f64,
    pub status: String,
    pub detected_at: DateTime<Utc>,
}

/// 新检出异常请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnomaly {
    pub rule_id: String,
    pub project_id: String,
    pub metric: String,
    pub value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub z_score: f64,
    pub confidence: f64,
}

fn to_row(m: anomaly::Model) -> AnomalyRow {
    AnomalyRow {
        id: m.id,
        rule_id: m.rule_id,
        project_id: m.project_id,
        metric: m.metric,
        value: m.value,
        baseline_mean: m.baseline_mean,
        baseline_stddev: m.baseline_stddev,
        z_score: m.z_score,
        confidence: m.confidence,
        status: m.status,
        detected_at: m.detected_at.with_timezone(&Utc),
    }
}

impl ControlStore {
    pub async fn insert_anomaly(
        &self,
        new: &NewAnomaly,
        detected_at: DateTime<Utc>,
    ) -> Result<AnomalyRow> {
        let am = anomaly::ActiveModel {
            id: Set(id::next_id()),
            rule_id: Set(new.rule_id.clone()),
            project_id: Set(new.project_id.clone()),
            metric: Set(new.metric.clone()),
            value: Set(new.value),
            baseline_mean: Set(new.baseline_mean),
            baseline_stddev: Set(new.baseline_stddev),
            z_score: Set(new.z_score),
            confidence: Set(new.confidence),
            status: Set("new".to_string()),
            detected_at: Set(detected_at.fixed_offset()),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn list_anomalies_for_rule(&self, rule_id: &str) -> Result<Vec<AnomalyRow>> {
        let rows = Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .order_by(Column::DetectedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_anomalies(&self, status: Option<&str>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(st));
        }
        Ok(q.count(self.db()).await?)
    }

    pub async fn cleanup_anomalies(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = Entity::delete_many()
            .filter(Column::DetectedAt.lt(cutoff.fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
