use crate::control::ControlStore;
use crate::entities::incident::{self, Column, Entity};
use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use llmscope_common::id;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
};
use serde::{Deserialize, Serialize};

/// Incident statuses. `open` and `acknowledged` both count as active and are
/// covered by the partial unique index on `rule_id`.
pub const STATUS_OPEN: &str = "open";
pub const STATUS_ACKNOWLEDGED: &str = "acknowledged";
pub const STATUS_RESOLVED: &str = "resolved";

/// 事件数据行（来自 incidents 表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRow {
    pub id: String,
    pub rule_id: String,
    pub project_id: String,
    pub title: String,
    pub severity: String,
    pub status: String,
    pub occurrence_count: i32,
    pub first_occurrence_at: DateTime<Utc>,
    pub last_occurrence_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metric: String,
    pub last_value: Option<f64>,
    pub threshold: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建事件请求（首次触发时打开）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIncident {
    pub rule_id: String,
    pub project_id: String,
    pub title: String,
    pub severity: String,
    pub metric: String,
    pub last_value: Option<f64>,
    pub threshold: Option<f64>,
}

fn to_row(m: incident::Model) -> IncidentRow {
    IncidentRow {
        id: m.id,
        rule_id: m.rule_id,
        project_id: m.project_id,
        title: m.title,
        severity: m.severity,
        status: m.status,
        occurrence_count: m.occurrence_count,
        first_occurrence_at: m.first_occurrence_at.with_timezone(&Utc),
        last_occurrence_at: m.last_occurrence_at.with_timezone(&Utc),
        resolved_at: m.resolved_at.map(|t| t.with_timezone(&Utc)),
        metric: m.metric,
        last_value: m.last_value,
        threshold: m.threshold,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl ControlStore {
    /// The at-most-one active incident per rule, if any.
    pub async fn find_active_incident(&self, rule_id: &str) -> Result<Option<IncidentRow>> {
        let model = Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .filter(Column::Status.is_in([STATUS_OPEN, STATUS_ACKNOWLEDGED]))
            .one(self.db())
            .await?;
        Ok(model.map(to_row))
    }

    /// Inserts a fresh open incident. A concurrent open for the same rule
    /// loses to the partial unique index and surfaces as a
    /// [`StorageError::is_unique_violation`] error, which callers resolve by
    /// re-reading the active incident.
    pub async fn open_incident(&self, new: &NewIncident, now: DateTime<Utc>) -> Result<IncidentRow> {
        let now_fixed = now.fixed_offset();
        let am = incident::ActiveModel {
            id: Set(id::next_id()),
            rule_id: Set(new.rule_id.clone()),
            project_id: Set(new.project_id.clone()),
            title: Set(new.title.clone()),
            severity: Set(new.severity.clone()),
            status: Set(STATUS_OPEN.to_string()),
            occurrence_count: Set(1),
            first_occurrence_at: Set(now_fixed),
            last_occurrence_at: Set(now_fixed),
            resolved_at: Set(None),
            metric: Set(new.metric.clone()),
            last_value: Set(new.last_value),
            threshold: Set(new.threshold),
            created_at: Set(now_fixed),
            updated_at: Set(now_fixed),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    /// Folds a repeat trigger into an existing incident: bumps
    /// `occurrence_count`, advances `last_occurrence_at`, refreshes the
    /// last observed value.
    pub async fn record_incident_occurrence(
        &self,
        id: &str,
        last_value: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<IncidentRow> {
        let model = Entity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "incident",
                id: id.to_string(),
            })?;
        let count = model.occurrence_count;
        let mut am: incident::ActiveModel = model.into();
        am.occurrence_count = Set(count + 1);
        am.last_occurrence_at = Set(now.fixed_offset());
        am.last_value = Set(last_value);
        am.updated_at = Set(now.fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(to_row(updated))
    }

    pub async fn acknowledge_incident(&self, id: &str) -> Result<Option<IncidentRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let mut am: incident::ActiveModel = m.into();
            am.status = Set(STATUS_ACKNOWLEDGED.to_string());
            am.updated_at = Set(Utc::now().fixed_offset());
            let updated = am.update(self.db()).await?;
            Ok(Some(to_row(updated)))
        } else {
            Ok(None)
        }
    }

    pub async fn resolve_incident(&self, id: &str, now: DateTime<Utc>) -> Result<IncidentRow> {
        let model = Entity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "incident",
                id: id.to_string(),
            })?;
        let mut am: incident::ActiveModel = model.into();
        am.status = Set(STATUS_RESOLVED.to_string());
        am.resolved_at = Set(Some(now.fixed_offset()));
        am.updated_at = Set(now.fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(to_row(updated))
    }

    pub async fn count_incidents(&self, status: Option<&str>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(st));
        }
        Ok(q.count(self.db()).await?)
    }

    pub async fn count_active_incidents(&self) -> Result<u64> {
        Ok(Entity::find()
            .filter(Column::Status.is_in([STATUS_OPEN, STATUS_ACKNOWLEDGED]))
            .count(self.db())
            .await?)
    }

    /// Deletes resolved incidents whose resolution predates `cutoff`.
    pub async fn cleanup_resolved_incidents(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = Entity::delete_many()
            .filter(Column::Status.eq(STATUS_RESOLVED))
            .filter(Column::ResolvedAt.lt(cutoff.fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
