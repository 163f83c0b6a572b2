use crate::control::ControlStore;
use crate::entities::alert_rule::{self, Column, Entity};
use crate::error::Result;
use chrono::{DateTime, Utc};
use llmscope_common::id;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};

/// 告警规则数据行（来自 alert_rules 表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleRow {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub metric: String,
    pub aggregation: String,
    pub rule_type: String,
    pub config_json: String,
    pub window_minutes: i32,
    pub severity: String,
    pub channels_json: String,
    pub cooldown_minutes: i32,
    pub enabled: bool,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建告警规则请求（ID 与时间戳由存储层生成）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub metric: String,
    pub aggregation: String,
    pub rule_type: String,
    pub config_json: String,
    pub window_minutes: i32,
    pub severity: String,
    pub channels_json: String,
    pub cooldown_minutes: i32,
    pub enabled: bool,
}

fn to_row(m: alert_rule::Model) -> AlertRuleRow {
    AlertRuleRow {
        id: m.id,
        project_id: m.project_id,
        name: m.name,
        description: m.description,
        metric: m.metric,
        aggregation: m.aggregation,
        rule_type: m.rule_type,
        config_json: m.config_json,
        window_minutes: m.window_minutes,
        severity: m.severity,
        channels_json: m.channels_json,
        cooldown_minutes: m.cooldown_minutes,
        enabled: m.enabled,
        last_triggered_at: m.last_triggered_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl ControlStore {
    pub async fn insert_alert_rule(&self, new: &NewAlertRule) -> Result<AlertRuleRow> {
        let now = Utc::now().fixed_offset();
        let am = alert_rule::ActiveModel {
            id: Set(id::next_id()),
            project_id: Set(new.project_id.clone()),
            name: Set(new.name.clone()),
            description: Set(new.description.clone()),
            metric: Set(new.metric.clone()),
            aggregation: Set(new.aggregation.clone()),
            rule_type: Set(new.rule_type.clone()),
            config_json: Set(new.config_json.clone()),
            window_minutes: Set(new.window_minutes),
            severity: Set(new.severity.clone()),
            channels_json: Set(new.channels_json.clone()),
            cooldown_minutes: Set(new.cooldown_minutes),
            enabled: Set(new.enabled),
            last_triggered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRuleRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn list_alert_rules(&self) -> Result<Vec<AlertRuleRow>> {
        let rows = Entity::find()
            .order_by(Column::CreatedAt, Order::Desc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    /// Enabled rules in stable id order, optionally narrowed to one
    /// `rule_type`. 评估取数接口：id 即创建序，窗口轮转依赖这个顺序。
    pub async fn list_enabled_alert_rules(
        &self,
        rule_type: Option<&str>,
    ) -> Result<Vec<AlertRuleRow>> {
        let mut q = Entity::find().filter(Column::Enabled.eq(true));
        if let Some(rt) = rule_type {
            q = q.filter(Column::RuleType.eq(rt));
        }
        let rows = q.order_by(Column::Id, Order::Asc).all(self.db()).await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_alert_rules(&self, enabled: Option<bool>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(en) = enabled {
            q = q.filter(Column::Enabled.eq(en));
        }
        Ok(q.count(self.db()).await?)
    }

    /// Stamps the cooldown anchor after a non-suppressed trigger.
    pub async fn set_rule_last_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        if let Some(m) = model {
            let mut am: alert_rule::ActiveModel = m.into();
            am.last_triggered_at = Set(Some(at.fixed_offset()));
            am.updated_at = Set(Utc::now().fixed_offset());
            am.update(self.db()).await?;
        }
        Ok(())
    }
}
