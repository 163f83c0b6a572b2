use crate::control::ControlStore;
use crate::entities::notification_channel::{self, Column, Entity};
use crate::error::Result;
use chrono::Utc;
use llmscope_common::id;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};

/// 通知渠道数据行（来自 notification_channels 表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub channel_type: String,
    pub config_json: String,
    pub min_severity: String,
    pub enabled: bool,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

/// 新建通知渠道请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChannel {
    pub name: String,
    pub channel_type: String,
    pub config_json: String,
    pub min_severity: String,
    pub enabled: bool,
}

fn to_row(m: notification_channel::Model) -> ChannelRow {
    ChannelRow {
        id: m.id,
        name: m.name,
        channel_type: m.channel_type,
        config_json: m.config_json,
        min_severity: m.min_severity,
        enabled: m.enabled,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl ControlStore {
    pub async fn insert_channel(&self, new: &NewChannel) -> Result<ChannelRow> {
        let now = Utc::now().fixed_offset();
        let am = notification_channel::ActiveModel {
            id: Set(id::next_id()),
            name: Set(new.name.clone()),
            channel_type: Set(new.channel_type.clone()),
            config_json: Set(new.config_json.clone()),
            min_severity: Set(new.min_severity.clone()),
            enabled: Set(new.enabled),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelRow>> {
        let model = Entity::find()
            .filter(Column::Name.eq(name))
            .one(self.db())
            .await?;
        Ok(model.map(to_row))
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelRow>> {
        let rows = Entity::find()
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn list_enabled_channels(&self) -> Result<Vec<ChannelRow>> {
        let rows = Entity::find()
            .filter(Column::Enabled.eq(true))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    /// Resolves an explicit channel id list, keeping only enabled channels.
    pub async fn list_enabled_channels_by_ids(&self, ids: &[String]) -> Result<Vec<ChannelRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = Entity::find()
            .filter(Column::Id.is_in(ids.iter().cloned()))
            .filter(Column::Enabled.eq(true))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_channels(&self, enabled: Option<bool>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(en) = enabled {
            q = q.filter(Column::Enabled.eq(en));
        }
        Ok(q.count(self.db()).await?)
    }
}
