use crate::control::ControlStore;
use crate::entities::notification::{self, Column, Entity};
use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use llmscope_common::id;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder,
};
use serde::{Deserialize, Serialize};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_SENT: &str = "sent";
pub const STATUS_FAILED: &str = "failed";

/// 通知投递数据行（来自 notifications 表）
///
/// 行在提交投递任务前以 pending 状态写入，投递 worker 回写终态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: String,
    pub alert_id: String,
    pub incident_id: Option<String>,
    pub channel_id: String,
    pub channel_type: String,
    pub title: String,
    pub body: String,
    pub status: String,
    pub retry_count: i32,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建通知投递行请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub alert_id: String,
    pub incident_id: Option<String>,
    pub channel_id: String,
    pub channel_type: String,
    pub title: String,
    pub body: String,
}

fn to_row(m: notification::Model) -> NotificationRow {
    NotificationRow {
        id: m.id,
        alert_id: m.alert_id,
        incident_id: m.incident_id,
        channel_id: m.channel_id,
        channel_type: m.channel_type,
        title: m.title,
        body: m.body,
        status: m.status,
        retry_count: m.retry_count,
        response_body: m.response_body,
        error: m.error,
        sent_at: m.sent_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl ControlStore {
    pub async fn insert_notification(
        &self,
        new: &NewNotification,
        now: DateTime<Utc>,
    ) -> Result<NotificationRow> {
        let now_fixed = now.fixed_offset();
        let am = notification::ActiveModel {
            id: Set(id::next_id()),
            alert_id: Set(new.alert_id.clone()),
            incident_id: Set(new.incident_id.clone()),
            channel_id: Set(new.channel_id.clone()),
            channel_type: Set(new.channel_type.clone()),
            title: Set(new.title.clone()),
            body: Set(new.body.clone()),
            status: Set(STATUS_PENDING.to_string()),
            retry_count: Set(0),
            response_body: Set(None),
            error: Set(None),
            sent_at: Set(None),
            created_at: Set(now_fixed),
            updated_at: Set(now_fixed),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn mark_notification_sent(
        &self,
        id: &str,
        retry_count: i32,
        response_body: Option<&str>,
    ) -> Result<()> {
        let model = Entity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "notification",
                id: id.to_string(),
            })?;
        let now = Utc::now().fixed_offset();
        let mut am: notification::ActiveModel = model.into();
        am.status = Set(STATUS_SENT.to_string());
        am.retry_count = Set(retry_count);
        am.response_body = Set(response_body.map(|s| s.to_string()));
        am.error = Set(None);
        am.sent_at = Set(Some(now));
        am.updated_at = Set(now);
        am.update(self.db()).await?;
        Ok(())
    }

    pub async fn mark_notification_failed(
        &self,
        id: &str,
        error: &str,
        retry_count: i32,
        response_body: Option<&str>,
    ) -> Result<()> {
        let model = Entity::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| StorageError::NotFound {
                entity: "notification",
                id: id.to_string(),
            })?;
        let mut am: notification::ActiveModel = model.into();
        am.status = Set(STATUS_FAILED.to_string());
        am.retry_count = Set(retry_count);
        am.response_body = Set(response_body.map(|s| s.to_string()));
        am.error = Set(Some(error.to_string()));
        am.updated_at = Set(Utc::now().fixed_offset());
        am.update(self.db()).await?;
        Ok(())
    }

    pub async fn list_notifications_for_alert(&self, alert_id: &str) -> Result<Vec<NotificationRow>> {
        let rows = Entity::find()
            .filter(Column::AlertId.eq(alert_id))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn count_notifications(&self, status: Option<&str>) -> Result<u64> {
        let mut q = Entity::find();
        if let Some(st) = status {
            q = q.filter(Column::Status.eq(st));
        }
        Ok(q.count(self.db()).await?)
    }

    pub async fn cleanup_notifications(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let res = Entity::delete_many()
            .filter(Column::CreatedAt.lt(cutoff.fixed_offset()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }
}
