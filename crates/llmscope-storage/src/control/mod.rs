use crate::error::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};

pub mod alert;
pub mod anomaly;
pub mod channel;
pub mod incident;
pub mod notification;
pub mod rule;

// ---- 公开 Row 类型（从各子模块重新导出）----
pub use alert::{AlertRow, NewAlert};
pub use anomaly::{AnomalyRow, NewAnomaly};
pub use channel::{ChannelRow, NewChannel};
pub use incident::{IncidentRow, NewIncident};
pub use notification::{NewNotification, NotificationRow};
pub use rule::{AlertRuleRow, NewAlertRule};

/// 管理数据库（llmscope.db）的统一访问层。
///
/// 所有方法均为 `async fn`，底层使用 SeaORM + SQLite。
/// 时序分片存储（每日 .db 文件）仍由 `SqliteTelemetryStore` 管理。
pub struct ControlStore {
    pub(crate) db: DatabaseConnection,
}

impl ControlStore {
    /// 连接并初始化管理数据库。
    ///
    /// - `db_url`：完整的数据库连接 URL，由调用方（服务器配置）提供。
    ///   SQLite 示例：`sqlite:///data/llmscope.db?mode=rwc`
    ///
    /// 自动运行 `sea-orm-migration` 迁移，确保 Schema 最新。
    pub async fn new(db_url: &str) -> Result<Self> {
        let db = Database::connect(db_url).await?;

        // WAL 模式仅对 SQLite 有效
        if db_url.starts_with("sqlite://") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        // 运行所有待执行迁移
        Migrator::up(&db, None).await?;

        tracing::info!(db_url = %db_url, "Initialized control store (SeaORM)");

        Ok(Self { db })
    }

    /// 返回底层数据库连接引用（供子模块使用）。
    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
