use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alerts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
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
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
