pub mod alert;
pub mod alert_rule;
pub mod anomaly;
pub mod incident;
pub mod notification;
pub mod notification_channel;
