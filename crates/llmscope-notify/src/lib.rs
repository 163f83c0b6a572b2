//! Notification delivery framework with pluggable channel support.
//!
//! Alert events are rendered once, persisted as pending notification rows,
//! and handed to a bounded [`queue::DeliveryQueue`]. A background worker
//! consumes the queue, instantiates the matching [`NotificationChannel`]
//! through the [`plugin::ChannelRegistry`], and reports the outcome back
//! through a [`queue::DeliverySink`]. Built-in channels include email (SMTP),
//! Slack, PagerDuty, and generic webhooks.

pub mod channels;
pub mod error;
pub mod plugin;
pub mod queue;
pub mod utils;


use async_trait::async_trait;
use error::Result;
use llmscope_common::types::AlertEvent;

/// A notification delivery channel that sends alert events to an external
/// service (e.g., SMTP, Slack webhook, PagerDuty Events API).
///
/// Implementations are created by the corresponding [`plugin::ChannelPlugin`]
/// and live only for the delivery of a single job.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the alert through this channel.
    ///
    /// Transport-level failures after the built-in retries are reported in
    /// [`SendResponse::error`] rather than as an `Err`, so the caller still
    /// gets retry counts and response bodies for the delivery record.
    ///
    /// # Errors
    ///
    /// Returns an error only when the channel cannot attempt delivery at all
    /// (e.g., an unparseable sender address).
    async fn send(&self, alert: &AlertEvent, rendered: &RenderedMessage) -> Result<SendResponse>;

    /// Returns the channel type name (e.g., `"email"`, `"webhook"`).
    fn channel_type(&self) -> &str;

    /// Returns the database row ID of the channel instance.
    fn instance_id(&self) -> &str;
}

/// Human-readable notification content, rendered once per alert and shared by
/// every channel the alert fans out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub title: String,
    pub body: String,
}

impl RenderedMessage {
    pub fn from_alert(alert: &AlertEvent) -> Self {
        let severity = alert.severity.to_string().to_uppercase();
        let title = if alert.rule_name.is_empty() {
            format!("[{severity}] {}", alert.metric)
        } else {
            format!("[{severity}] {}", alert.rule_name)
        };

        let value_line = match alert.value {
            Some(v) => format!("\nValue: {v:.2}"),
            None => String::new(),
        };
        let threshold_line = match alert.threshold {
            Some(t) => format!("\nThreshold: {t:.2}"),
            None => String::new(),
        };
        let body = format!(
            "Alert: {severity}\nSource: {source}\nProject: {project}\nMetric: {metric}{value_line}{threshold_line}\nMessage: {message}\nTime: {time}",
            severity = alert.severity,
            source = alert.source,
            project = alert.project_id,
            metric = alert.metric,
            value_line = value_line,
            threshold_line = threshold_line,
            message = alert.message,
            time = alert.timestamp.to_rfc3339(),
        );
        Self { title, body }
    }
}

/// Delivery outcome metadata persisted on the notification row.
#[derive(Debug, Clone, Default)]
pub struct SendResponse {
    /// Extra attempts beyond the first (0 = delivered first try).
    pub retry_count: u32,
    /// HTTP status of the last response, for HTTP-based channels.
    pub http_status: Option<u16>,
    /// Last response body, truncated to [`utils::MAX_BODY_LENGTH`].
    pub response_body: Option<String>,
    /// Request body that was sent, truncated and with secrets redacted.
    pub request_body: Option<String>,
    /// Terminal delivery failure after retries, if any.
    pub error: Option<String>,
}
