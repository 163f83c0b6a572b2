use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use llmscope_common::types::{AlertEvent, AlertSource, Severity};
use llmscope_detect::rule::{EvaluationResult, RuleSpec};
use llmscope_detect::security::Escalation;
use llmscope_notify::queue::{DeliveryJob, DeliveryQueue, DeliverySink};
use llmscope_notify::RenderedMessage;
use llmscope_storage::control::{ChannelRow, NewAlert, NewNotification};
use llmscope_storage::error::Result;
use llmscope_storage::ControlStore;
use std::sync::Arc;

/// What the notification stage did with one trigger.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub alert_id: String,
    /// At least one channel received a delivery job.
    pub notified: bool,
    /// The trigger fell inside the rule's cooldown.
    pub suppressed: bool,
}

/// Turns triggers into alert audit rows and queued deliveries.
///
/// Every trigger writes exactly one alerts row. Cooldown suppresses the
/// notification fan-out but never the audit row, and a suppressed trigger
/// leaves `last_triggered_at` untouched so the cooldown window is anchored
/// to the last notified trigger.
pub struct Dispatcher {
    control: Arc<ControlStore>,
    queue: DeliveryQueue,
}

impl Dispatcher {
    pub fn new(control: Arc<ControlStore>, queue: DeliveryQueue) -> Self {
        Self { control, queue }
    }

    fn in_cooldown(rule: &RuleSpec, now: DateTime<Utc>) -> bool {
        match rule.last_triggered_at {
            Some(lta) => now - lta < Duration::minutes(i64::from(rule.cooldown_minutes)),
            None => false,
        }
    }

    pub async fn dispatch_rule_alert(
        &self,
        rule: &RuleSpec,
        result: &EvaluationResult,
        incident_id: Option<&str>,
        source: AlertSource,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        if Self::in_cooldown(rule, now) {
            let alert = self
                .control
                .insert_alert(
                    &NewAlert {
                        rule_id: Some(rule.id.clone()),
                        incident_id: incident_id.map(str::to_string),
                        project_id: rule.project_id.clone(),
                        source: source.to_string(),
                        severity: result.severity.to_string(),
                        metric: rule.metric.to_string(),
                        value: result.value,
                        threshold: result.threshold,
                        message: result.message.clone(),
                        notified: false,
                        suppressed_reason: Some("cooldown".to_string()),
                    },
                    now,
                )
                .await?;
            tracing::debug!(
                rule_id = %rule.id,
                alert_id = %alert.id,
                "Alert suppressed by cooldown"
            );
            return Ok(DispatchOutcome {
                alert_id: alert.id,
                notified: false,
                suppressed: true,
            });
        }

        let channels = self.resolve_channels(rule).await?;
        let notified = !channels.is_empty();
        let alert = self
            .control
            .insert_alert(
                &NewAlert {
                    rule_id: Some(rule.id.clone()),
                    incident_id: incident_id.map(str::to_string),
                    project_id: rule.project_id.clone(),
                    source: source.to_string(),
                    severity: result.severity.to_string(),
                    metric: rule.metric.to_string(),
                    value: result.value,
                    threshold: result.threshold,
                    message: result.message.clone(),
                    notified,
                    suppressed_reason: None,
                },
                now,
            )
            .await?;

        let event = AlertEvent {
            id: alert.id.clone(),
            rule_id: Some(rule.id.clone()),
            rule_name: rule.name.clone(),
            project_id: rule.project_id.clone(),
            source,
            metric: rule.metric.to_string(),
            severity: result.severity,
            message: result.message.clone(),
            value: result.value,
            threshold: result.threshold,
            timestamp: now,
        };
        self.enqueue_deliveries(&channels, &event, incident_id, now)
            .await?;

        // Anchors the next cooldown window. Set even with zero channels:
        // the trigger itself was not suppressed.
        self.control.set_rule_last_triggered(&rule.id, now).await?;

        Ok(DispatchOutcome {
            alert_id: alert.id,
            notified,
            suppressed: false,
        })
    }

    /// Security escalations bypass rules entirely: no cooldown, fan-out to
    /// every enabled channel whose minimum severity admits the escalation.
    pub async fn dispatch_security_alert(
        &self,
        escalation: &Escalation,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let channels = self.channels_admitting(escalation.severity).await?;
        let notified = !channels.is_empty();
        let metric = escalation.event.kind.to_string();
        let alert = self
            .control
            .insert_alert(
                &NewAlert {
                    rule_id: None,
                    incident_id: None,
                    project_id: project_id.to_string(),
                    source: AlertSource::Security.to_string(),
                    severity: escalation.severity.to_string(),
                    metric: metric.clone(),
                    value: Some(escalation.count as f64),
                    threshold: None,
                    message: escalation.message.clone(),
                    notified,
                    suppressed_reason: None,
                },
                now,
            )
            .await?;

        let event = AlertEvent {
            id: alert.id.clone(),
            rule_id: None,
            rule_name: format!("Security: {metric}"),
            project_id: project_id.to_string(),
            source: AlertSource::Security,
            metric,
            severity: escalation.severity,
            message: escalation.message.clone(),
            value: Some(escalation.count as f64),
            threshold: None,
            timestamp: now,
        };
        self.enqueue_deliveries(&channels, &event, None, now).await?;

        Ok(DispatchOutcome {
            alert_id: alert.id,
            notified,
            suppressed: false,
        })
    }

    /// Explicit channel ids resolve directly (disabled ones drop out);
    /// an empty list means every enabled channel admitting the severity.
    async fn resolve_channels(&self, rule: &RuleSpec) -> Result<Vec<ChannelRow>> {
        if rule.channel_ids.is_empty() {
            self.channels_admitting(rule.severity).await
        } else {
            self.control
                .list_enabled_channels_by_ids(&rule.channel_ids)
                .await
        }
    }

    async fn channels_admitting(&self, severity: Severity) -> Result<Vec<ChannelRow>> {
        let channels = self.control.list_enabled_channels().await?;
        Ok(channels
            .into_iter()
            .filter(|ch| {
                ch.min_severity
                    .parse::<Severity>()
                    .map(|min| min <= severity)
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn enqueue_deliveries(
        &self,
        channels: &[ChannelRow],
        event: &AlertEvent,
        incident_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if channels.is_empty() {
            return Ok(());
        }
        let rendered = RenderedMessage::from_alert(event);
        for channel in channels {
            let row = self
                .control
                .insert_notification(
                    &NewNotification {
                        alert_id: event.id.clone(),
                        incident_id: incident_id.map(str::to_string),
                        channel_id: channel.id.clone(),
                        channel_type: channel.channel_type.clone(),
                        title: rendered.title.clone(),
                        body: rendered.body.clone(),
                    },
                    now,
                )
                .await?;

            let config: serde_json::Value = match serde_json::from_str(&channel.config_json) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        channel_id = %channel.id,
                        channel_name = %channel.name,
                        error = %e,
                        "Invalid channel config JSON"
                    );
                    self.control
                        .mark_notification_failed(
                            &row.id,
                            &format!("invalid channel config: {e}"),
                            0,
                            None,
                        )
                        .await?;
                    continue;
                }
            };

            let job = DeliveryJob {
                notification_id: row.id.clone(),
                channel_id: channel.id.clone(),
                channel_type: channel.channel_type.clone(),
                config,
                alert: event.clone(),
                title: rendered.title.clone(),
                body: rendered.body.clone(),
            };
            if let Err(e) = self.queue.submit(job) {
                tracing::warn!(
                    notification_id = %row.id,
                    channel_id = %channel.id,
                    error = %e,
                    "Delivery queue rejected job"
                );
                self.control
                    .mark_notification_failed(&row.id, &e.to_string(), 0, None)
                    .await?;
            }
        }
        Ok(())
    }
}

// ---- Delivery write-back over the control store ----

/// [`DeliverySink`] backed by the notifications table.
pub struct StoreSink {
    control: Arc<ControlStore>,
}

impl StoreSink {
    pub fn new(control: Arc<ControlStore>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl DeliverySink for StoreSink {
    async fn mark_sent(
        &self,
        notification_id: &str,
        retry_count: i32,
        response_body: Option<&str>,
    ) -> llmscope_notify::error::Result<()> {
        self.control
            .mark_notification_sent(notification_id, retry_count, response_body)
            .await
            .map_err(|e| llmscope_notify::error::NotifyError::Other(e.to_string()))
    }

    async fn mark_failed(
        &self,
        notification_id: &str,
        error: &str,
        retry_count: i32,
        response_body: Option<&str>,
    ) -> llmscope_notify::error::Result<()> {
        self.control
            .mark_notification_failed(notification_id, error, retry_count, response_body)
            .await
            .map_err(|e| llmscope_notify::error::NotifyError::Other(e.to_string()))
    }
}
