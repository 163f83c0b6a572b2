use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{redact_json_string, truncate_string, MAX_BODY_LENGTH};
use crate::{NotificationChannel, RenderedMessage, SendResponse};
use async_trait::async_trait;
use llmscope_common::types::{AlertEvent, Severity};
use serde::Deserialize;
use serde_json::Value;

const EVENTS_API_URL: &str = "https://events.pagerduty.com/v2/enqueue";

pub struct PagerDutyChannel {
    instance_id: String,
    client: reqwest::Client,
    routing_key: String,
    api_url: String,
}

impl PagerDutyChannel {
    pub fn new(instance_id: &str, routing_key: &str, api_url: Option<String>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            client: reqwest::Client::new(),
            routing_key: routing_key.to_string(),
            api_url: api_url.unwrap_or_else(|| EVENTS_API_URL.to_string()),
        }
    }

    fn pd_severity(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    fn build_event(&self, alert: &AlertEvent, rendered: &RenderedMessage) -> Value {
        // 同一规则的重复触发复用 dedup_key，让 PagerDuty 合并为一个事件
        let dedup_key = alert
            .rule_id
            .clone()
            .unwrap_or_else(|| alert.id.clone());
        serde_json::json!({
            "routing_key": self.routing_key,
            "event_action": "trigger",
            "dedup_key": dedup_key,
            "payload": {
                "summary": rendered.title,
                "source": alert.project_id,
                "severity": Self::pd_severity(alert.severity),
                "timestamp": alert.timestamp.to_rfc3339(),
                "custom_details": {
                    "metric": alert.metric,
                    "value": alert.value,
                    "threshold": alert.threshold,
                    "message": alert.message,
                },
            },
        })
    }
}

#[async_trait]
impl NotificationChannel for PagerDutyChannel {
    async fn send(&self, alert: &AlertEvent, rendered: &RenderedMessage) -> Result<SendResponse> {
        let body = self.build_event(alert, rendered).to_string();

        let mut response = SendResponse {
            request_body: Some(truncate_string(&redact_json_string(&body), MAX_BODY_LENGTH)),
            ..Default::default()
        };

        let mut last_err = None;
        let mut attempts = 0u32;
        for attempt in 0..3u32 {
            attempts = attempt + 1;
            match self
                .client
                .post(&self.api_url)
                .header("Content-Type", "application/json")
                .body(body.clone())
                .send()
                .await
            {
                Ok(resp) => {
                    let status = resp.status();
                    response.http_status = Some(status.as_u16());
                    let resp_body = match resp.text().await {
                        Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
                        Err(e) => format!("[Failed to read response body: {}]", e),
                    };
                    response.response_body = Some(resp_body.clone());

                    // Events API answers 202 Accepted on success
                    if status.is_success() {
                        last_err = None;
                        break;
                    }
                    tracing::warn!(
                        attempt = attempts,
                        status = %status,
                        "PagerDuty returned non-success status, retrying"
                    );
                    last_err = Some(format!("HTTP {status}: {resp_body}"));
                }
                Err(e) => {
                    tracing::warn!(attempt = attempts, error = %e, "PagerDuty send failed, retrying");
                    last_err = Some(e.to_string());
                }
            }
            if attempt < 2 {
                tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }

        response.retry_count = attempts.saturating_sub(1);
        if let Some(e) = last_err {
            tracing::error!(error = %e, "PagerDuty event failed after 3 attempts");
            response.error = Some(e);
        }
        Ok(response)
    }

    fn channel_type(&self) -> &str {
        "pagerduty"
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

// Plugin

#[derive(Deserialize)]
struct PagerDutyConfig {
    routing_key: String,
    api_url: Option<String>,
}

pub struct PagerDutyPlugin;

impl ChannelPlugin for PagerDutyPlugin {
    fn name(&self) -> &str {
        "pagerduty"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: PagerDutyConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("pagerduty: {e}")))?;
        if cfg.routing_key.trim().is_empty() {
            return Err(NotifyError::InvalidConfig(
                "pagerduty: routing_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Box<dyn NotificationChannel>> {
        let cfg: PagerDutyConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("pagerduty: {e}")))?;
        Ok(Box::new(PagerDutyChannel::new(
            instance_id,
            &cfg.routing_key,
            cfg.api_url,
        )))
    }
}
