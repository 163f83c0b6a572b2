use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::{NotificationChannel, RenderedMessage, SendResponse};
use async_trait::async_trait;
use llmscope_common::types::AlertEvent;
use serde::Deserialize;
use serde_json::Value;

pub struct SlackChannel {
    instance_id: String,
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackChannel {
    pub fn new(instance_id: &str, webhook_url: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }

    /// 单次投递到 incoming webhook，返回（状态码，截断后的响应正文）。
    async fn post_once(&self, body: &str) -> Result<(reqwest::StatusCode, String)> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await?;
        let status = resp.status();
        let text = match resp.text().await {
            Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
            Err(e) => format!("[Failed to read response body: {e}]"),
        };
        Ok((status, text))
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    async fn send(&self, _alert: &AlertEvent, rendered: &RenderedMessage) -> Result<SendResponse> {
        let body = serde_json::json!({
            "text": format!("*{}*\n{}", rendered.title, rendered.body),
        })
        .to_string();

        let mut response = SendResponse {
            request_body: Some(truncate_string(&body, MAX_BODY_LENGTH)),
            ..Default::default()
        };

        let mut retries = 0u32;
        let mut last_err: Option<String> = None;
        for attempt in 0..3u32 {
            match self.post_once(&body).await {
                Ok((status, resp_body)) => {
                    response.http_status = Some(status.as_u16());
                    response.response_body = Some(resp_body.clone());
                    if status.is_success() {
                        last_err = None;
                        break;
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        status = %status,
                        "Slack webhook returned non-success status, retrying"
                    );
                    last_err = Some(format!("HTTP {status}: {resp_body}"));
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Slack send failed, retrying");
                    last_err = Some(e.to_string());
                }
            }
            if attempt == 2 {
                break;
            }
            retries += 1;
            tokio::time::sleep(std::time::Duration::from_millis(100 * 2u64.pow(attempt))).await;
        }

        response.retry_count = retries;
        if let Some(e) = last_err {
            tracing::error!(error = %e, "Slack webhook failed after 3 attempts");
            response.error = Some(e);
        }
        Ok(response)
    }

    fn channel_type(&self) -> &str {
        "slack"
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

// Plugin

#[derive(Deserialize)]
struct SlackConfig {
    webhook_url: String,
}

pub struct SlackPlugin;

impl ChannelPlugin for SlackPlugin {
    fn name(&self) -> &str {
        "slack"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: SlackConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("slack: {e}")))?;
        if !cfg.webhook_url.starts_with("https://") {
            return Err(NotifyError::InvalidConfig(
                "slack: webhook_url must be an https URL".to_string(),
            ));
        }
        Ok(())
    }

    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Box<dyn NotificationChannel>> {
        let cfg: SlackConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("slack: {e}")))?;
        Ok(Box::new(SlackChannel::new(instance_id, &cfg.webhook_url)))
    }
}
