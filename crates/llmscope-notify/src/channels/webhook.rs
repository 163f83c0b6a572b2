use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::{NotificationChannel, RenderedMessage, SendResponse};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use llmscope_common::types::AlertEvent;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-LLMScope-Signature";

/// Hex-encoded HMAC-SHA256 of the request body, as sent in
/// [`SIGNATURE_HEADER`] (prefixed with `sha256=`).
pub fn sign_body(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub struct WebhookChannel {
    instance_id: String,
    client: reqwest::Client,
    url: String,
    body_template: Option<String>,
    secret: Option<String>,
}

impl WebhookChannel {
    pub fn new(
        instance_id: &str,
        url: &str,
        body_template: Option<String>,
        secret: Option<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            client: reqwest::Client::new(),
            url: url.to_string(),
            body_template,
            secret,
        }
    }

    fn render_body(&self, alert: &AlertEvent, rendered: &RenderedMessage) -> String {
        if let Some(template) = &self.body_template {
            template
                .replace("{{project_id}}", &alert.project_id)
                .replace("{{metric}}", &alert.metric)
                .replace(
                    "{{value}}",
                    &alert.value.map_or_else(|| "null".to_string(), |v| format!("{v:.2}")),
                )
                .replace(
                    "{{threshold}}",
                    &alert
                        .threshold
                        .map_or_else(|| "null".to_string(), |t| format!("{t:.2}")),
                )
                .replace("{{severity}}", &alert.severity.to_string())
                .replace("{{source}}", &alert.source.to_string())
                .replace("{{message}}", &alert.message)
                .replace("{{timestamp}}", &alert.timestamp.to_rfc3339())
                .replace("{{rule_name}}", &alert.rule_name)
                .replace("{{title}}", &rendered.title)
        } else {
            serde_json::json!({
                "alert_id": alert.id,
                "rule_id": alert.rule_id,
                "rule_name": alert.rule_name,
                "project_id": alert.project_id,
                "source": alert.source.to_string(),
                "metric": alert.metric,
                "severity": alert.severity.to_string(),
                "message": alert.message,
                "value": alert.value,
                "threshold": alert.threshold,
                "timestamp": alert.timestamp.to_rfc3339(),
            })
            .to_string()
        }
    }

    /// 单次 POST。配置了 secret 时附带 HMAC 签名头。
    /// 返回（HTTP 状态码，截断后的响应正文）。
    async fn post_once(&self, body: &str) -> Result<(reqwest::StatusCode, String)> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_body(secret, body));
        }
        let resp = request.body(body.to_string()).send().await?;
        let status = resp.status();
        let text = match resp.text().await {
            Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
            Err(e) => format!("[Failed to read response body: {e}]"),
        };
        Ok((status, text))
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    async fn send(&self, alert: &AlertEvent, rendered: &RenderedMessage) -> Result<SendResponse> {
        let body = self.render_body(alert, rendered);
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
                        "Webhook returned non-success status, retrying"
                    );
                    last_err = Some(format!("HTTP {status}: {resp_body}"));
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Webhook send failed, retrying");
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
            tracing::error!(url = %self.url, error = %e, "Webhook failed after 3 attempts");
            response.error = Some(e);
        }
        Ok(response)
    }

    fn channel_type(&self) -> &str {
        "webhook"
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

// Plugin

#[derive(Deserialize)]
struct WebhookConfig {
    url: String,
    body_template: Option<String>,
    secret: Option<String>,
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        if !cfg.url.starts_with("http://") && !cfg.url.starts_with("https://") {
            return Err(NotifyError::InvalidConfig(
                "webhook: url must be an http(s) URL".to_string(),
            ));
        }
        Ok(())
    }

    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Box<dyn NotificationChannel>> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        Ok(Box::new(WebhookChannel::new(
            instance_id,
            &cfg.url,
            cfg.body_template,
            cfg.secret,
        )))
    }
}
