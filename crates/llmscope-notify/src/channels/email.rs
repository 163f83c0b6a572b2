use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::{NotificationChannel, RenderedMessage, SendResponse};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use llmscope_common::types::AlertEvent;
use serde::Deserialize;
use serde_json::Value;

pub struct EmailChannel {
    instance_id: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    to: Vec<String>,
}

impl EmailChannel {
    pub fn new(
        instance_id: &str,
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        to: Vec<String>,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?
            .port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let transport = builder.build();
        Ok(Self {
            instance_id: instance_id.to_string(),
            transport,
            from: from.to_string(),
            to,
        })
    }

    /// 最多尝试 3 次，指数退避 100ms/200ms。
    /// 返回（重试次数，最终错误）。
    async fn deliver_with_retry(&self, email: &Message, recipient: &str) -> (u32, Option<String>) {
        let mut retries = 0u32;
        for attempt in 0..3u32 {
            match self.transport.send(email.clone()).await {
                Ok(_) => return (retries, None),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        recipient = %recipient,
                        error = %e,
                        "Email send failed, retrying"
                    );
                    if attempt == 2 {
                        tracing::error!(recipient = %recipient, error = %e, "Email failed after 3 attempts");
                        return (retries, Some(e.to_string()));
                    }
                    retries += 1;
                    let backoff = std::time::Duration::from_millis(100 * 2u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        (retries, None)
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn send(&self, _alert: &AlertEvent, rendered: &RenderedMessage) -> Result<SendResponse> {
        // 记录 request_body（邮件内容）
        let request_body = serde_json::json!({
            "from": self.from,
            "subject": rendered.title,
            "body": rendered.body,
        });
        let request_body_str = serde_json::to_string(&request_body).unwrap_or_default();

        let mut response = SendResponse {
            request_body: Some(truncate_string(&request_body_str, MAX_BODY_LENGTH)),
            ..Default::default()
        };

        if self.to.is_empty() {
            response.error = Some("no recipients configured".to_string());
            return Ok(response);
        }

        let from: lettre::message::Mailbox = self
            .from
            .parse()
            .map_err(|e| NotifyError::InvalidConfig(format!("bad from address: {e}")))?;

        let mut total_retries = 0u32;
        let mut failures: Vec<String> = Vec::new();

        for recipient in &self.to {
            let to = match recipient.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    failures.push(format!("{recipient}: bad address ({e})"));
                    continue;
                }
            };
            let email = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(&rendered.title)
                .header(ContentType::TEXT_PLAIN)
                .body(rendered.body.clone())
                .map_err(|e| NotifyError::Smtp(e.to_string()))?;

            let (retries, err) = self.deliver_with_retry(&email, recipient).await;
            total_retries += retries;
            if let Some(e) = err {
                failures.push(format!("{recipient}: {e}"));
            }
        }

        response.retry_count = total_retries;
        if !failures.is_empty() {
            response.error = Some(failures.join("; "));
        }
        Ok(response)
    }

    fn channel_type(&self) -> &str {
        "email"
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

// Plugin

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
    to: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn name(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<EmailConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        Ok(())
    }

    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Box<dyn NotificationChannel>> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        Ok(Box::new(EmailChannel::new(
            instance_id,
            &cfg.smtp_host,
            cfg.smtp_port,
            cfg.smtp_username.as_deref(),
            cfg.smtp_password.as_deref(),
            &cfg.from,
            cfg.to,
        )?))
    }
}
