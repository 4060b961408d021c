use super::validate_recipient;
use crate::error::DeliveryError;
use crate::plugin::ChannelPlugin;
use crate::utils::{truncate_string, MAX_ERROR_LENGTH};
use crate::{NotificationChannel, RenderedMessage, SendReceipt};
use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use propwatch_common::types::ChannelType;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const FALLBACK_SUBJECT: &str = "[propwatch] Portfolio alert";

pub struct EmailChannel {
    instance_id: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailChannel {
    pub fn new(
        instance_id: &str,
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?.port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        let from: Mailbox = from
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid email config: from address: {e}"))?;

        Ok(Self {
            instance_id: instance_id.to_string(),
            transport: builder.build(),
            from,
        })
    }

    fn build_message(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> std::result::Result<Message, DeliveryError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| DeliveryError::Rejected(format!("recipient {recipient}: {e}")))?;
        let subject = message.subject.as_deref().unwrap_or(FALLBACK_SUBJECT);

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| DeliveryError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    async fn deliver(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> std::result::Result<SendReceipt, DeliveryError> {
        validate_recipient(ChannelType::Email, recipient)?;
        let email = self.build_message(recipient, message)?;

        match self.transport.send(email).await {
            Ok(response) => Ok(SendReceipt {
                provider_message_id: response.first_line().map(str::to_string),
            }),
            Err(e) => {
                let detail = truncate_string(&e.to_string(), MAX_ERROR_LENGTH);
                // 5xx replies mean the server refused the recipient for good
                if e.is_permanent() {
                    Err(DeliveryError::Bounced(detail))
                } else {
                    Err(DeliveryError::Transient(detail))
                }
            }
        }
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

// Plugin

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid email config: {e}"))?;
        cfg.from
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("Invalid email config: from address: {e}"))?;
        Ok(())
    }

    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Arc<dyn NotificationChannel>> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid email config: {e}"))?;
        let channel = EmailChannel::new(
            instance_id,
            &cfg.smtp_host,
            cfg.smtp_port,
            cfg.smtp_username.as_deref(),
            cfg.smtp_password.as_deref(),
            &cfg.from,
        )?;
        Ok(Arc::new(channel))
    }
}
