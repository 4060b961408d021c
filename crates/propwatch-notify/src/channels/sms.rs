use super::{gateway_response, validate_recipient};
use crate::error::DeliveryError;
use crate::plugin::ChannelPlugin;
use crate::{NotificationChannel, RenderedMessage, SendReceipt};
use anyhow::Result;
use async_trait::async_trait;
use propwatch_common::types::ChannelType;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct SmsChannel {
    instance_id: String,
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    sender: Option<String>,
}

impl SmsChannel {
    pub fn new(
        instance_id: &str,
        gateway_url: &str,
        api_key: &str,
        sender: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            instance_id: instance_id.to_string(),
            client,
            gateway_url: gateway_url.to_string(),
            api_key: api_key.to_string(),
            sender,
        })
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    async fn deliver(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> std::result::Result<SendReceipt, DeliveryError> {
        validate_recipient(ChannelType::Sms, recipient)?;

        let mut payload = serde_json::json!({
            "to": recipient,
            "message": message.body,
        });
        if let Some(sender) = &self.sender {
            payload["from"] = Value::String(sender.clone());
        }

        let result = self
            .client
            .post(&self.gateway_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload)
            .send()
            .await;
        gateway_response(result).await
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Sms
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

// Plugin

#[derive(Deserialize)]
struct SmsConfig {
    gateway_url: String,
    api_key: String,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

pub struct SmsPlugin;

impl SmsPlugin {
    fn parse(config: &Value) -> Result<SmsConfig> {
        let cfg: SmsConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid sms config: {e}"))?;
        if !cfg.gateway_url.starts_with("http://") && !cfg.gateway_url.starts_with("https://") {
            anyhow::bail!("Invalid sms config: gateway_url must be an http(s) URL");
        }
        Ok(cfg)
    }
}

impl ChannelPlugin for SmsPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Sms
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        Self::parse(config).map(|_| ())
    }

    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Arc<dyn NotificationChannel>> {
        let cfg = Self::parse(config)?;
        Ok(Arc::new(SmsChannel::new(
            instance_id,
            &cfg.gateway_url,
            &cfg.api_key,
            cfg.sender,
            Duration::from_secs(cfg.timeout_secs),
        )?))
    }
}
