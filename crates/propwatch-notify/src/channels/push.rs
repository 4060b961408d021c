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

/// Pushes to device tokens through an HTTP push gateway. Also backs the
/// in-app dashboard feed, which registers as a device token.
pub struct PushChannel {
    instance_id: String,
    client: reqwest::Client,
    gateway_url: String,
    api_key: Option<String>,
    title: String,
}

impl PushChannel {
    pub fn new(
        instance_id: &str,
        gateway_url: &str,
        api_key: Option<String>,
        title: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            instance_id: instance_id.to_string(),
            client,
            gateway_url: gateway_url.to_string(),
            api_key,
            title: title.to_string(),
        })
    }
}

#[async_trait]
impl NotificationChannel for PushChannel {
    async fn deliver(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> std::result::Result<SendReceipt, DeliveryError> {
        validate_recipient(ChannelType::Push, recipient)?;

        let payload = serde_json::json!({
            "token": recipient,
            "title": self.title,
            "body": message.body,
        });

        let mut request = self.client.post(&self.gateway_url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        gateway_response(request.send().await).await
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Push
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

// Plugin

#[derive(Deserialize)]
struct PushConfig {
    gateway_url: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default = "default_title")]
    title: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_title() -> String {
    "propwatch".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

pub struct PushPlugin;

impl ChannelPlugin for PushPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Push
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<PushConfig>(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid push config: {e}"))?;
        Ok(())
    }

    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Arc<dyn NotificationChannel>> {
        let cfg: PushConfig = serde_json::from_value(config.clone())
            .map_err(|e| anyhow::anyhow!("Invalid push config: {e}"))?;
        Ok(Arc::new(PushChannel::new(
            instance_id,
            &cfg.gateway_url,
            cfg.api_key,
            &cfg.title,
            Duration::from_secs(cfg.timeout_secs),
        )?))
    }
}
