use crate::config::ServerConfig;
use crate::directory::{RecipientDirectory, TargetDirectory};
use crate::metrics::MetricCache;
use crate::pipeline::AlertPipeline;
use crate::service::{RuleService, TemplateService};
use chrono::{DateTime, Utc};
use propwatch_alert::AlertInstanceManager;
use propwatch_common::types::ChannelType;
use propwatch_notify::plugin::ChannelRegistry;
use propwatch_notify::{DeliveryQueue, Dispatcher, NotificationChannel};
use propwatch_storage::{DeliveryLogStore, InstanceStore, RuleStore, Store, TemplateStore};
use serde::Serialize;
use std::sync::Arc;

/// A configured transport as shown to operators, secrets redacted.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub id: String,
    pub channel_type: ChannelType,
    pub config: serde_json::Value,
}

/// Builds every enabled transport in `config.channels` through the plugin
/// registry.
pub fn build_channels(
    config: &ServerConfig,
    registry: &ChannelRegistry,
) -> anyhow::Result<(Vec<Arc<dyn NotificationChannel>>, Vec<ChannelInfo>)> {
    let mut channels = Vec::new();
    let mut infos = Vec::new();

    for entry in config.channels.iter().filter(|c| c.enabled) {
        let id = entry
            .id
            .clone()
            .unwrap_or_else(propwatch_common::id::next_id);
        let channel = registry
            .create_channel(&entry.channel_type, &id, &entry.config)
            .map_err(|e| anyhow::anyhow!("Channel '{id}' ({}): {e}", entry.channel_type))?;
        infos.push(ChannelInfo {
            id: id.clone(),
            channel_type: channel.channel_type(),
            config: registry.redact_config(&entry.channel_type, &entry.config)?,
        });
        tracing::info!(channel_id = %id, channel = %channel.channel_type(), "Notification channel configured");
        channels.push(channel);
    }

    Ok((channels, infos))
}

#[derive(Clone)]
pub struct AppState {
    pub rule_store: Arc<dyn RuleStore>,
    pub rules: Arc<RuleService>,
    pub templates: Arc<TemplateService>,
    pub instances: Arc<AlertInstanceManager>,
    pub dispatcher: Arc<Dispatcher>,
    /// Drained by `main` on shutdown.
    pub queue: Arc<DeliveryQueue>,
    pub pipeline: Arc<AlertPipeline>,
    pub metrics: Arc<MetricCache>,
    pub channels: Arc<Vec<ChannelInfo>>,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wires the stores, dispatcher, delivery workers and pipeline together.
    ///
    /// Must run inside a tokio runtime; the delivery workers are spawned here.
    pub fn build<S: Store + 'static>(
        config: ServerConfig,
        store: Arc<S>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        channel_info: Vec<ChannelInfo>,
    ) -> Self {
        let rule_store: Arc<dyn RuleStore> = store.clone();
        let template_store: Arc<dyn TemplateStore> = store.clone();
        let instance_store: Arc<dyn InstanceStore> = store.clone();
        let log_store: Arc<dyn DeliveryLogStore> = store;

        let dispatcher = Arc::new(Dispatcher::new(
            channels,
            log_store,
            config.delivery.retry_policy(),
        ));
        let queue = Arc::new(DeliveryQueue::start(
            dispatcher.clone(),
            config.delivery.workers,
            config.delivery.queue_capacity,
        ));
        let instances = Arc::new(AlertInstanceManager::new(instance_store));
        let metrics = Arc::new(MetricCache::new());

        let pipeline = Arc::new(AlertPipeline::new(
            rule_store.clone(),
            template_store.clone(),
            instances.clone(),
            metrics.clone(),
            RecipientDirectory::from_entries(&config.recipients),
            TargetDirectory::from_entries(&config.targets),
            queue.clone(),
        ));

        Self {
            rules: Arc::new(RuleService::new(rule_store.clone())),
            templates: Arc::new(TemplateService::new(template_store, dispatcher.clone())),
            rule_store,
            instances,
            dispatcher,
            queue,
            pipeline,
            metrics,
            channels: Arc::new(channel_info),
            start_time: Utc::now(),
            config: Arc::new(config),
        }
    }
}
