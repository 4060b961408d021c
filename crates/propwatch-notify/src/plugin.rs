use crate::NotificationChannel;
use anyhow::Result;
use propwatch_common::types::ChannelType;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for creating [`NotificationChannel`] instances from JSON
/// configuration.
///
/// Each plugin is registered in the [`ChannelRegistry`] under its
/// [`ChannelType`]. The server validates and instantiates the configured
/// channels through the matching plugin at startup.
pub trait ChannelPlugin: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Validates a JSON config blob against this plugin's expected schema.
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// Creates a configured channel from a validated JSON config.
    fn create_channel(
        &self,
        instance_id: &str,
        config: &Value,
    ) -> Result<Arc<dyn NotificationChannel>>;

    /// Returns a copy of `config` with secrets replaced by `"***"`.
    fn redact_config(&self, config: &Value) -> Value {
        crate::utils::redact_sensitive_json(config)
    }
}

/// Registry of available [`ChannelPlugin`]s.
///
/// # Examples
///
/// ```
/// use propwatch_common::types::ChannelType;
/// use propwatch_notify::plugin::ChannelRegistry;
///
/// let registry = ChannelRegistry::default();
/// for channel in [ChannelType::Email, ChannelType::Sms, ChannelType::Push] {
///     assert!(registry.get_plugin(channel).is_some());
/// }
/// ```
pub struct ChannelRegistry {
    plugins: HashMap<ChannelType, Box<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.channel_type(), plugin);
    }

    /// Resolves `type_name` (aliases included), validates `config` and builds
    /// the channel.
    pub fn create_channel(
        &self,
        type_name: &str,
        instance_id: &str,
        config: &Value,
    ) -> Result<Arc<dyn NotificationChannel>> {
        let plugin = self.plugin_for(type_name)?;
        plugin.validate_config(config)?;
        plugin.create_channel(instance_id, config)
    }

    /// Redacted copy of `config` for display.
    pub fn redact_config(&self, type_name: &str, config: &Value) -> Result<Value> {
        Ok(self.plugin_for(type_name)?.redact_config(config))
    }

    pub fn get_plugin(&self, channel_type: ChannelType) -> Option<&dyn ChannelPlugin> {
        self.plugins.get(&channel_type).map(|p| p.as_ref())
    }

    fn plugin_for(&self, type_name: &str) -> Result<&dyn ChannelPlugin> {
        let channel_type: ChannelType = type_name
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown channel plugin type: {type_name}"))?;
        self.get_plugin(channel_type)
            .ok_or_else(|| anyhow::anyhow!("No plugin registered for channel type: {channel_type}"))
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry.register(Box::new(crate::channels::sms::SmsPlugin));
        registry.register(Box::new(crate::channels::push::PushPlugin));
        registry
    }
}
