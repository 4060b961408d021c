use propwatch_common::types::{AlertRule, ChannelType, MessageTemplate};
use propwatch_notify::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// SQLite file. Empty keeps everything in memory.
    #[serde(default)]
    pub database_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Transports to build through the channel plugin registry.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    /// Static recipient directory.
    #[serde(default)]
    pub recipients: Vec<RecipientEntry>,
    /// Display names for target ids.
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            database_path: String::new(),
            scheduler: SchedulerConfig::default(),
            delivery: DeliveryConfig::default(),
            channels: Vec::new(),
            recipients: Vec::new(),
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_scheduler_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_scheduler_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            tick_secs: default_scheduler_tick_secs(),
            max_concurrent: default_scheduler_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_workers")]
    pub workers: usize,
    #[serde(default = "default_delivery_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_delivery_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delivery_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_delivery_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            workers: default_delivery_workers(),
            queue_capacity: default_delivery_queue_capacity(),
            max_attempts: default_delivery_max_attempts(),
            base_backoff_ms: default_delivery_base_backoff_ms(),
            max_backoff_ms: default_delivery_max_backoff_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.base_backoff_ms)),
        }
    }
}

/// One configured transport. `config` is validated by the channel plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_channel_enabled")]
    pub enabled: bool,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientEntry {
    pub target_id: String,
    pub channel_type: ChannelType,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEntry {
    pub id: String,
    pub name: String,
}

// ---- Seed file types (used by the `init-*` CLI subcommands) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<AlertRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesSeedFile {
    #[serde(default)]
    pub templates: Vec<MessageTemplate>,
}

fn default_http_port() -> u16 {
    8080
}

fn default_scheduler_enabled() -> bool {
    true
}

fn default_scheduler_tick_secs() -> u64 {
    60
}

fn default_scheduler_max_concurrent() -> usize {
    8
}

fn default_delivery_workers() -> usize {
    4
}

fn default_delivery_queue_capacity() -> usize {
    1024
}

fn default_delivery_max_attempts() -> u32 {
    3
}

fn default_delivery_base_backoff_ms() -> u64 {
    100
}

fn default_delivery_max_backoff_ms() -> u64 {
    5_000
}

fn default_channel_enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{path}': {e}"))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{path}': {e}"))?;
        Ok(config)
    }
}
