//! Persistence for the four propwatch record families.
//!
//! Each family sits behind its own repository trait so the alert and
//! notification crates can be wired against any backend. Two backends ship
//! here: [`memory::MemoryStore`] (default, and the test double) and
//! [`sqlite::SqliteStore`], a single WAL-mode SQLite database.
//!
//! Records are never cascade-deleted: deleting a rule leaves its alert
//! instances in place, and delivery logs outlive their templates.

pub mod error;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
mod tests;

use chrono::NaiveDate;
use error::Result;
use propwatch_common::types::{
    AlertInstance, AlertRule, ChannelType, DateRange, DeliveryLog, DeliveryStatistic,
    InstanceFilter, MessageTemplate, StatCounter,
};

/// Alert rule definitions.
pub trait RuleStore: Send + Sync {
    /// Inserts or replaces a rule by id.
    fn upsert_rule(&self, rule: &AlertRule) -> Result<()>;

    fn get_rule(&self, id: &str) -> Result<Option<AlertRule>>;

    /// All rules, active or not, ordered by name.
    fn list_rules(&self) -> Result<Vec<AlertRule>>;

    /// Returns true if the rule existed.
    fn delete_rule(&self, id: &str) -> Result<bool>;

    /// Rules eligible for evaluation.
    fn list_active_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self
            .list_rules()?
            .into_iter()
            .filter(|r| r.active)
            .collect())
    }
}

/// Alert instances. Implementations never delete instances.
///
/// The store does not enforce the one-open-instance-per-(rule, target)
/// invariant on its own; callers serialize the find-then-write sequence
/// (see the alert crate's instance manager).
pub trait InstanceStore: Send + Sync {
    fn insert_instance(&self, instance: &AlertInstance) -> Result<()>;

    /// Replaces an existing instance. Fails with `NotFound` when absent.
    fn update_instance(&self, instance: &AlertInstance) -> Result<()>;

    fn get_instance(&self, id: &str) -> Result<Option<AlertInstance>>;

    /// The active or acknowledged instance for (rule, target), if any.
    fn find_open_instance(&self, rule_id: &str, target_id: &str) -> Result<Option<AlertInstance>>;

    /// Instances matching `filter`, newest first.
    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<AlertInstance>>;
}

/// Message templates.
pub trait TemplateStore: Send + Sync {
    fn upsert_template(&self, template: &MessageTemplate) -> Result<()>;

    fn get_template(&self, id: &str) -> Result<Option<MessageTemplate>>;

    /// Templates ordered by name, optionally limited to one channel.
    fn list_templates(&self, channel: Option<ChannelType>) -> Result<Vec<MessageTemplate>>;

    fn delete_template(&self, id: &str) -> Result<bool>;

    /// The most recently updated active template for a channel.
    fn find_active_template(&self, channel: ChannelType) -> Result<Option<MessageTemplate>> {
        Ok(self
            .list_templates(Some(channel))?
            .into_iter()
            .filter(|t| t.active)
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at)))
    }
}

/// Delivery logs plus the statistics derived from them.
pub trait DeliveryLogStore: Send + Sync {
    fn insert_log(&self, log: &DeliveryLog) -> Result<()>;

    /// Replaces an existing log. Fails with `NotFound` when absent.
    fn update_log(&self, log: &DeliveryLog) -> Result<()>;

    fn get_log(&self, id: &str) -> Result<Option<DeliveryLog>>;

    /// Most recent logs first.
    fn list_logs(&self, limit: usize) -> Result<Vec<DeliveryLog>>;

    /// Increments `counter` in the (date, channel) bucket unless it was
    /// already applied for `log_id`. Returns whether the bucket changed.
    ///
    /// The mark and the increment happen atomically.
    fn apply_stat(
        &self,
        log_id: &str,
        date: NaiveDate,
        channel: ChannelType,
        counter: StatCounter,
    ) -> Result<bool>;

    /// Buckets inside `range`, ordered by date then channel.
    fn query_statistics(
        &self,
        range: &DateRange,
        channel: Option<ChannelType>,
    ) -> Result<Vec<DeliveryStatistic>>;
}

/// Convenience bound for a backend that owns every record family.
pub trait Store: RuleStore + InstanceStore + TemplateStore + DeliveryLogStore {}

impl<T> Store for T where T: RuleStore + InstanceStore + TemplateStore + DeliveryLogStore {}
