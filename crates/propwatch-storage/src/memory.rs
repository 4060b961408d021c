use crate::error::{Result, StorageError};
use crate::{DeliveryLogStore, InstanceStore, RuleStore, TemplateStore};
use chrono::NaiveDate;
use propwatch_common::types::{
    AlertInstance, AlertRule, ChannelType, DateRange, DeliveryLog, DeliveryStatistic,
    InstanceFilter, MessageTemplate, StatCounter,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Stats {
    buckets: BTreeMap<(NaiveDate, ChannelType), DeliveryStatistic>,
    applied: HashSet<(String, StatCounter)>,
}

/// In-process store holding every record family in memory.
///
/// Each family has its own lock; no lock is held across calls.
#[derive(Default)]
pub struct MemoryStore {
    rules: Mutex<HashMap<String, AlertRule>>,
    instances: Mutex<HashMap<String, AlertInstance>>,
    templates: Mutex<HashMap<String, MessageTemplate>>,
    logs: Mutex<HashMap<String, DeliveryLog>>,
    stats: Mutex<Stats>,
}

/// Lock a mutex, recovering from poisoning. Records are replaced whole, so
/// a panicking writer cannot leave one half-updated.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleStore for MemoryStore {
    fn upsert_rule(&self, rule: &AlertRule) -> Result<()> {
        lock(&self.rules).insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    fn get_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        Ok(lock(&self.rules).get(id).cloned())
    }

    fn list_rules(&self) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = lock(&self.rules).values().cloned().collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }

    fn delete_rule(&self, id: &str) -> Result<bool> {
        Ok(lock(&self.rules).remove(id).is_some())
    }
}

impl InstanceStore for MemoryStore {
    fn insert_instance(&self, instance: &AlertInstance) -> Result<()> {
        lock(&self.instances).insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    fn update_instance(&self, instance: &AlertInstance) -> Result<()> {
        let mut instances = lock(&self.instances);
        match instances.get_mut(&instance.id) {
            Some(existing) => {
                *existing = instance.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "alert_instance",
                id: instance.id.clone(),
            }),
        }
    }

    fn get_instance(&self, id: &str) -> Result<Option<AlertInstance>> {
        Ok(lock(&self.instances).get(id).cloned())
    }

    fn find_open_instance(&self, rule_id: &str, target_id: &str) -> Result<Option<AlertInstance>> {
        Ok(lock(&self.instances)
            .values()
            .find(|i| i.rule_id == rule_id && i.target_id == target_id && i.status.is_open())
            .cloned())
    }

    fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<AlertInstance>> {
        let mut items: Vec<AlertInstance> = lock(&self.instances)
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(items)
    }
}

impl TemplateStore for MemoryStore {
    fn upsert_template(&self, template: &MessageTemplate) -> Result<()> {
        lock(&self.templates).insert(template.id.clone(), template.clone());
        Ok(())
    }

    fn get_template(&self, id: &str) -> Result<Option<MessageTemplate>> {
        Ok(lock(&self.templates).get(id).cloned())
    }

    fn list_templates(&self, channel: Option<ChannelType>) -> Result<Vec<MessageTemplate>> {
        let mut items: Vec<MessageTemplate> = lock(&self.templates)
            .values()
            .filter(|t| channel.map_or(true, |c| c == t.channel_type))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    fn delete_template(&self, id: &str) -> Result<bool> {
        Ok(lock(&self.templates).remove(id).is_some())
    }
}

impl DeliveryLogStore for MemoryStore {
    fn insert_log(&self, log: &DeliveryLog) -> Result<()> {
        lock(&self.logs).insert(log.id.clone(), log.clone());
        Ok(())
    }

    fn update_log(&self, log: &DeliveryLog) -> Result<()> {
        let mut logs = lock(&self.logs);
        match logs.get_mut(&log.id) {
            Some(existing) => {
                *existing = log.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                entity: "delivery_log",
                id: log.id.clone(),
            }),
        }
    }

    fn get_log(&self, id: &str) -> Result<Option<DeliveryLog>> {
        Ok(lock(&self.logs).get(id).cloned())
    }

    fn list_logs(&self, limit: usize) -> Result<Vec<DeliveryLog>> {
        let mut items: Vec<DeliveryLog> = lock(&self.logs).values().cloned().collect();
        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        items.truncate(limit);
        Ok(items)
    }

    fn apply_stat(
        &self,
        log_id: &str,
        date: NaiveDate,
        channel: ChannelType,
        counter: StatCounter,
    ) -> Result<bool> {
        let mut stats = lock(&self.stats);
        if !stats.applied.insert((log_id.to_string(), counter)) {
            return Ok(false);
        }
        stats
            .buckets
            .entry((date, channel))
            .or_insert_with(|| DeliveryStatistic::empty(date, channel))
            .bump(counter);
        Ok(true)
    }

    fn query_statistics(
        &self,
        range: &DateRange,
        channel: Option<ChannelType>,
    ) -> Result<Vec<DeliveryStatistic>> {
        Ok(lock(&self.stats)
            .buckets
            .values()
            .filter(|s| range.contains(s.date) && channel.map_or(true, |c| c == s.channel))
            .cloned()
            .collect())
    }
}
