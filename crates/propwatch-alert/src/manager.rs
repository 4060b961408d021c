use crate::error::{AlertError, Result};
use chrono::Utc;
use propwatch_common::types::{AlertInstance, AlertLevel, AlertStatus, InstanceFilter};
use propwatch_storage::InstanceStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Key: (rule_id, target_id)
type PairKey = (String, String);

/// Result of [`AlertInstanceManager::trigger`].
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub instance: AlertInstance,
    /// A new instance was opened.
    pub created: bool,
    /// An open instance moved from yellow to red.
    pub escalated: bool,
}

impl TriggerOutcome {
    /// Whether this trigger warrants sending notifications.
    pub fn should_notify(&self) -> bool {
        self.created || self.escalated
    }
}

/// Owns the alert instance lifecycle.
///
/// Writes for one (rule, target) pair are serialized through a per-pair lock,
/// which keeps at most one open instance per pair even when scheduled and
/// manual evaluations race. Different pairs never contend.
pub struct AlertInstanceManager {
    store: Arc<dyn InstanceStore>,
    pair_locks: Mutex<HashMap<PairKey, Arc<Mutex<()>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AlertInstanceManager {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self {
            store,
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` holding the (rule, target) lock. The lock entry is dropped
    /// again once no other caller holds it.
    fn with_pair<R>(&self, rule_id: &str, target_id: &str, f: impl FnOnce() -> R) -> R {
        let key: PairKey = (rule_id.to_string(), target_id.to_string());
        let pair = lock(&self.pair_locks).entry(key.clone()).or_default().clone();

        let result = {
            let _guard = lock(&pair);
            f()
        };

        let mut locks = lock(&self.pair_locks);
        drop(pair);
        if locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&key);
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn tracked_pairs(&self) -> usize {
        lock(&self.pair_locks).len()
    }

    /// Opens an instance for (rule, target), or refreshes the open one in
    /// place. A resolved instance is never reopened; a trigger after
    /// resolution creates a fresh instance.
    pub fn trigger(
        &self,
        rule_id: &str,
        target_id: &str,
        level: AlertLevel,
        message: &str,
    ) -> Result<TriggerOutcome> {
        self.with_pair(rule_id, target_id, || {
            self.trigger_locked(rule_id, target_id, level, message)
        })
    }

    fn trigger_locked(
        &self,
        rule_id: &str,
        target_id: &str,
        level: AlertLevel,
        message: &str,
    ) -> Result<TriggerOutcome> {
        let now = Utc::now();

        if let Some(mut open) = self.store.find_open_instance(rule_id, target_id)? {
            let escalated = level > open.level;
            open.level = level;
            open.message = message.to_string();
            open.updated_at = now;
            self.store.update_instance(&open)?;
            tracing::debug!(
                rule_id,
                target_id,
                instance_id = %open.id,
                level = %level,
                escalated,
                "Open alert refreshed"
            );
            return Ok(TriggerOutcome {
                instance: open,
                created: false,
                escalated,
            });
        }

        let instance = AlertInstance {
            id: propwatch_common::id::next_id(),
            rule_id: rule_id.to_string(),
            target_id: target_id.to_string(),
            level,
            message: message.to_string(),
            status: AlertStatus::Active,
            created_at: now,
            updated_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
        };
        self.store.insert_instance(&instance)?;
        tracing::info!(
            rule_id,
            target_id,
            instance_id = %instance.id,
            level = %level,
            "Alert opened"
        );

        Ok(TriggerOutcome {
            instance,
            created: true,
            escalated: false,
        })
    }

    /// `active -> acknowledged`.
    pub fn acknowledge(&self, instance_id: &str, by: &str) -> Result<AlertInstance> {
        self.transition(instance_id, AlertStatus::Acknowledged, "acknowledge", |instance| {
            let now = Utc::now();
            instance.acknowledged_at = Some(now);
            instance.acknowledged_by = Some(by.to_string());
            instance.updated_at = now;
        })
    }

    /// `active | acknowledged -> resolved`.
    pub fn resolve(&self, instance_id: &str, by: &str) -> Result<AlertInstance> {
        self.transition(instance_id, AlertStatus::Resolved, "resolve", |instance| {
            let now = Utc::now();
            instance.resolved_at = Some(now);
            instance.resolved_by = Some(by.to_string());
            instance.updated_at = now;
        })
    }

    fn transition<F>(
        &self,
        instance_id: &str,
        next: AlertStatus,
        action: &'static str,
        stamp: F,
    ) -> Result<AlertInstance>
    where
        F: FnOnce(&mut AlertInstance),
    {
        let current = self.get(instance_id)?;

        // Re-read under the pair lock so a concurrent trigger or transition
        // cannot interleave with this one.
        self.with_pair(&current.rule_id, &current.target_id, || {
            let mut instance = self.get(instance_id)?;

            if !instance.status.can_transition_to(next) {
                tracing::warn!(
                    instance_id,
                    from = %instance.status,
                    action,
                    "Rejected alert transition"
                );
                return Err(AlertError::InvalidTransition {
                    id: instance.id,
                    from: instance.status,
                    action,
                });
            }

            instance.status = next;
            stamp(&mut instance);
            self.store.update_instance(&instance)?;
            tracing::info!(instance_id, status = %next, "Alert status changed");
            Ok(instance)
        })
    }

    pub fn get(&self, instance_id: &str) -> Result<AlertInstance> {
        self.store
            .get_instance(instance_id)?
            .ok_or_else(|| AlertError::NotFound {
                entity: "alert_instance",
                id: instance_id.to_string(),
            })
    }

    /// Instances matching `filter`, newest first.
    pub fn list(&self, filter: &InstanceFilter) -> Result<Vec<AlertInstance>> {
        Ok(self.store.list_instances(filter)?)
    }
}
