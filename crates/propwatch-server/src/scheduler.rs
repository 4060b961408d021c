use crate::pipeline::AlertPipeline;
use anyhow::Result;
use chrono::{DateTime, Utc};
use propwatch_common::types::AlertRule;
use propwatch_storage::RuleStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::time::{interval, Duration};

/// Periodically evaluates active rules whose frequency interval has elapsed.
pub struct RuleScheduler {
    rules: Arc<dyn RuleStore>,
    pipeline: Arc<AlertPipeline>,
    tick_secs: u64,
    max_concurrent: usize,
    /// rule_id -> last scheduled evaluation
    last_run: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RuleScheduler {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        pipeline: Arc<AlertPipeline>,
        tick_secs: u64,
        max_concurrent: usize,
    ) -> Self {
        Self {
            rules,
            pipeline,
            tick_secs: tick_secs.max(1),
            max_concurrent: max_concurrent.max(1),
            last_run: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self) {
        tracing::info!(
            tick_secs = self.tick_secs,
            max_concurrent = self.max_concurrent,
            "Rule scheduler started"
        );

        let mut tick = interval(Duration::from_secs(self.tick_secs));
        loop {
            tick.tick().await;
            if let Err(e) = self.run_due(Utc::now()).await {
                tracing::error!(error = %e, "Rule evaluation cycle failed");
            }
        }
    }

    fn is_due(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        let Some(every) = rule.frequency.interval() else {
            return true;
        };
        let last_run = self
            .last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        last_run
            .get(&rule.id)
            .map_or(true, |last| now - *last >= every)
    }

    /// Drops schedule entries of rules that were deleted or deactivated.
    /// A reactivated rule is due again straight away.
    fn forget_inactive(&self, active: &[AlertRule]) {
        let ids: HashSet<&str> = active.iter().map(|r| r.id.as_str()).collect();
        self.last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|id, _| ids.contains(id.as_str()));
    }

    #[cfg(test)]
    pub(crate) fn tracked_rules(&self) -> usize {
        self.last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Evaluates every due rule once and returns how many ran.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let active = self.rules.list_active_rules()?;
        self.forget_inactive(&active);
        let due: Vec<AlertRule> = active
            .into_iter()
            .filter(|rule| self.is_due(rule, now))
            .collect();

        if due.is_empty() {
            return Ok(0);
        }

        tracing::debug!(count = due.len(), "Evaluating due rules");

        {
            let mut last_run = self
                .last_run
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for rule in &due {
                last_run.insert(rule.id.clone(), now);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(due.len());

        for rule in due {
            let permit = semaphore.clone().acquire_owned().await?;
            let pipeline = self.pipeline.clone();
            handles.push(tokio::spawn(async move {
                let evaluation = pipeline.evaluate_rule(&rule).await;
                let triggered = evaluation
                    .outcomes
                    .iter()
                    .filter(|o| o.instance_id.is_some())
                    .count();
                if triggered > 0 {
                    tracing::info!(
                        rule_id = %rule.id,
                        rule = %rule.name,
                        triggered,
                        queued = evaluation.tickets.len(),
                        "Scheduled rule evaluation triggered alerts"
                    );
                }
                drop(permit);
            }));
        }

        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Rule evaluation task panicked");
            }
        }

        Ok(count)
    }
}
