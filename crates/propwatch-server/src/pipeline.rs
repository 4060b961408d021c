//! Metric value -> classification -> alert instance -> queued deliveries.

use crate::directory::{RecipientDirectory, TargetDirectory};
use crate::metrics::{MetricReading, MetricSource};
use chrono::Utc;
use propwatch_alert::evaluator::{alert_message, classify};
use propwatch_alert::{AlertInstanceManager, TriggerOutcome};
use propwatch_common::types::{AlertRule, Frequency, Level, Thresholds};
use propwatch_notify::template::AlertBindings;
use propwatch_notify::{DeliveryJob, DeliveryQueue, DeliveryTicket};
use propwatch_storage::{RuleStore, TemplateStore};
use serde::Serialize;
use std::sync::Arc;

/// What happened for one target of one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetOutcome {
    pub rule_id: String,
    pub target_id: String,
    /// Absent when the metric value was unavailable.
    pub level: Option<Level>,
    pub value: Option<f64>,
    pub instance_id: Option<String>,
    pub deliveries_queued: usize,
}

/// Result of evaluating one or more rules.
#[derive(Default)]
pub struct Evaluation {
    pub outcomes: Vec<TargetOutcome>,
    /// One per queued delivery, in queue order.
    pub tickets: Vec<DeliveryTicket>,
}

impl Evaluation {
    fn merge(&mut self, other: Evaluation) {
        self.outcomes.extend(other.outcomes);
        self.tickets.extend(other.tickets);
    }
}

/// The value a rule treats as healthy: the nearest edge of its green band.
pub fn target_value(thresholds: &Thresholds) -> Option<f64> {
    thresholds.green_min.or(thresholds.green_max)
}

pub struct AlertPipeline {
    rules: Arc<dyn RuleStore>,
    templates: Arc<dyn TemplateStore>,
    instances: Arc<AlertInstanceManager>,
    metrics: Arc<dyn MetricSource>,
    recipients: RecipientDirectory,
    targets: TargetDirectory,
    queue: Arc<DeliveryQueue>,
}

impl AlertPipeline {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        templates: Arc<dyn TemplateStore>,
        instances: Arc<AlertInstanceManager>,
        metrics: Arc<dyn MetricSource>,
        recipients: RecipientDirectory,
        targets: TargetDirectory,
        queue: Arc<DeliveryQueue>,
    ) -> Self {
        Self {
            rules,
            templates,
            instances,
            metrics,
            recipients,
            targets,
            queue,
        }
    }

    /// Evaluates `rule` against every one of its targets.
    ///
    /// Inactive rules are ignored. Failures for one target are logged and do
    /// not stop the others.
    pub async fn evaluate_rule(&self, rule: &AlertRule) -> Evaluation {
        let mut evaluation = Evaluation::default();
        if !rule.active {
            return evaluation;
        }

        for target_id in &rule.target_ids {
            let Some(reading) = self.metrics.latest(rule.metric_type, target_id).await else {
                tracing::debug!(
                    rule_id = %rule.id,
                    target_id = %target_id,
                    metric = %rule.metric_type,
                    "Evaluation skipped: metric value unavailable"
                );
                evaluation.outcomes.push(TargetOutcome {
                    rule_id: rule.id.clone(),
                    target_id: target_id.clone(),
                    level: None,
                    value: None,
                    instance_id: None,
                    deliveries_queued: 0,
                });
                continue;
            };
            evaluation.merge(self.evaluate_reading(rule, target_id, &reading));
        }

        evaluation
    }

    /// Runs every active `immediate` rule that watches `target_id`.
    pub async fn evaluate_immediate_rules(&self, target_id: &str) -> anyhow::Result<Evaluation> {
        let rules = self.rules.list_active_rules()?;
        let mut evaluation = Evaluation::default();
        for rule in rules
            .iter()
            .filter(|r| r.frequency == Frequency::Immediate && r.target_ids.contains(target_id))
        {
            let Some(reading) = self.metrics.latest(rule.metric_type, target_id).await else {
                continue;
            };
            evaluation.merge(self.evaluate_reading(rule, target_id, &reading));
        }
        Ok(evaluation)
    }

    fn evaluate_reading(
        &self,
        rule: &AlertRule,
        target_id: &str,
        reading: &MetricReading,
    ) -> Evaluation {
        let classification = classify(rule, reading.value);
        let mut outcome = TargetOutcome {
            rule_id: rule.id.clone(),
            target_id: target_id.to_string(),
            level: Some(classification.level),
            value: Some(reading.value),
            instance_id: None,
            deliveries_queued: 0,
        };
        let mut evaluation = Evaluation::default();

        let Some(level) = classification.level.alert_level() else {
            tracing::debug!(
                rule_id = %rule.id,
                target_id,
                explanation = %classification.explanation,
                "Rule evaluated without trigger"
            );
            evaluation.outcomes.push(outcome);
            return evaluation;
        };

        let label = self.targets.label(target_id);
        let message = alert_message(rule, label, reading.value, classification.level);
        match self.instances.trigger(&rule.id, target_id, level, &message) {
            Ok(triggered) => {
                outcome.instance_id = Some(triggered.instance.id.clone());
                if triggered.should_notify() {
                    evaluation.tickets = self.notify(rule, &triggered, reading);
                    outcome.deliveries_queued = evaluation.tickets.len();
                }
            }
            Err(e) => {
                tracing::error!(
                    rule_id = %rule.id,
                    target_id,
                    error = %e,
                    "Failed to record alert instance"
                );
            }
        }

        evaluation.outcomes.push(outcome);
        evaluation
    }

    /// Queues one delivery per configured channel and recipient.
    fn notify(
        &self,
        rule: &AlertRule,
        triggered: &TriggerOutcome,
        reading: &MetricReading,
    ) -> Vec<DeliveryTicket> {
        let instance = &triggered.instance;
        let bindings = AlertBindings {
            property_name: self.targets.label(&instance.target_id),
            level: instance.level,
            metric_type: rule.metric_type,
            value: reading.value,
            target_value: target_value(&rule.thresholds),
            previous_value: reading.previous,
            alert_message: &instance.message,
            triggered_by: &rule.name,
            at: Utc::now(),
        }
        .to_bindings();

        let mut tickets = Vec::new();
        for &channel in &rule.channels {
            let recipients = self.recipients.recipients(&instance.target_id, channel);
            if recipients.is_empty() {
                continue;
            }
            let template = match self.templates.find_active_template(channel) {
                Ok(Some(template)) => template,
                Ok(None) => {
                    tracing::warn!(
                        rule_id = %rule.id,
                        channel = %channel,
                        "No active template for channel, notification dropped"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!(channel = %channel, error = %e, "Failed to load template");
                    continue;
                }
            };

            for recipient in recipients {
                let job = DeliveryJob {
                    template: template.clone(),
                    recipient: recipient.clone(),
                    channel,
                    bindings: bindings.clone(),
                };
                match self.queue.enqueue(job) {
                    Ok(ticket) => tickets.push(ticket),
                    Err(e) => tracing::error!(
                        instance_id = %instance.id,
                        channel = %channel,
                        error = %e,
                        "Failed to queue notification"
                    ),
                }
            }
        }

        tracing::info!(
            instance_id = %instance.id,
            rule_id = %rule.id,
            queued = tickets.len(),
            escalated = triggered.escalated,
            "Alert notifications queued"
        );
        tickets
    }
}
