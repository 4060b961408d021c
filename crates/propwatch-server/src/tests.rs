use crate::config::{RecipientEntry, RulesSeedFile, ServerConfig, TargetEntry};
use crate::pipeline::target_value;
use crate::scheduler::RuleScheduler;
use crate::seed::{seed_rules, SeedSummary};
use crate::state::AppState;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use propwatch_alert::AlertError;
use propwatch_common::types::{
    AlertRule, ChannelType, DateRange, DeliveryStatus, Frequency, InstanceFilter, Level,
    MessageTemplate, MetricType, Thresholds,
};
use propwatch_notify::error::DeliveryError;
use propwatch_notify::{Bindings, NotificationChannel, NotifyError, RenderedMessage, SendReceipt};
use propwatch_storage::memory::MemoryStore;
use std::sync::{Arc, Mutex};

const TARGET: &str = "sunset-gardens";

/// Transport that accepts everything and remembers what it saw.
struct RecordingChannel {
    channel: ChannelType,
    sent: Mutex<Vec<(String, RenderedMessage)>>,
}

impl RecordingChannel {
    fn new(channel: ChannelType) -> Arc<Self> {
        Arc::new(Self {
            channel,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(String, RenderedMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn deliver(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> Result<SendReceipt, DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.clone()));
        Ok(SendReceipt {
            provider_message_id: Some("provider-1".into()),
        })
    }

    fn channel_type(&self) -> ChannelType {
        self.channel
    }

    fn instance_id(&self) -> &str {
        "recording"
    }
}

/// Email transport that holds every delivery until a permit is released.
struct StalledChannel {
    gate: tokio::sync::Semaphore,
}

#[async_trait]
impl NotificationChannel for StalledChannel {
    async fn deliver(
        &self,
        _recipient: &str,
        _message: &RenderedMessage,
    ) -> Result<SendReceipt, DeliveryError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| DeliveryError::Transient("gate closed".into()))?;
        Ok(SendReceipt {
            provider_message_id: None,
        })
    }

    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn instance_id(&self) -> &str {
        "stalled"
    }
}

struct Harness {
    state: AppState,
    email: Arc<RecordingChannel>,
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.delivery.base_backoff_ms = 1;
    config.delivery.max_backoff_ms = 5;
    config.recipients = vec![
        RecipientEntry {
            target_id: TARGET.into(),
            channel_type: ChannelType::Email,
            address: "ops@example.com".into(),
        },
        RecipientEntry {
            target_id: TARGET.into(),
            channel_type: ChannelType::Sms,
            address: "+15550100".into(),
        },
    ];
    config.targets = vec![TargetEntry {
        id: TARGET.into(),
        name: "Sunset Gardens".into(),
    }];
    config
}

/// Email transport only; must be called inside a tokio runtime.
fn harness() -> Harness {
    let email = RecordingChannel::new(ChannelType::Email);
    let channel: Arc<dyn NotificationChannel> = email.clone();
    let state = AppState::build(
        test_config(),
        Arc::new(MemoryStore::new()),
        vec![channel],
        Vec::new(),
    );
    Harness { state, email }
}

fn occupancy_rule(name: &str, frequency: Frequency) -> AlertRule {
    AlertRule {
        id: String::new(),
        name: name.into(),
        description: None,
        metric_type: MetricType::Occupancy,
        target_ids: [TARGET.to_string()].into(),
        thresholds: Thresholds {
            red_max: Some(84.0),
            yellow_min: Some(85.0),
            yellow_max: Some(94.0),
            green_min: Some(95.0),
            ..Default::default()
        },
        frequency,
        channels: [ChannelType::Email].into(),
        active: true,
        created_at: Default::default(),
        updated_at: Default::default(),
    }
}

fn email_template() -> MessageTemplate {
    MessageTemplate {
        id: String::new(),
        name: "Occupancy email".into(),
        channel_type: ChannelType::Email,
        subject: Some("[{{alert_level}}] {{property_name}}".into()),
        body: "Alert: {{metric_name}} at {{property_name}} is {{metric_value}} (target {{target_value}})"
            .into(),
        variables: Default::default(),
        active: true,
        created_at: Default::default(),
        updated_at: Default::default(),
    }
}

// ── Pipeline ──

#[tokio::test]
async fn red_reading_opens_instance_and_delivers() {
    let h = harness();
    let rule = h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();
    h.state.templates.save_template(email_template()).unwrap();
    h.state.metrics.record(MetricType::Occupancy, TARGET, 80.0);

    let evaluation = h.state.pipeline.evaluate_rule(&rule).await;
    assert_eq!(evaluation.outcomes.len(), 1);
    let outcome = &evaluation.outcomes[0];
    assert_eq!(outcome.level, Some(Level::Red));
    assert_eq!(outcome.deliveries_queued, 1);
    let instance_id = outcome.instance_id.clone().unwrap();

    let mut logs = Vec::new();
    for ticket in evaluation.tickets {
        logs.push(ticket.wait().await.unwrap());
    }
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, DeliveryStatus::Sent);
    assert_eq!(logs[0].recipient, "ops@example.com");

    let sent = h.email.sent();
    assert_eq!(sent[0].1.subject.as_deref(), Some("[red] Sunset Gardens"));
    assert_eq!(
        sent[0].1.body,
        "Alert: Occupancy at Sunset Gardens is 80% (target 95%)"
    );

    let instance = h.state.instances.get(&instance_id).unwrap();
    assert_eq!(instance.message, "Occupancy at Sunset Gardens is 80% (red)");
}

#[tokio::test]
async fn repeated_trigger_does_not_notify_again() {
    let h = harness();
    let rule = h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();
    h.state.templates.save_template(email_template()).unwrap();
    h.state.metrics.record(MetricType::Occupancy, TARGET, 80.0);

    let first = h.state.pipeline.evaluate_rule(&rule).await;
    for ticket in first.tickets {
        ticket.wait().await.unwrap();
    }
    let second = h.state.pipeline.evaluate_rule(&rule).await;

    assert!(second.tickets.is_empty());
    assert_eq!(first.outcomes[0].instance_id, second.outcomes[0].instance_id);
    assert_eq!(h.email.sent().len(), 1);
}

#[tokio::test]
async fn escalation_notifies_once_more() {
    let h = harness();
    let rule = h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();
    h.state.templates.save_template(email_template()).unwrap();

    h.state.metrics.record(MetricType::Occupancy, TARGET, 90.0);
    let yellow = h.state.pipeline.evaluate_rule(&rule).await;
    assert_eq!(yellow.outcomes[0].level, Some(Level::Yellow));
    assert_eq!(yellow.tickets.len(), 1);

    h.state.metrics.record(MetricType::Occupancy, TARGET, 80.0);
    let red = h.state.pipeline.evaluate_rule(&rule).await;
    assert_eq!(red.tickets.len(), 1);
    assert_eq!(yellow.outcomes[0].instance_id, red.outcomes[0].instance_id);

    let open = h.state.instances.list(&InstanceFilter::default()).unwrap();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn green_reading_creates_nothing() {
    let h = harness();
    let rule = h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();
    h.state.metrics.record(MetricType::Occupancy, TARGET, 97.0);

    let evaluation = h.state.pipeline.evaluate_rule(&rule).await;
    assert_eq!(evaluation.outcomes[0].level, Some(Level::Green));
    assert!(evaluation.outcomes[0].instance_id.is_none());
    assert!(h.state.instances.list(&InstanceFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn missing_metric_skips_target() {
    let h = harness();
    let rule = h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();

    let evaluation = h.state.pipeline.evaluate_rule(&rule).await;
    assert_eq!(evaluation.outcomes.len(), 1);
    assert_eq!(evaluation.outcomes[0].level, None);
    assert_eq!(evaluation.outcomes[0].value, None);
    assert!(h.state.instances.list(&InstanceFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn inactive_rule_is_not_evaluated() {
    let h = harness();
    let mut rule = occupancy_rule("Occupancy floor", Frequency::Daily);
    rule.active = false;
    let rule = h.state.rules.save_rule(rule).unwrap();
    h.state.metrics.record(MetricType::Occupancy, TARGET, 80.0);

    let evaluation = h.state.pipeline.evaluate_rule(&rule).await;
    assert!(evaluation.outcomes.is_empty());
}

#[tokio::test]
async fn trigger_without_template_still_opens_instance() {
    let h = harness();
    let rule = h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();
    h.state.metrics.record(MetricType::Occupancy, TARGET, 80.0);

    let evaluation = h.state.pipeline.evaluate_rule(&rule).await;
    assert!(evaluation.outcomes[0].instance_id.is_some());
    assert!(evaluation.tickets.is_empty());
}

#[tokio::test]
async fn channel_without_transport_fails_its_ticket_only() {
    let h = harness();
    let mut rule = occupancy_rule("Occupancy floor", Frequency::Daily);
    rule.channels = [ChannelType::Email, ChannelType::Sms].into();
    let rule = h.state.rules.save_rule(rule).unwrap();
    h.state.templates.save_template(email_template()).unwrap();
    let mut sms = email_template();
    sms.name = "Occupancy sms".into();
    sms.channel_type = ChannelType::Sms;
    h.state.templates.save_template(sms).unwrap();
    h.state.metrics.record(MetricType::Occupancy, TARGET, 80.0);

    let evaluation = h.state.pipeline.evaluate_rule(&rule).await;
    assert_eq!(evaluation.tickets.len(), 2);

    let mut tickets = evaluation.tickets.into_iter();
    let email = tickets.next().unwrap().wait().await.unwrap();
    assert_eq!(email.status, DeliveryStatus::Sent);
    let sms = tickets.next().unwrap().wait().await;
    assert!(matches!(sms, Err(NotifyError::NoTransport(ChannelType::Sms))));
}

#[tokio::test]
async fn ingestion_runs_only_immediate_rules_for_target() {
    let h = harness();
    let immediate = h
        .state
        .rules
        .save_rule(occupancy_rule("Occupancy live", Frequency::Immediate))
        .unwrap();
    h.state.rules.save_rule(occupancy_rule("Occupancy daily", Frequency::Daily)).unwrap();
    let mut elsewhere = occupancy_rule("Occupancy elsewhere", Frequency::Immediate);
    elsewhere.target_ids = ["harbor-view".to_string()].into();
    h.state.rules.save_rule(elsewhere).unwrap();

    h.state.metrics.record(MetricType::Occupancy, TARGET, 80.0);
    let evaluation = h.state.pipeline.evaluate_immediate_rules(TARGET).await.unwrap();

    assert_eq!(evaluation.outcomes.len(), 1);
    assert_eq!(evaluation.outcomes[0].rule_id, immediate.id);
}

#[test]
fn target_value_prefers_green_floor() {
    let thresholds = Thresholds {
        green_min: Some(95.0),
        green_max: Some(100.0),
        ..Default::default()
    };
    assert_eq!(target_value(&thresholds), Some(95.0));
    let ceiling = Thresholds {
        green_max: Some(5.0),
        ..Default::default()
    };
    assert_eq!(target_value(&ceiling), Some(5.0));
    assert_eq!(target_value(&Thresholds::default()), None);
}

#[tokio::test]
async fn notifications_beyond_queue_capacity_leave_failed_logs() {
    let stalled = Arc::new(StalledChannel {
        gate: tokio::sync::Semaphore::new(0),
    });
    let mut config = test_config();
    config.delivery.workers = 1;
    config.delivery.queue_capacity = 1;
    config.recipients = (0..4)
        .map(|i| RecipientEntry {
            target_id: TARGET.into(),
            channel_type: ChannelType::Email,
            address: format!("ops{i}@example.com"),
        })
        .collect();
    let channel: Arc<dyn NotificationChannel> = stalled.clone();
    let state = AppState::build(config, Arc::new(MemoryStore::new()), vec![channel], Vec::new());

    let rule = state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();
    state.templates.save_template(email_template()).unwrap();
    state.metrics.record(MetricType::Occupancy, TARGET, 80.0);

    let evaluation = state.pipeline.evaluate_rule(&rule).await;
    let queued = evaluation.tickets.len();
    assert!((1..4).contains(&queued), "queued {queued}");

    stalled.gate.add_permits(4);
    for ticket in evaluation.tickets {
        assert_eq!(ticket.wait().await.unwrap().status, DeliveryStatus::Sent);
    }

    let logs = state.dispatcher.list_logs(10).unwrap();
    assert_eq!(logs.len(), 4);
    let rejected: Vec<_> = logs
        .iter()
        .filter(|l| l.status == DeliveryStatus::Failed)
        .collect();
    assert_eq!(rejected.len(), 4 - queued);
    assert!(rejected
        .iter()
        .all(|l| l.last_error.as_deref() == Some("delivery queue is full")));

    let stats = state
        .dispatcher
        .statistics()
        .query(
            &DateRange {
                from: Utc::now().date_naive(),
                to: Utc::now().date_naive(),
            },
            None,
        )
        .unwrap();
    assert_eq!(stats.total_failed as usize, 4 - queued);
}

// ── Scheduler ──

#[tokio::test]
async fn scheduler_runs_rules_once_per_interval() {
    let h = harness();
    h.state.rules.save_rule(occupancy_rule("Occupancy daily", Frequency::Daily)).unwrap();
    h.state.rules.save_rule(occupancy_rule("Occupancy live", Frequency::Immediate)).unwrap();
    let mut paused = occupancy_rule("Occupancy hourly", Frequency::Hourly);
    paused.active = false;
    h.state.rules.save_rule(paused).unwrap();

    let scheduler = RuleScheduler::new(h.state.rule_store.clone(), h.state.pipeline.clone(), 60, 2);
    let t0 = Utc::now();

    assert_eq!(scheduler.run_due(t0).await.unwrap(), 2);
    assert_eq!(scheduler.run_due(t0 + Duration::hours(1)).await.unwrap(), 1);
    assert_eq!(scheduler.run_due(t0 + Duration::days(1)).await.unwrap(), 2);
}

#[tokio::test]
async fn deactivated_rule_leaves_the_schedule() {
    let h = harness();
    let rule = h.state.rules.save_rule(occupancy_rule("Occupancy live", Frequency::Immediate)).unwrap();
    let scheduler = RuleScheduler::new(h.state.rule_store.clone(), h.state.pipeline.clone(), 60, 2);

    assert_eq!(scheduler.run_due(Utc::now()).await.unwrap(), 1);
    h.state.rules.set_rule_active(&rule.id, false).unwrap();
    assert_eq!(scheduler.run_due(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn schedule_forgets_deleted_and_paused_rules() {
    let h = harness();
    let daily = h.state.rules.save_rule(occupancy_rule("Occupancy daily", Frequency::Daily)).unwrap();
    let weekly = h.state.rules.save_rule(occupancy_rule("Occupancy weekly", Frequency::Weekly)).unwrap();
    let scheduler = RuleScheduler::new(h.state.rule_store.clone(), h.state.pipeline.clone(), 60, 2);
    let t0 = Utc::now();

    assert_eq!(scheduler.run_due(t0).await.unwrap(), 2);
    assert_eq!(scheduler.tracked_rules(), 2);

    h.state.rules.delete_rule(&daily.id).unwrap();
    h.state.rules.set_rule_active(&weekly.id, false).unwrap();
    assert_eq!(scheduler.run_due(t0 + Duration::minutes(1)).await.unwrap(), 0);
    assert_eq!(scheduler.tracked_rules(), 0);

    // reactivated rules start a fresh interval
    h.state.rules.set_rule_active(&weekly.id, true).unwrap();
    assert_eq!(scheduler.run_due(t0 + Duration::minutes(2)).await.unwrap(), 1);
    assert_eq!(scheduler.tracked_rules(), 1);
}

// ── Services ──

#[tokio::test]
async fn save_rule_assigns_id_and_keeps_created_at() {
    let h = harness();
    let created = h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();
    assert!(!created.id.is_empty());

    let mut edited = created.clone();
    edited.name = "Occupancy floor (edited)".into();
    let updated = h.state.rules.save_rule(edited).unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);
    assert_eq!(h.state.rules.list_rules().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_rule_is_not_persisted() {
    let h = harness();
    let mut rule = occupancy_rule("Occupancy floor", Frequency::Daily);
    rule.target_ids.clear();

    assert!(matches!(
        h.state.rules.save_rule(rule),
        Err(AlertError::Validation(_))
    ));
    assert!(h.state.rules.list_rules().unwrap().is_empty());
}

#[tokio::test]
async fn deleting_rule_keeps_its_instances() {
    let h = harness();
    let rule = h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();
    h.state.metrics.record(MetricType::Occupancy, TARGET, 80.0);
    h.state.pipeline.evaluate_rule(&rule).await;

    h.state.rules.delete_rule(&rule.id).unwrap();
    assert_eq!(h.state.instances.list(&InstanceFilter::default()).unwrap().len(), 1);
    assert!(matches!(
        h.state.rules.delete_rule(&rule.id),
        Err(AlertError::NotFound { .. })
    ));
}

#[tokio::test]
async fn blank_template_is_rejected() {
    let h = harness();
    let mut template = email_template();
    template.body = "   ".into();

    assert!(matches!(
        h.state.templates.save_template(template),
        Err(NotifyError::TemplateError(_))
    ));
}

#[tokio::test]
async fn sms_template_drops_subject_on_save() {
    let h = harness();
    let mut template = email_template();
    template.channel_type = ChannelType::Sms;

    let saved = h.state.templates.save_template(template).unwrap();
    assert_eq!(saved.subject, None);
}

#[tokio::test]
async fn preview_applies_overrides_to_sample_bindings() {
    let h = harness();
    let mut overrides = Bindings::new();
    overrides.insert("property_name".into(), "Harbor View".into());

    let preview = h.state.templates.preview_template(&email_template(), &overrides);
    assert_eq!(preview.subject.as_deref(), Some("[red] Harbor View"));
    assert!(preview.body.starts_with("Alert: Occupancy at Harbor View is 78%"));
}

#[tokio::test]
async fn test_delivery_is_kept_out_of_statistics() {
    let h = harness();
    let template = h.state.templates.save_template(email_template()).unwrap();

    let ok = h
        .state
        .templates
        .test_delivery(&template.id, "qa@example.com", &Bindings::new())
        .await
        .unwrap();
    assert!(ok);

    let logs = h.state.dispatcher.list_logs(10).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].is_test);

    let today = Utc::now().date_naive();
    let report = h
        .state
        .dispatcher
        .statistics()
        .query(&DateRange { from: today, to: today }, None)
        .unwrap();
    assert_eq!(report.total_sent, 0);
}

#[tokio::test]
async fn test_delivery_of_unknown_template_is_not_found() {
    let h = harness();
    let result = h
        .state
        .templates
        .test_delivery("missing", "qa@example.com", &Bindings::new())
        .await;
    assert!(matches!(result, Err(NotifyError::NotFound { .. })));
}

// ── Seeding ──

#[tokio::test]
async fn seeding_skips_existing_names() {
    let h = harness();
    h.state.rules.save_rule(occupancy_rule("Occupancy floor", Frequency::Daily)).unwrap();

    let seed = RulesSeedFile {
        rules: vec![
            occupancy_rule("Occupancy floor", Frequency::Daily),
            occupancy_rule("Occupancy live", Frequency::Immediate),
            occupancy_rule("Occupancy live", Frequency::Hourly),
        ],
    };
    let summary = seed_rules(&h.state.rules, seed).unwrap();

    assert_eq!(
        summary,
        SeedSummary {
            created: 1,
            skipped: 2,
            failed: 0,
        }
    );
    assert_eq!(h.state.rules.list_rules().unwrap().len(), 2);
}
