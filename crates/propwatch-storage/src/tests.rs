use crate::memory::MemoryStore;
use crate::sqlite::SqliteStore;
use crate::{DeliveryLogStore, InstanceStore, RuleStore, Store, TemplateStore};
use chrono::{Duration, NaiveDate, Utc};
use propwatch_common::types::{
    AlertInstance, AlertLevel, AlertRule, AlertStatus, ChannelType, DateRange, DeliveryLog,
    DeliveryStatus, Frequency, InstanceFilter, MessageTemplate, MetricType, StatCounter,
    Thresholds,
};
use tempfile::TempDir;

fn sample_rule(id: &str, name: &str, active: bool) -> AlertRule {
    let now = Utc::now();
    AlertRule {
        id: id.to_string(),
        name: name.to_string(),
        description: Some("portfolio occupancy watch".into()),
        metric_type: MetricType::Occupancy,
        target_ids: ["prop-1".to_string(), "prop-2".to_string()].into(),
        thresholds: Thresholds {
            red_max: Some(84.0),
            yellow_min: Some(85.0),
            yellow_max: Some(94.0),
            green_min: Some(95.0),
            ..Default::default()
        },
        frequency: Frequency::Daily,
        channels: [ChannelType::Email, ChannelType::Sms].into(),
        active,
        created_at: now,
        updated_at: now,
    }
}

fn sample_instance(id: &str, rule_id: &str, target_id: &str, secs_ago: i64) -> AlertInstance {
    let ts = Utc::now() - Duration::seconds(secs_ago);
    AlertInstance {
        id: id.to_string(),
        rule_id: rule_id.to_string(),
        target_id: target_id.to_string(),
        level: AlertLevel::Red,
        message: "Occupancy at 80%".into(),
        status: AlertStatus::Active,
        created_at: ts,
        updated_at: ts,
        acknowledged_at: None,
        acknowledged_by: None,
        resolved_at: None,
        resolved_by: None,
    }
}

fn sample_template(id: &str, channel: ChannelType, active: bool, secs_ago: i64) -> MessageTemplate {
    let ts = Utc::now() - Duration::seconds(secs_ago);
    MessageTemplate {
        id: id.to_string(),
        name: format!("template-{id}"),
        channel_type: channel,
        subject: Some("[{{alert_level}}] {{property_name}}".into()),
        body: "{{metric_name}} is {{metric_value}}".into(),
        variables: ["metric_name".to_string(), "metric_value".to_string()].into(),
        active,
        created_at: ts,
        updated_at: ts,
    }
}

fn sqlite() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("propwatch.db")).unwrap();
    (dir, store)
}

// Shared behaviour checks, run against both backends.

fn check_rules(store: &dyn Store) {
    store.upsert_rule(&sample_rule("r2", "Zeta", true)).unwrap();
    store.upsert_rule(&sample_rule("r1", "Alpha", false)).unwrap();

    let rules = store.list_rules().unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].name, "Alpha");

    let active = store.list_active_rules().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, "r2");

    let loaded = store.get_rule("r1").unwrap().expect("rule r1");
    assert_eq!(loaded.thresholds.red_max, Some(84.0));
    assert_eq!(loaded.thresholds.red_min, None);
    assert!(loaded.target_ids.contains("prop-2"));
    assert!(loaded.channels.contains(&ChannelType::Sms));

    assert!(store.delete_rule("r1").unwrap());
    assert!(!store.delete_rule("r1").unwrap());
    assert!(store.get_rule("r1").unwrap().is_none());
}

fn check_instances(store: &dyn Store) {
    store
        .insert_instance(&sample_instance("i1", "r1", "prop-1", 30))
        .unwrap();
    store
        .insert_instance(&sample_instance("i2", "r1", "prop-2", 20))
        .unwrap();
    let mut resolved = sample_instance("i3", "r2", "prop-1", 10);
    resolved.status = AlertStatus::Resolved;
    store.insert_instance(&resolved).unwrap();

    let all = store.list_instances(&InstanceFilter::default()).unwrap();
    let ids: Vec<&str> = all.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["i3", "i2", "i1"], "newest first");

    let prop1 = store
        .list_instances(&InstanceFilter {
            target_id: Some("prop-1".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(prop1.len(), 2);

    let open = store.find_open_instance("r1", "prop-1").unwrap();
    assert_eq!(open.map(|i| i.id), Some("i1".to_string()));
    assert!(store.find_open_instance("r2", "prop-1").unwrap().is_none());

    let mut ack = store.get_instance("i2").unwrap().unwrap();
    ack.status = AlertStatus::Acknowledged;
    ack.acknowledged_by = Some("manager@example.com".into());
    ack.acknowledged_at = Some(Utc::now());
    store.update_instance(&ack).unwrap();

    let acked = store
        .list_instances(&InstanceFilter {
            status: Some(AlertStatus::Acknowledged),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(acked.len(), 1);
    assert_eq!(acked[0].acknowledged_by.as_deref(), Some("manager@example.com"));

    let missing = sample_instance("nope", "r1", "prop-1", 0);
    assert!(store.update_instance(&missing).is_err());
}

fn check_templates(store: &dyn Store) {
    store
        .upsert_template(&sample_template("t1", ChannelType::Email, true, 60))
        .unwrap();
    store
        .upsert_template(&sample_template("t2", ChannelType::Email, true, 5))
        .unwrap();
    store
        .upsert_template(&sample_template("t3", ChannelType::Email, false, 0))
        .unwrap();
    store
        .upsert_template(&sample_template("t4", ChannelType::Sms, true, 0))
        .unwrap();

    assert_eq!(store.list_templates(None).unwrap().len(), 4);
    assert_eq!(store.list_templates(Some(ChannelType::Email)).unwrap().len(), 3);

    let chosen = store.find_active_template(ChannelType::Email).unwrap().unwrap();
    assert_eq!(chosen.id, "t2", "newest active email template");
    assert!(store.find_active_template(ChannelType::Push).unwrap().is_none());

    let loaded = store.get_template("t4").unwrap().unwrap();
    assert!(loaded.variables.contains("metric_value"));

    assert!(store.delete_template("t4").unwrap());
    assert!(store.get_template("t4").unwrap().is_none());
}

fn check_logs_and_stats(store: &dyn Store) {
    let mut log = DeliveryLog::new("t1", "ops@example.com", ChannelType::Email, false);
    store.insert_log(&log).unwrap();

    log.status = DeliveryStatus::Sent;
    log.retry_count = 2;
    log.provider_message_id = Some("msg-1".into());
    store.update_log(&log).unwrap();

    let loaded = store.get_log(&log.id).unwrap().unwrap();
    assert_eq!(loaded.status, DeliveryStatus::Sent);
    assert_eq!(loaded.retry_count, 2);
    assert_eq!(loaded.provider_message_id.as_deref(), Some("msg-1"));

    let other = DeliveryLog::new("t1", "+15550100", ChannelType::Sms, true);
    store.insert_log(&other).unwrap();
    assert_eq!(store.list_logs(1).unwrap().len(), 1);
    assert_eq!(store.list_logs(10).unwrap().len(), 2);

    let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    assert!(store
        .apply_stat(&log.id, date, ChannelType::Email, StatCounter::Sent)
        .unwrap());
    assert!(!store
        .apply_stat(&log.id, date, ChannelType::Email, StatCounter::Sent)
        .unwrap());
    assert!(store
        .apply_stat(&log.id, date, ChannelType::Email, StatCounter::Delivered)
        .unwrap());
    assert!(store
        .apply_stat("other", date, ChannelType::Sms, StatCounter::Failed)
        .unwrap());

    let range = DateRange {
        from: date,
        to: date,
    };
    let all = store.query_statistics(&range, None).unwrap();
    assert_eq!(all.len(), 2);
    let email = store
        .query_statistics(&range, Some(ChannelType::Email))
        .unwrap();
    assert_eq!(email.len(), 1);
    assert_eq!(email[0].total_sent, 1);
    assert_eq!(email[0].total_delivered, 1);
    assert_eq!(email[0].total_failed, 0);

    let outside = DateRange {
        from: date + chrono::Days::new(1),
        to: date + chrono::Days::new(7),
    };
    assert!(store.query_statistics(&outside, None).unwrap().is_empty());
}

#[test]
fn memory_rules() {
    check_rules(&MemoryStore::new());
}

#[test]
fn memory_instances() {
    check_instances(&MemoryStore::new());
}

#[test]
fn memory_templates() {
    check_templates(&MemoryStore::new());
}

#[test]
fn memory_logs_and_stats() {
    check_logs_and_stats(&MemoryStore::new());
}

#[test]
fn sqlite_rules() {
    let (_dir, store) = sqlite();
    check_rules(&store);
}

#[test]
fn sqlite_instances() {
    let (_dir, store) = sqlite();
    check_instances(&store);
}

#[test]
fn sqlite_templates() {
    let (_dir, store) = sqlite();
    check_templates(&store);
}

#[test]
fn sqlite_logs_and_stats() {
    let (_dir, store) = sqlite();
    check_logs_and_stats(&store);
}

#[test]
fn sqlite_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("propwatch.db");
    {
        let store = SqliteStore::open(&path).unwrap();
        store.upsert_rule(&sample_rule("r1", "Occupancy", true)).unwrap();
        store
            .insert_instance(&sample_instance("i1", "r1", "prop-1", 0))
            .unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    assert!(store.get_rule("r1").unwrap().is_some());
    assert!(store.get_instance("i1").unwrap().is_some());
}

#[test]
fn deleting_rule_keeps_instances() {
    let store = MemoryStore::new();
    store.upsert_rule(&sample_rule("r1", "Occupancy", true)).unwrap();
    store
        .insert_instance(&sample_instance("i1", "r1", "prop-1", 0))
        .unwrap();
    store.delete_rule("r1").unwrap();
    assert!(store.get_instance("i1").unwrap().is_some());
}
