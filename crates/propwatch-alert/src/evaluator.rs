use propwatch_common::types::{AlertRule, Level};
use serde::Serialize;

/// Outcome of classifying one value against one rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub level: Level,
    pub would_trigger: bool,
    /// Every band consulted, with its literal bounds, and the tested value.
    pub explanation: String,
}

/// Classifies `value` against the rule's bands.
///
/// Bands are checked red, yellow, green; the first band containing the value
/// wins even when lower-priority bands overlap it. Bands without any bound
/// are skipped. Never panics: NaN falls in no band and yields [`Level::None`].
///
/// ```
/// use propwatch_alert::classify;
/// use propwatch_common::types::{AlertRule, Level, Thresholds};
/// # use propwatch_common::types::{Frequency, MetricType};
/// # let mut rule = AlertRule {
/// #     id: "r".into(), name: "occ".into(), description: None,
/// #     metric_type: MetricType::Occupancy, target_ids: Default::default(),
/// #     thresholds: Thresholds::default(), frequency: Frequency::Daily,
/// #     channels: Default::default(), active: true,
/// #     created_at: Default::default(), updated_at: Default::default(),
/// # };
/// rule.thresholds = Thresholds { red_max: Some(84.0), green_min: Some(95.0), ..Default::default() };
///
/// assert_eq!(classify(&rule, 80.0).level, Level::Red);
/// assert_eq!(classify(&rule, 90.0).level, Level::None);
/// ```
pub fn classify(rule: &AlertRule, value: f64) -> Classification {
    let mut steps = Vec::with_capacity(3);

    for (level, band) in rule.thresholds.bands() {
        if !band.is_configured() {
            steps.push(format!("{level} not configured"));
            continue;
        }
        if band.contains(value) {
            steps.push(format!("{level} {band} contains {value}"));
            return Classification {
                level,
                would_trigger: level.alert_level().is_some(),
                explanation: format!("value {value}: {} -> {level}", steps.join("; ")),
            };
        }
        steps.push(format!("{level} {band} does not contain {value}"));
    }

    Classification {
        level: Level::None,
        would_trigger: false,
        explanation: format!("value {value}: {} -> none", steps.join("; ")),
    }
}

/// What-if result for the rule authoring UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulePreview {
    pub level: Level,
    pub would_trigger: bool,
    pub message: String,
    pub explanation: String,
}

/// Classifies a sample value and phrases the alert message that a real
/// trigger would carry. Pure; nothing is persisted.
pub fn preview(rule: &AlertRule, sample_value: f64) -> RulePreview {
    let classification = classify(rule, sample_value);
    let message = alert_message(rule, &rule.name, sample_value, classification.level);
    RulePreview {
        level: classification.level,
        would_trigger: classification.would_trigger,
        message,
        explanation: classification.explanation,
    }
}

/// Human-readable alert text, e.g. `"Occupancy at Sunset Gardens is 80% (red)"`.
pub fn alert_message(rule: &AlertRule, target_label: &str, value: f64, level: Level) -> String {
    let metric = rule.metric_type.display_name();
    let formatted = rule.metric_type.format_value(value);
    match level {
        Level::Red | Level::Yellow => format!("{metric} at {target_label} is {formatted} ({level})"),
        Level::Green => format!("{metric} at {target_label} is {formatted} (green, no alert)"),
        Level::None => format!("{metric} at {target_label} is {formatted} (outside all bands, no alert)"),
    }
}
