//! `{{placeholder}}` templates.
//!
//! Rendering is pure and shared by previews and real sends. Placeholders
//! without a binding are left in the output verbatim so a missing value is
//! visible instead of silently blank.

use crate::error::{NotifyError, Result};
use crate::RenderedMessage;
use chrono::{DateTime, Utc};
use propwatch_common::types::{AlertLevel, MessageTemplate, MetricType};
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// Placeholder name to substituted value.
pub type Bindings = BTreeMap<String, String>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

static VARIABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("variable pattern is valid"));

/// Names every alert notification can bind.
pub const DEFAULT_VARIABLES: [&str; 10] = [
    "property_name",
    "alert_level",
    "metric_name",
    "metric_value",
    "target_value",
    "change_percentage",
    "alert_message",
    "triggered_by",
    "date",
    "time",
];

/// Substitutes every bound placeholder in `text`.
///
/// ```
/// use propwatch_notify::template::{render_text, Bindings};
///
/// let mut bindings = Bindings::new();
/// bindings.insert("metric_name".into(), "Occupancy".into());
/// assert_eq!(
///     render_text("{{metric_name}} vs {{target_value}}", &bindings),
///     "Occupancy vs {{target_value}}"
/// );
/// ```
pub fn render_text(text: &str, bindings: &Bindings) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match bindings.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Renders a template. The subject is only produced for channels that carry one.
pub fn render(template: &MessageTemplate, bindings: &Bindings) -> RenderedMessage {
    let subject = if template.channel_type.supports_subject() {
        template
            .subject
            .as_deref()
            .map(|subject| render_text(subject, bindings))
    } else {
        None
    };

    RenderedMessage {
        subject,
        body: render_text(&template.body, bindings),
    }
}

/// Placeholder names used in `text`.
pub fn placeholders(text: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Rejects templates that cannot be saved.
pub fn validate_template(template: &MessageTemplate) -> Result<()> {
    if template.name.trim().is_empty() {
        return Err(NotifyError::Validation("name must not be empty".into()));
    }
    if template.body.trim().is_empty() {
        return Err(NotifyError::TemplateError("body is empty".into()));
    }

    let mut used = placeholders(&template.body);
    if template.channel_type.supports_subject() {
        if let Some(subject) = &template.subject {
            used.extend(placeholders(subject));
        }
    }
    if used.is_empty() {
        return Err(NotifyError::TemplateError(
            "template contains no {{placeholders}}".into(),
        ));
    }

    if let Some(bad) = template
        .variables
        .iter()
        .find(|v| !VARIABLE_NAME.is_match(v))
    {
        return Err(NotifyError::Validation(format!(
            "declared variable '{bad}' is not a valid placeholder name"
        )));
    }

    Ok(())
}

/// Representative values for template previews and test sends.
pub fn sample_bindings() -> Bindings {
    let now = Utc::now();
    AlertBindings {
        property_name: "Sunset Gardens",
        level: AlertLevel::Red,
        metric_type: MetricType::Occupancy,
        value: 78.0,
        target_value: Some(95.0),
        previous_value: Some(81.4),
        alert_message: "Occupancy at Sunset Gardens is 78% (red)",
        triggered_by: "Occupancy floor",
        at: now,
    }
    .to_bindings()
}

/// Sample bindings overlaid with caller-supplied values.
pub fn sample_bindings_with(overrides: &Bindings) -> Bindings {
    let mut bindings = sample_bindings();
    bindings.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    bindings
}

/// Facts about one alert, turned into the default binding set.
#[derive(Debug, Clone)]
pub struct AlertBindings<'a> {
    pub property_name: &'a str,
    pub level: AlertLevel,
    pub metric_type: MetricType,
    pub value: f64,
    /// The healthy value the rule aims for, if the rule defines one.
    pub target_value: Option<f64>,
    pub previous_value: Option<f64>,
    pub alert_message: &'a str,
    /// Name of the rule that fired.
    pub triggered_by: &'a str,
    pub at: DateTime<Utc>,
}

impl AlertBindings<'_> {
    /// Bindings for every name in [`DEFAULT_VARIABLES`] that has a value.
    /// `target_value` and `change_percentage` are omitted when unknown.
    pub fn to_bindings(&self) -> Bindings {
        let mut b = Bindings::new();
        b.insert("property_name".into(), self.property_name.to_string());
        b.insert("alert_level".into(), self.level.to_string());
        b.insert("metric_name".into(), self.metric_type.display_name().to_string());
        b.insert("metric_value".into(), self.metric_type.format_value(self.value));
        if let Some(target) = self.target_value {
            b.insert("target_value".into(), self.metric_type.format_value(target));
        }
        if let Some(change) = change_percentage(self.previous_value, self.value) {
            b.insert("change_percentage".into(), change);
        }
        b.insert("alert_message".into(), self.alert_message.to_string());
        b.insert("triggered_by".into(), self.triggered_by.to_string());
        b.insert("date".into(), self.at.format("%Y-%m-%d").to_string());
        b.insert("time".into(), self.at.format("%H:%M UTC").to_string());
        b
    }
}

/// Signed relative change, e.g. `"-4.2%"`. None without a usable baseline.
pub fn change_percentage(previous: Option<f64>, current: f64) -> Option<String> {
    let previous = previous.filter(|p| p.is_finite() && *p != 0.0)?;
    if !current.is_finite() {
        return None;
    }
    let change = (current - previous) / previous.abs() * 100.0;
    Some(format!("{change:+.1}%"))
}
