use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ---- Metrics ----

/// Portfolio metric a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Occupancy,
    Noi,
    Collections,
    MaintenanceCosts,
    LeasingVelocity,
    TurnoverRate,
    Delinquency,
}

impl MetricType {
    pub const ALL: [MetricType; 7] = [
        MetricType::Occupancy,
        MetricType::Noi,
        MetricType::Collections,
        MetricType::MaintenanceCosts,
        MetricType::LeasingVelocity,
        MetricType::TurnoverRate,
        MetricType::Delinquency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Occupancy => "occupancy",
            Self::Noi => "noi",
            Self::Collections => "collections",
            Self::MaintenanceCosts => "maintenance_costs",
            Self::LeasingVelocity => "leasing_velocity",
            Self::TurnoverRate => "turnover_rate",
            Self::Delinquency => "delinquency",
        }
    }

    /// Label used in rendered notifications (`metric_name` binding).
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Occupancy => "Occupancy",
            Self::Noi => "NOI",
            Self::Collections => "Collections",
            Self::MaintenanceCosts => "Maintenance Costs",
            Self::LeasingVelocity => "Leasing Velocity",
            Self::TurnoverRate => "Turnover Rate",
            Self::Delinquency => "Delinquency",
        }
    }

    /// Formats a raw value in the metric's natural unit.
    ///
    /// ```
    /// use propwatch_common::types::MetricType;
    ///
    /// assert_eq!(MetricType::Occupancy.format_value(78.0), "78%");
    /// assert_eq!(MetricType::Noi.format_value(1250.5), "$1250.50");
    /// assert_eq!(MetricType::LeasingVelocity.format_value(4.0), "4");
    /// ```
    pub fn format_value(&self, value: f64) -> String {
        match self {
            Self::Occupancy | Self::Collections | Self::TurnoverRate | Self::Delinquency => {
                format!("{}%", trim_float(value))
            }
            Self::Noi | Self::MaintenanceCosts => format!("${value:.2}"),
            Self::LeasingVelocity => trim_float(value),
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == lower)
            .ok_or_else(|| format!("unknown metric type: {s}"))
    }
}

/// Renders a float without a trailing `.0` for whole numbers, one decimal
/// place otherwise.
pub fn trim_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

// ---- Rules ----

/// How often a rule is evaluated by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Immediate,
    Hourly,
    Daily,
    Weekly,
}

impl Frequency {
    /// Minimum spacing between scheduled evaluations. `Immediate` rules are
    /// evaluated on every scheduler tick and on every metric update.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::Hourly => Some(Duration::hours(1)),
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::weeks(1)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            _ => Err(format!("unknown frequency: {s}")),
        }
    }
}

/// Notification transport.
///
/// `dashboard` is accepted as an alias of [`ChannelType::Push`] so rule
/// definitions written against the dashboard wording keep working.
///
/// ```
/// use propwatch_common::types::ChannelType;
///
/// let ch: ChannelType = "dashboard".parse().unwrap();
/// assert_eq!(ch, ChannelType::Push);
/// assert!(ChannelType::Email.supports_subject());
/// assert!(!ChannelType::Sms.supports_subject());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Sms,
    #[serde(alias = "dashboard")]
    Push,
}

impl ChannelType {
    pub const ALL: [ChannelType; 3] = [ChannelType::Email, ChannelType::Sms, ChannelType::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
        }
    }

    /// Only email carries a subject line.
    pub fn supports_subject(&self) -> bool {
        matches!(self, Self::Email)
    }

    /// Kind of address a recipient of this channel must have.
    pub fn recipient_kind(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "phone",
            Self::Push => "device_token",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            "push" | "dashboard" => Ok(Self::Push),
            _ => Err(format!("unknown channel: {s}")),
        }
    }
}

/// Result of classifying a value against a rule's bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Red,
    Yellow,
    Green,
    None,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::None => "none",
        }
    }

    /// The alert level this classification raises, if any.
    pub fn alert_level(&self) -> Option<AlertLevel> {
        match self {
            Self::Red => Some(AlertLevel::Red),
            Self::Yellow => Some(AlertLevel::Yellow),
            Self::Green | Self::None => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level carried by an alert instance. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Yellow,
    Red,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "red" => Ok(Self::Red),
            "yellow" => Ok(Self::Yellow),
            _ => Err(format!("unknown alert level: {s}")),
        }
    }
}

/// One inclusive threshold range; an absent side is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Band {
    pub fn is_configured(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min = self.min.map_or_else(|| "-inf".to_string(), |v| v.to_string());
        let max = self.max.map_or_else(|| "+inf".to_string(), |v| v.to_string());
        write!(f, "[{min}, {max}]")
    }
}

/// The six optional bounds of a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default)]
    pub red_min: Option<f64>,
    #[serde(default)]
    pub red_max: Option<f64>,
    #[serde(default)]
    pub yellow_min: Option<f64>,
    #[serde(default)]
    pub yellow_max: Option<f64>,
    #[serde(default)]
    pub green_min: Option<f64>,
    #[serde(default)]
    pub green_max: Option<f64>,
}

impl Thresholds {
    /// Bands in evaluation priority order: red, yellow, green.
    pub fn bands(&self) -> [(Level, Band); 3] {
        [
            (
                Level::Red,
                Band {
                    min: self.red_min,
                    max: self.red_max,
                },
            ),
            (
                Level::Yellow,
                Band {
                    min: self.yellow_min,
                    max: self.yellow_max,
                },
            ),
            (
                Level::Green,
                Band {
                    min: self.green_min,
                    max: self.green_max,
                },
            ),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.bands().iter().all(|(_, band)| !band.is_configured())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub metric_type: MetricType,
    /// Targets (properties) the rule applies to.
    pub target_ids: BTreeSet<String>,
    #[serde(flatten)]
    pub thresholds: Thresholds,
    pub frequency: Frequency,
    pub channels: BTreeSet<ChannelType>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

// ---- Alert instances ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    /// Open instances block creation of a second instance for the same
    /// (rule, target).
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }

    /// Legal lifecycle moves: `active -> acknowledged | resolved`,
    /// `acknowledged -> resolved`.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Acknowledged)
                | (Self::Active, Self::Resolved)
                | (Self::Acknowledged, Self::Resolved)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    pub id: String,
    pub rule_id: String,
    pub target_id: String,
    pub level: AlertLevel,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    /// Last trigger or lifecycle change.
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// Listing filter for alert instances. All set fields must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceFilter {
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub rule_id: Option<String>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &AlertInstance) -> bool {
        self.status.map_or(true, |s| s == instance.status)
            && self
                .target_id
                .as_deref()
                .map_or(true, |t| t == instance.target_id)
            && self
                .rule_id
                .as_deref()
                .map_or(true, |r| r == instance.rule_id)
    }
}

// ---- Templates ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub channel_type: ChannelType,
    /// Only rendered for email templates.
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    /// Declared placeholder names, without braces.
    #[serde(default)]
    pub variables: BTreeSet<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

// ---- Deliveries ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Bounced,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
        }
    }

    /// `pending -> sent | failed | bounced`, `sent -> delivered | bounced`.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Sent)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Bounced)
                | (Self::Sent, Self::Delivered)
                | (Self::Sent, Self::Bounced)
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "bounced" => Ok(Self::Bounced),
            _ => Err(format!("unknown delivery status: {s}")),
        }
    }
}

/// One logical notification delivery. Retries mutate this record in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: String,
    pub template_id: String,
    pub recipient: String,
    pub channel: ChannelType,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    /// Test sends never count toward statistics.
    pub is_test: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryLog {
    pub fn new(template_id: &str, recipient: &str, channel: ChannelType, is_test: bool) -> Self {
        let now = Utc::now();
        Self {
            id: crate::id::next_id(),
            template_id: template_id.to_string(),
            recipient: recipient.to_string(),
            channel,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            last_error: None,
            provider_message_id: None,
            is_test,
            created_at: now,
            updated_at: now,
        }
    }

    /// Statistics bucket date.
    pub fn stat_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// Counter of a statistics bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatCounter {
    Sent,
    Delivered,
    Failed,
}

impl StatCounter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

/// Per-day, per-channel delivery counters.
///
/// ```
/// use chrono::NaiveDate;
/// use propwatch_common::types::{ChannelType, DeliveryStatistic, StatCounter};
///
/// let mut stat = DeliveryStatistic::empty(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), ChannelType::Email);
/// stat.bump(StatCounter::Sent);
/// stat.bump(StatCounter::Delivered);
/// assert_eq!((stat.total_sent, stat.total_delivered, stat.total_failed), (1, 1, 0));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatistic {
    pub date: NaiveDate,
    pub channel: ChannelType,
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
}

impl DeliveryStatistic {
    pub fn empty(date: NaiveDate, channel: ChannelType) -> Self {
        Self {
            date,
            channel,
            total_sent: 0,
            total_delivered: 0,
            total_failed: 0,
        }
    }

    pub fn bump(&mut self, counter: StatCounter) {
        match counter {
            StatCounter::Sent => self.total_sent += 1,
            StatCounter::Delivered => self.total_delivered += 1,
            StatCounter::Failed => self.total_failed += 1,
        }
    }
}

/// Inclusive date range for statistics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.from && date <= self.to
    }
}
