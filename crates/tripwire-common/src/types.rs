use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use tripwire_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "high");
/// assert!(Severity::Critical > Severity::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// A threshold comparison as authored by the rule owner.
///
/// `operator` and `aggregation` are kept as raw strings exactly as stored;
/// the engine compiles them into typed values per evaluation and treats
/// anything it cannot parse as a permanently non-firing condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Name of the metric field the rule watches (e.g., `"price"`).
    pub field: String,
    /// One of `>`, `<`, `>=`, `<=`, `==`, `!=`.
    pub operator: String,
    /// Numeric threshold.
    pub value: f64,
    /// One of `latest`, `avg`, `max`, `min`.
    pub aggregation: String,
}

impl std::fmt::Display for Condition {
    /// Renders as `aggregation(field) operator value`, e.g. `latest(price) > 60000`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({}) {} {}",
            self.aggregation, self.field, self.operator, self.value
        )
    }
}

/// A stored threshold rule tied to a monitored series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Opaque, immutable identifier.
    pub id: String,
    /// Human-readable rule title, used in notification payloads.
    pub name: String,
    /// Opaque pointer to the monitored data source.
    pub series_ref: String,
    pub condition: Condition,
    pub severity: Severity,
    /// Minimum seconds between consecutive fires of this rule. Must be > 0.
    pub cooldown_secs: u64,
    /// Inactive rules are skipped, never deleted by the engine.
    pub active: bool,
}

/// Alert lifecycle status. Acknowledgement happens outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Pending => write!(f, "pending"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AlertStatus::Pending),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// The durable record of one rule firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub series_ref: String,
    pub severity: Severity,
    /// Snapshot of the condition that fired, for notification rendering.
    pub condition: Condition,
    /// The aggregated value that satisfied the condition.
    pub observed_value: f64,
    pub triggered_at: DateTime<Utc>,
    pub status: AlertStatus,
    /// Per-channel outcomes, append-only, in delivery-completion order.
    pub delivery_results: Vec<DeliveryResult>,
}

/// Outcome of one channel delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeliveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(DeliveryOutcome::Delivered),
            "failed" => Ok(DeliveryOutcome::Failed),
            _ => Err(format!("unknown delivery outcome: {s}")),
        }
    }
}

/// One channel's delivery record. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Channel name (e.g., `"email"`, `"slack"`).
    pub channel: String,
    pub outcome: DeliveryOutcome,
    pub attempted_at: DateTime<Utc>,
    /// Present only on failure.
    pub error_detail: Option<String>,
}

/// Recipient context injected into channel adapters at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerContext {
    pub owner_id: String,
    /// Address for the always-on email channel.
    pub email: String,
}
