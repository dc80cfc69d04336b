//! Rule evaluation engine: drives periodic evaluation of threshold rules
//! against time-series telemetry and decides when an alert fires.
//!
//! The engine owns the tick loop, condition semantics and cooldown
//! suppression. Everything it touches beyond that (the rule set, the metric
//! store, alert persistence, notification fan-out) is consumed through the
//! capability traits below and injected at construction, so the loop can be
//! exercised end-to-end against in-memory fakes.

pub mod cooldown;
pub mod error;
pub mod evaluator;
pub mod runner;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use std::time::Duration;
use tripwire_common::types::{Alert, DeliveryResult, Rule};

use crate::error::Result;
use crate::evaluator::Aggregation;

/// Read-only view over the active alert-rule definitions.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Returns a snapshot of the stored rules.
    ///
    /// # Errors
    ///
    /// Returns [`error::EngineError::SourceUnavailable`] when the backing
    /// store cannot be reached; the caller treats this as "skip this tick".
    async fn active_rules(&self) -> Result<Vec<Rule>>;
}

/// Read-only view into the time-series store.
#[async_trait]
pub trait MetricQuery: Send + Sync {
    /// Answers "value of `field` for `series_ref`, collapsed by
    /// `aggregation`, over the last `window`".
    ///
    /// Returns `Ok(None)` when no samples exist, as distinct from zero and
    /// from an error.
    async fn aggregate(
        &self,
        series_ref: &str,
        field: &str,
        aggregation: Aggregation,
        window: Duration,
    ) -> Result<Option<f64>>;
}

/// Write interface that persists fired alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Durably records a fired alert and returns its identifier.
    async fn record(&self, alert: &Alert) -> Result<String>;

    /// Appends per-channel delivery results to an already-recorded alert.
    /// The sequence is append-only; results arrive in completion order.
    async fn append_delivery_results(
        &self,
        alert_id: &str,
        results: &[DeliveryResult],
    ) -> Result<()>;
}

/// Fans one fired alert out to the owner's configured channels.
///
/// Dispatch is best-effort and infallible from the engine's point of view:
/// per-channel failures surface as `failed` entries in the returned results,
/// never as an error that could undo the fire.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, alert: &Alert, rule: &Rule) -> Vec<DeliveryResult>;
}
