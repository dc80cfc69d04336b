//! The evaluation loop: periodic, bounded, fire-and-continue.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{interval, MissedTickBehavior};
use tripwire_common::types::{Alert, AlertStatus, DeliveryOutcome, Rule};

use crate::cooldown::CooldownStore;
use crate::error::{EngineError, Result};
use crate::evaluator;
use crate::{AlertSink, MetricQuery, Notifier, RuleSource};

/// Process-wide evaluation settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Time between evaluation ticks.
    pub tick_interval: Duration,
    /// Deadline for one rule's whole query → evaluate → fire chain. Must be
    /// shorter than `tick_interval`; work past the deadline is abandoned.
    pub rule_timeout: Duration,
    /// Lookback window for `avg`/`max`/`min` aggregations.
    pub lookback_window: Duration,
    /// Cap on concurrently in-flight rule evaluations within a tick.
    pub max_concurrent: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            rule_timeout: Duration::from_secs(10),
            lookback_window: Duration::from_secs(300),
            max_concurrent: 16,
        }
    }
}

/// What one rule evaluation decided, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The metric store had no samples; absence of data never satisfies a
    /// condition, whatever the operator.
    NoData,
    NotTriggered,
    /// Condition satisfied but the rule is cooling down.
    Suppressed,
    Fired { alert_id: String },
}

/// Drives periodic evaluation of all active rules.
///
/// Per-rule evaluations are independent: one rule's failure or slowness
/// never blocks another rule in the same tick. Ticks never pile up: a new
/// tick starts only after every evaluation of the previous tick has
/// completed or been abandoned past [`LoopConfig::rule_timeout`].
pub struct EvaluationLoop {
    rules: Arc<dyn RuleSource>,
    metrics: Arc<dyn MetricQuery>,
    cooldowns: Arc<dyn CooldownStore>,
    sink: Arc<dyn AlertSink>,
    notifier: Arc<dyn Notifier>,
    config: LoopConfig,
}

impl EvaluationLoop {
    pub fn new(
        rules: Arc<dyn RuleSource>,
        metrics: Arc<dyn MetricQuery>,
        cooldowns: Arc<dyn CooldownStore>,
        sink: Arc<dyn AlertSink>,
        notifier: Arc<dyn Notifier>,
        config: LoopConfig,
    ) -> Self {
        Self {
            rules,
            metrics,
            cooldowns,
            sink,
            notifier,
            config,
        }
    }

    /// Runs forever. There is no caller to re-raise to; every failure is
    /// observed, logged and scoped to a rule or a tick.
    pub async fn run(&self) {
        tracing::info!(
            interval_secs = self.config.tick_interval.as_secs(),
            rule_timeout_secs = self.config.rule_timeout.as_secs(),
            max_concurrent = self.config.max_concurrent,
            "Evaluation loop started"
        );

        let mut tick = interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            self.run_tick().await;
        }
    }

    /// One evaluation cycle over a snapshot of the active rule set.
    pub async fn run_tick(&self) {
        let fetch = tokio::time::timeout(self.config.rule_timeout, self.rules.active_rules());
        let rules = match fetch.await {
            Ok(Ok(rules)) => rules,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to fetch rule set, skipping tick");
                return;
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.config.rule_timeout.as_secs(),
                    "Rule set fetch timed out, skipping tick"
                );
                return;
            }
        };

        let active: Vec<Rule> = rules.into_iter().filter(|r| r.active).collect();
        if active.is_empty() {
            return;
        }
        tracing::debug!(count = active.len(), "Evaluating active rules");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut handles = Vec::with_capacity(active.len());

        for rule in active {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let metrics = self.metrics.clone();
            let cooldowns = self.cooldowns.clone();
            let sink = self.sink.clone();
            let notifier = self.notifier.clone();
            let lookback = self.config.lookback_window;
            let rule_timeout = self.config.rule_timeout;

            let handle = tokio::spawn(async move {
                let rule_id = rule.id.clone();
                let evaluation = evaluate_rule(
                    &rule,
                    metrics.as_ref(),
                    cooldowns.as_ref(),
                    sink.as_ref(),
                    notifier.as_ref(),
                    lookback,
                );
                match tokio::time::timeout(rule_timeout, evaluation).await {
                    Ok(Ok(outcome)) => {
                        tracing::debug!(rule_id = %rule_id, outcome = ?outcome, "Rule evaluated");
                    }
                    Ok(Err(e @ EngineError::InvalidCondition(_))) => {
                        // Repeats every tick until the rule is corrected externally.
                        tracing::error!(rule_id = %rule_id, error = %e, "Rule can never fire");
                    }
                    Ok(Err(e @ EngineError::Persistence(_))) => {
                        tracing::error!(rule_id = %rule_id, error = %e, "Alert dropped, dispatch suppressed");
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(rule_id = %rule_id, error = %e, "Rule skipped this tick");
                    }
                    Err(_) => {
                        tracing::warn!(
                            rule_id = %rule_id,
                            timeout_secs = rule_timeout.as_secs(),
                            "Rule evaluation abandoned past deadline"
                        );
                    }
                }
                drop(permit);
            });
            handles.push(handle);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Rule evaluation task panicked");
            }
        }
    }
}

/// One rule's evaluation cycle, strictly sequential:
/// query → evaluate → cooldown check-and-set → persist → dispatch.
async fn evaluate_rule(
    rule: &Rule,
    metrics: &dyn MetricQuery,
    cooldowns: &dyn CooldownStore,
    sink: &dyn AlertSink,
    notifier: &dyn Notifier,
    lookback: Duration,
) -> Result<RuleOutcome> {
    if rule.cooldown_secs == 0 {
        return Err(EngineError::InvalidCondition(format!(
            "rule {} has cooldown_secs = 0",
            rule.id
        )));
    }
    let compiled = evaluator::compile(&rule.condition)?;

    let observed = metrics
        .aggregate(
            &rule.series_ref,
            &compiled.field,
            compiled.aggregation,
            lookback,
        )
        .await?;

    let Some(observed) = observed else {
        tracing::debug!(
            rule_id = %rule.id,
            series = %rule.series_ref,
            field = %compiled.field,
            "No samples in lookback window"
        );
        return Ok(RuleOutcome::NoData);
    };

    if !compiled.satisfied(observed) {
        return Ok(RuleOutcome::NotTriggered);
    }

    let acquired = match cooldowns
        .try_acquire(&rule.id, Duration::from_secs(rule.cooldown_secs))
        .await
    {
        Ok(acquired) => acquired,
        Err(e) => {
            // Store errors count as not cooling down.
            tracing::warn!(rule_id = %rule.id, error = %e, "Cooldown store unavailable, firing anyway");
            true
        }
    };
    if !acquired {
        tracing::debug!(rule_id = %rule.id, "Alert suppressed (cooldown active)");
        return Ok(RuleOutcome::Suppressed);
    }

    let alert = Alert {
        id: tripwire_common::id::next_id(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        series_ref: rule.series_ref.clone(),
        severity: rule.severity,
        condition: rule.condition.clone(),
        observed_value: observed,
        triggered_at: Utc::now(),
        status: AlertStatus::Pending,
        delivery_results: Vec::new(),
    };

    let alert_id = sink.record(&alert).await?;
    tracing::info!(
        rule_id = %rule.id,
        alert_id = %alert_id,
        value = observed,
        condition = %rule.condition,
        "Alert fired"
    );

    let results = notifier.dispatch(&alert, rule).await;
    let delivered = results
        .iter()
        .filter(|r| r.outcome == DeliveryOutcome::Delivered)
        .count();
    tracing::info!(
        alert_id = %alert_id,
        delivered,
        failed = results.len() - delivered,
        "Notification dispatch finished"
    );

    if let Err(e) = sink.append_delivery_results(&alert_id, &results).await {
        tracing::error!(alert_id = %alert_id, error = %e, "Failed to persist delivery results");
    }

    Ok(RuleOutcome::Fired { alert_id })
}
