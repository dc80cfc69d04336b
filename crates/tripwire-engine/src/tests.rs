use crate::cooldown::{CooldownStore, MemoryCooldownStore};
use crate::error::{EngineError, Result};
use crate::evaluator::{self, Aggregation};
use crate::runner::{EvaluationLoop, LoopConfig};
use crate::{AlertSink, MetricQuery, Notifier, RuleSource};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tripwire_common::types::{
    Alert, Condition, DeliveryOutcome, DeliveryResult, Rule, Severity,
};

fn make_rule(id: &str, series: &str, operator: &str, value: f64, cooldown_secs: u64) -> Rule {
    Rule {
        id: id.to_string(),
        name: format!("{id} threshold"),
        series_ref: series.to_string(),
        condition: Condition {
            field: "price".to_string(),
            operator: operator.to_string(),
            value,
            aggregation: "latest".to_string(),
        },
        severity: Severity::High,
        cooldown_secs,
        active: true,
    }
}

// ── Mock capabilities ──

struct StaticRules(Vec<Rule>);

#[async_trait]
impl RuleSource for StaticRules {
    async fn active_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.0.clone())
    }
}

struct UnavailableRules;

#[async_trait]
impl RuleSource for UnavailableRules {
    async fn active_rules(&self) -> Result<Vec<Rule>> {
        Err(EngineError::SourceUnavailable("connection refused".into()))
    }
}

#[derive(Clone)]
enum MetricStep {
    Value(Option<f64>),
    Fail,
    Hang,
}

/// Scripted per-series metric answers. Each query pops the next step for the
/// series; the final step repeats for any further queries.
struct ScriptedMetrics {
    scripts: Mutex<HashMap<String, VecDeque<MetricStep>>>,
}

impl ScriptedMetrics {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
        }
    }

    fn with(self, series: &str, steps: Vec<MetricStep>) -> Self {
        self.scripts
            .try_lock()
            .unwrap()
            .insert(series.to_string(), steps.into());
        self
    }
}

#[async_trait]
impl MetricQuery for ScriptedMetrics {
    async fn aggregate(
        &self,
        series_ref: &str,
        _field: &str,
        _aggregation: Aggregation,
        _window: Duration,
    ) -> Result<Option<f64>> {
        let step = {
            let mut scripts = self.scripts.lock().await;
            scripts.get_mut(series_ref).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            })
        };
        match step {
            Some(MetricStep::Value(v)) => Ok(v),
            Some(MetricStep::Fail) => Err(EngineError::Query("scripted failure".into())),
            Some(MetricStep::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
    appended: Mutex<Vec<(String, Vec<DeliveryResult>)>>,
    fail_record: bool,
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn record(&self, alert: &Alert) -> Result<String> {
        if self.fail_record {
            return Err(EngineError::Persistence("disk full".into()));
        }
        self.alerts.lock().await.push(alert.clone());
        Ok(alert.id.clone())
    }

    async fn append_delivery_results(
        &self,
        alert_id: &str,
        results: &[DeliveryResult],
    ) -> Result<()> {
        self.appended
            .lock()
            .await
            .push((alert_id.to_string(), results.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
struct CountingNotifier {
    dispatched: AtomicUsize,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn dispatch(&self, _alert: &Alert, _rule: &Rule) -> Vec<DeliveryResult> {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        vec![DeliveryResult {
            channel: "email".to_string(),
            outcome: DeliveryOutcome::Delivered,
            attempted_at: Utc::now(),
            error_detail: None,
        }]
    }
}

fn test_config() -> LoopConfig {
    LoopConfig {
        tick_interval: Duration::from_secs(30),
        rule_timeout: Duration::from_secs(5),
        lookback_window: Duration::from_secs(300),
        max_concurrent: 8,
    }
}

fn build_loop(
    rules: Vec<Rule>,
    metrics: ScriptedMetrics,
) -> (EvaluationLoop, Arc<MemorySink>, Arc<CountingNotifier>) {
    let sink = Arc::new(MemorySink::default());
    let notifier = Arc::new(CountingNotifier::default());
    let eval_loop = EvaluationLoop::new(
        Arc::new(StaticRules(rules)),
        Arc::new(metrics),
        Arc::new(MemoryCooldownStore::new()),
        sink.clone(),
        notifier.clone(),
        test_config(),
    );
    (eval_loop, sink, notifier)
}

// ── Condition evaluator ──

#[test]
fn equality_is_exact_no_tolerance() {
    let compiled = evaluator::compile(&Condition {
        field: "price".into(),
        operator: "==".into(),
        value: 60000.0,
        aggregation: "latest".into(),
    })
    .unwrap();
    assert!(!compiled.satisfied(59999.999999));
    assert!(compiled.satisfied(60000.0));

    let compiled = evaluator::compile(&Condition {
        field: "price".into(),
        operator: "!=".into(),
        value: 60000.0,
        aggregation: "latest".into(),
    })
    .unwrap();
    assert!(compiled.satisfied(59999.999999));
    assert!(!compiled.satisfied(60000.0));
}

#[test]
fn operator_semantics_are_literal() {
    let cases = [
        (">", 61.0, 60.0, true),
        (">", 60.0, 60.0, false),
        ("<", 59.0, 60.0, true),
        ("<", 60.0, 60.0, false),
        (">=", 60.0, 60.0, true),
        (">=", 59.9, 60.0, false),
        ("<=", 60.0, 60.0, true),
        ("<=", 60.1, 60.0, false),
    ];
    for (op, observed, threshold, expected) in cases {
        let compiled = evaluator::compile(&Condition {
            field: "v".into(),
            operator: op.to_string(),
            value: threshold,
            aggregation: "latest".into(),
        })
        .unwrap();
        assert_eq!(
            compiled.satisfied(observed),
            expected,
            "{observed} {op} {threshold}"
        );
    }
}

#[test]
fn unknown_operator_or_aggregation_fails_closed() {
    let err = evaluator::compile(&Condition {
        field: "price".into(),
        operator: "~=".into(),
        value: 1.0,
        aggregation: "latest".into(),
    })
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCondition(_)));

    let err = evaluator::compile(&Condition {
        field: "price".into(),
        operator: ">".into(),
        value: 1.0,
        aggregation: "median".into(),
    })
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCondition(_)));
}

#[test]
fn non_finite_threshold_is_rejected() {
    let err = evaluator::compile(&Condition {
        field: "price".into(),
        operator: ">".into(),
        value: f64::NAN,
        aggregation: "latest".into(),
    })
    .unwrap_err();
    assert!(matches!(err, EngineError::InvalidCondition(_)));
}

// ── Cooldown store ──

#[tokio::test]
async fn concurrent_try_acquire_grants_exactly_one() {
    let store = Arc::new(MemoryCooldownStore::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .try_acquire("rule-1", Duration::from_secs(60))
                .await
                .unwrap()
        }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1, "exactly one concurrent caller may fire");
}

#[tokio::test(start_paused = true)]
async fn try_acquire_succeeds_again_after_expiry() {
    let store = MemoryCooldownStore::new();
    assert!(store
        .try_acquire("rule-1", Duration::from_secs(900))
        .await
        .unwrap());
    assert!(!store
        .try_acquire("rule-1", Duration::from_secs(900))
        .await
        .unwrap());

    tokio::time::advance(Duration::from_secs(901)).await;
    assert!(store
        .try_acquire("rule-1", Duration::from_secs(900))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn cooldown_ttl_is_reread_per_acquire() {
    let store = MemoryCooldownStore::new();
    assert!(store
        .try_acquire("rule-1", Duration::from_secs(900))
        .await
        .unwrap());
    tokio::time::advance(Duration::from_secs(901)).await;
    // Owner lowered the cooldown between fires.
    assert!(store
        .try_acquire("rule-1", Duration::from_secs(60))
        .await
        .unwrap());
    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(store
        .try_acquire("rule-1", Duration::from_secs(60))
        .await
        .unwrap());
}

// ── Evaluation loop ──

#[tokio::test]
async fn breach_fires_and_records_alert() {
    tripwire_common::id::init(1, 1);
    let rule = make_rule("r1", "btc-usd", ">", 60000.0, 900);
    let metrics = ScriptedMetrics::new().with("btc-usd", vec![MetricStep::Value(Some(61000.0))]);
    let (eval_loop, sink, notifier) = build_loop(vec![rule], metrics);

    eval_loop.run_tick().await;

    let alerts = sink.alerts.lock().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "r1");
    assert_eq!(alerts[0].observed_value, 61000.0);
    assert_eq!(notifier.dispatched.load(Ordering::SeqCst), 1);

    let appended = sink.appended.lock().await;
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].0, alerts[0].id);
    assert_eq!(appended[0].1.len(), 1);
    assert_eq!(appended[0].1[0].outcome, DeliveryOutcome::Delivered);
}

#[tokio::test(start_paused = true)]
async fn second_breach_within_cooldown_is_suppressed() {
    tripwire_common::id::init(1, 1);
    // 61000 then 62000 ten minutes apart with a 900s cooldown: one alert.
    let rule = make_rule("r1", "btc-usd", ">", 60000.0, 900);
    let metrics = ScriptedMetrics::new().with(
        "btc-usd",
        vec![
            MetricStep::Value(Some(61000.0)),
            MetricStep::Value(Some(62000.0)),
        ],
    );
    let (eval_loop, sink, _) = build_loop(vec![rule], metrics);

    eval_loop.run_tick().await;
    tokio::time::advance(Duration::from_secs(600)).await;
    eval_loop.run_tick().await;

    assert_eq!(sink.alerts.lock().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn breach_after_cooldown_expiry_fires_again() {
    tripwire_common::id::init(1, 1);
    let rule = make_rule("r1", "btc-usd", ">", 60000.0, 900);
    let metrics = ScriptedMetrics::new().with(
        "btc-usd",
        vec![
            MetricStep::Value(Some(61000.0)),
            MetricStep::Value(Some(62000.0)),
        ],
    );
    let (eval_loop, sink, _) = build_loop(vec![rule], metrics);

    eval_loop.run_tick().await;
    tokio::time::advance(Duration::from_secs(901)).await;
    eval_loop.run_tick().await;

    assert_eq!(sink.alerts.lock().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn only_the_breaching_sample_fires() {
    tripwire_common::id::init(1, 1);
    // 59000 then 61000 twenty minutes apart: only the second breaches, and
    // cooldown is irrelevant since the first never fired.
    let rule = make_rule("r1", "btc-usd", ">", 60000.0, 900);
    let metrics = ScriptedMetrics::new().with(
        "btc-usd",
        vec![
            MetricStep::Value(Some(59000.0)),
            MetricStep::Value(Some(61000.0)),
        ],
    );
    let (eval_loop, sink, _) = build_loop(vec![rule], metrics);

    eval_loop.run_tick().await;
    assert_eq!(sink.alerts.lock().await.len(), 0);

    tokio::time::advance(Duration::from_secs(1200)).await;
    eval_loop.run_tick().await;
    assert_eq!(sink.alerts.lock().await.len(), 1);
}

#[tokio::test]
async fn missing_data_never_fires_any_operator() {
    tripwire_common::id::init(1, 1);
    for op in [">", "<", ">=", "<=", "==", "!="] {
        let rule = make_rule("r1", "btc-usd", op, 60000.0, 900);
        let metrics = ScriptedMetrics::new().with("btc-usd", vec![MetricStep::Value(None)]);
        let (eval_loop, sink, notifier) = build_loop(vec![rule], metrics);

        eval_loop.run_tick().await;

        assert_eq!(
            sink.alerts.lock().await.len(),
            0,
            "operator {op} fired on missing data"
        );
        assert_eq!(notifier.dispatched.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn rule_source_outage_aborts_the_tick() {
    let sink = Arc::new(MemorySink::default());
    let notifier = Arc::new(CountingNotifier::default());
    let eval_loop = EvaluationLoop::new(
        Arc::new(UnavailableRules),
        Arc::new(ScriptedMetrics::new()),
        Arc::new(MemoryCooldownStore::new()),
        sink.clone(),
        notifier.clone(),
        test_config(),
    );

    eval_loop.run_tick().await;

    assert_eq!(sink.alerts.lock().await.len(), 0);
    assert_eq!(notifier.dispatched.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_failing_rule_does_not_block_others() {
    tripwire_common::id::init(1, 1);
    let rule_a = make_rule("r-a", "series-a", ">", 60000.0, 900);
    let rule_b = make_rule("r-b", "series-b", ">", 60000.0, 900);
    let metrics = ScriptedMetrics::new()
        .with("series-a", vec![MetricStep::Fail])
        .with("series-b", vec![MetricStep::Value(Some(61000.0))]);
    let (eval_loop, sink, _) = build_loop(vec![rule_a, rule_b], metrics);

    eval_loop.run_tick().await;

    let alerts = sink.alerts.lock().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "r-b");
}

#[tokio::test(start_paused = true)]
async fn hung_query_is_abandoned_and_next_tick_recovers() {
    tripwire_common::id::init(1, 1);
    let rule = make_rule("r1", "btc-usd", ">", 60000.0, 900);
    let metrics = ScriptedMetrics::new().with(
        "btc-usd",
        vec![MetricStep::Hang, MetricStep::Value(Some(61000.0))],
    );
    let (eval_loop, sink, _) = build_loop(vec![rule], metrics);

    // First tick hangs on the metric query and is abandoned at the per-rule
    // deadline; run_tick still returns.
    eval_loop.run_tick().await;
    assert_eq!(sink.alerts.lock().await.len(), 0);

    eval_loop.run_tick().await;
    assert_eq!(sink.alerts.lock().await.len(), 1);
}

#[tokio::test]
async fn persistence_failure_suppresses_dispatch() {
    tripwire_common::id::init(1, 1);
    let rule = make_rule("r1", "btc-usd", ">", 60000.0, 900);
    let metrics = ScriptedMetrics::new().with("btc-usd", vec![MetricStep::Value(Some(61000.0))]);
    let sink = Arc::new(MemorySink {
        fail_record: true,
        ..Default::default()
    });
    let notifier = Arc::new(CountingNotifier::default());
    let eval_loop = EvaluationLoop::new(
        Arc::new(StaticRules(vec![rule])),
        Arc::new(metrics),
        Arc::new(MemoryCooldownStore::new()),
        sink.clone(),
        notifier.clone(),
        test_config(),
    );

    eval_loop.run_tick().await;

    assert_eq!(notifier.dispatched.load(Ordering::SeqCst), 0);
    assert_eq!(sink.appended.lock().await.len(), 0);
}

#[tokio::test]
async fn zero_cooldown_rule_never_fires() {
    tripwire_common::id::init(1, 1);
    let rule = make_rule("r1", "btc-usd", ">", 60000.0, 0);
    let metrics = ScriptedMetrics::new().with("btc-usd", vec![MetricStep::Value(Some(61000.0))]);
    let (eval_loop, sink, _) = build_loop(vec![rule], metrics);

    eval_loop.run_tick().await;

    assert_eq!(sink.alerts.lock().await.len(), 0);
}

#[tokio::test]
async fn inactive_rules_are_skipped() {
    tripwire_common::id::init(1, 1);
    let mut rule = make_rule("r1", "btc-usd", ">", 60000.0, 900);
    rule.active = false;
    let metrics = ScriptedMetrics::new().with("btc-usd", vec![MetricStep::Value(Some(61000.0))]);
    let (eval_loop, sink, _) = build_loop(vec![rule], metrics);

    eval_loop.run_tick().await;

    assert_eq!(sink.alerts.lock().await.len(), 0);
}

#[tokio::test]
async fn malformed_condition_skips_rule_but_not_siblings() {
    tripwire_common::id::init(1, 1);
    let mut bad = make_rule("r-bad", "series-a", ">", 60000.0, 900);
    bad.condition.operator = "~=".to_string();
    let good = make_rule("r-good", "series-b", ">", 60000.0, 900);
    let metrics = ScriptedMetrics::new()
        .with("series-a", vec![MetricStep::Value(Some(61000.0))])
        .with("series-b", vec![MetricStep::Value(Some(61000.0))]);
    let (eval_loop, sink, _) = build_loop(vec![bad, good], metrics);

    eval_loop.run_tick().await;

    let alerts = sink.alerts.lock().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "r-good");
}
