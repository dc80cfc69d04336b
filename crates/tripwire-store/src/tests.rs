use crate::SqliteStore;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tripwire_common::types::{
    Alert, AlertStatus, Condition, DeliveryOutcome, DeliveryResult, Rule, Severity,
};
use tripwire_engine::evaluator::Aggregation;
use tripwire_engine::AlertSink;

fn make_rule(id: &str, active: bool) -> Rule {
    Rule {
        id: id.to_string(),
        name: format!("{id} threshold"),
        series_ref: "btc-usd".to_string(),
        condition: Condition {
            field: "price".to_string(),
            operator: ">".to_string(),
            value: 60000.0,
            aggregation: "latest".to_string(),
        },
        severity: Severity::Critical,
        cooldown_secs: 900,
        active,
    }
}

fn make_alert(id: &str) -> Alert {
    Alert {
        id: id.to_string(),
        rule_id: "rule-1".to_string(),
        rule_name: "rule-1 threshold".to_string(),
        series_ref: "btc-usd".to_string(),
        severity: Severity::High,
        condition: Condition {
            field: "price".to_string(),
            operator: ">".to_string(),
            value: 60000.0,
            aggregation: "latest".to_string(),
        },
        observed_value: 61000.0,
        triggered_at: Utc::now(),
        status: AlertStatus::Pending,
        delivery_results: Vec::new(),
    }
}

#[test]
fn active_rules_roundtrip_and_filtering() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.insert_rule(&make_rule("r1", true)).unwrap();
    store.insert_rule(&make_rule("r2", false)).unwrap();

    let rules = store.load_active_rules().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, "r1");
    assert_eq!(rules[0].condition.operator, ">");
    assert_eq!(rules[0].severity, Severity::Critical);
    assert_eq!(rules[0].cooldown_secs, 900);
}

#[test]
fn rule_exists_by_name_detects_duplicates() {
    let store = SqliteStore::open_in_memory().unwrap();
    assert!(!store.rule_exists_by_name("r1 threshold").unwrap());
    store.insert_rule(&make_rule("r1", true)).unwrap();
    assert!(store.rule_exists_by_name("r1 threshold").unwrap());
}

#[test]
fn alert_roundtrip_with_delivery_results_in_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    let alert = make_alert("a1");
    store.insert_alert(&alert).unwrap();

    let now = Utc::now();
    store
        .append_delivery_rows(
            "a1",
            &[
                DeliveryResult {
                    channel: "slack".to_string(),
                    outcome: DeliveryOutcome::Delivered,
                    attempted_at: now,
                    error_detail: None,
                },
                DeliveryResult {
                    channel: "email".to_string(),
                    outcome: DeliveryOutcome::Failed,
                    attempted_at: now,
                    error_detail: Some("relay rejected".to_string()),
                },
            ],
        )
        .unwrap();

    let loaded = store.get_alert("a1").unwrap();
    assert_eq!(loaded.rule_id, "rule-1");
    assert_eq!(loaded.observed_value, 61000.0);
    assert_eq!(loaded.status, AlertStatus::Pending);
    // Completion order is preserved: slack finished first.
    assert_eq!(loaded.delivery_results.len(), 2);
    assert_eq!(loaded.delivery_results[0].channel, "slack");
    assert_eq!(loaded.delivery_results[1].channel, "email");
    assert_eq!(
        loaded.delivery_results[1].error_detail.as_deref(),
        Some("relay rejected")
    );
}

#[test]
fn latest_aggregation_returns_most_recent_sample() {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = Utc::now();
    store
        .record_sample("btc-usd", "price", 59000.0, now - ChronoDuration::seconds(120))
        .unwrap();
    store
        .record_sample("btc-usd", "price", 61000.0, now - ChronoDuration::seconds(10))
        .unwrap();

    let value = store
        .aggregate_value("btc-usd", "price", Aggregation::Latest, Duration::from_secs(300))
        .unwrap();
    assert_eq!(value, Some(61000.0));
}

#[test]
fn windowed_aggregations_exclude_old_samples() {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = Utc::now();
    // Outside the 300s window
    store
        .record_sample("btc-usd", "price", 99000.0, now - ChronoDuration::seconds(600))
        .unwrap();
    store
        .record_sample("btc-usd", "price", 60000.0, now - ChronoDuration::seconds(100))
        .unwrap();
    store
        .record_sample("btc-usd", "price", 62000.0, now - ChronoDuration::seconds(50))
        .unwrap();

    let window = Duration::from_secs(300);
    let avg = store
        .aggregate_value("btc-usd", "price", Aggregation::Avg, window)
        .unwrap();
    assert_eq!(avg, Some(61000.0));

    let max = store
        .aggregate_value("btc-usd", "price", Aggregation::Max, window)
        .unwrap();
    assert_eq!(max, Some(62000.0));

    let min = store
        .aggregate_value("btc-usd", "price", Aggregation::Min, window)
        .unwrap();
    assert_eq!(min, Some(60000.0));
}

#[test]
fn empty_series_aggregates_to_none() {
    let store = SqliteStore::open_in_memory().unwrap();
    for aggregation in [
        Aggregation::Latest,
        Aggregation::Avg,
        Aggregation::Max,
        Aggregation::Min,
    ] {
        let value = store
            .aggregate_value("btc-usd", "price", aggregation, Duration::from_secs(300))
            .unwrap();
        assert_eq!(value, None, "{aggregation} over no samples");
    }
}

#[test]
fn samples_for_other_series_or_field_are_ignored() {
    let store = SqliteStore::open_in_memory().unwrap();
    let now = Utc::now();
    store.record_sample("eth-usd", "price", 3000.0, now).unwrap();
    store.record_sample("btc-usd", "volume", 1234.0, now).unwrap();

    let value = store
        .aggregate_value("btc-usd", "price", Aggregation::Latest, Duration::from_secs(300))
        .unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn alert_sink_trait_records_and_appends() {
    let store = SqliteStore::open_in_memory().unwrap();
    let alert = make_alert("a1");

    let alert_id = store.record(&alert).await.unwrap();
    assert_eq!(alert_id, "a1");

    store
        .append_delivery_results(
            &alert_id,
            &[DeliveryResult {
                channel: "email".to_string(),
                outcome: DeliveryOutcome::Delivered,
                attempted_at: Utc::now(),
                error_detail: None,
            }],
        )
        .await
        .unwrap();

    let loaded = store.get_alert(&alert_id).unwrap();
    assert_eq!(loaded.delivery_results.len(), 1);
    assert_eq!(
        loaded.delivery_results[0].outcome,
        DeliveryOutcome::Delivered
    );
}
