use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tripwire_common::types::{
    Alert, AlertStatus, Condition, DeliveryOutcome, DeliveryResult, Rule, Severity,
};
use tripwire_engine::error::EngineError;
use tripwire_engine::evaluator::Aggregation;
use tripwire_engine::{AlertSink, MetricQuery, RuleSource};

use crate::error::{Result, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS rules (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    series_ref    TEXT NOT NULL,
    field         TEXT NOT NULL,
    operator      TEXT NOT NULL,
    value         REAL NOT NULL,
    aggregation   TEXT NOT NULL,
    severity      TEXT NOT NULL,
    cooldown_secs INTEGER NOT NULL,
    active        INTEGER NOT NULL DEFAULT 1,
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id               TEXT PRIMARY KEY,
    rule_id          TEXT NOT NULL,
    rule_name        TEXT NOT NULL,
    series_ref       TEXT NOT NULL,
    severity         TEXT NOT NULL,
    cond_field       TEXT NOT NULL,
    cond_operator    TEXT NOT NULL,
    cond_value       REAL NOT NULL,
    cond_aggregation TEXT NOT NULL,
    observed_value   REAL NOT NULL,
    triggered_at     INTEGER NOT NULL,
    status           TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS delivery_results (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id     TEXT NOT NULL,
    channel      TEXT NOT NULL,
    outcome      TEXT NOT NULL,
    attempted_at INTEGER NOT NULL,
    error_detail TEXT
);

CREATE TABLE IF NOT EXISTS metrics (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    series_ref TEXT NOT NULL,
    field      TEXT NOT NULL,
    value      REAL NOT NULL,
    timestamp  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_series ON metrics (series_ref, field, timestamp);
CREATE INDEX IF NOT EXISTS idx_delivery_alert ON delivery_results (alert_id);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_rule(&self, rule: &Rule) -> Result<()> {
        let conn = self.lock();
        let now = Utc::now().timestamp_millis();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO rules (id, name, series_ref, field, operator, value, aggregation,
                                severity, cooldown_secs, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        stmt.execute(params![
            rule.id,
            rule.name,
            rule.series_ref,
            rule.condition.field,
            rule.condition.operator,
            rule.condition.value,
            rule.condition.aggregation,
            rule.severity.to_string(),
            rule.cooldown_secs as i64,
            rule.active,
            now,
            now,
        ])?;
        Ok(())
    }

    pub fn rule_exists_by_name(&self, name: &str) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT 1 FROM rules WHERE name = ?1 LIMIT 1")?;
        Ok(stmt
            .query_row(params![name], |_| Ok(()))
            .optional()?
            .is_some())
    }

    pub fn load_active_rules(&self) -> Result<Vec<Rule>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, series_ref, field, operator, value, aggregation,
                    severity, cooldown_secs, active
             FROM rules WHERE active = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Rule {
                id: row.get(0)?,
                name: row.get(1)?,
                series_ref: row.get(2)?,
                condition: Condition {
                    field: row.get(3)?,
                    operator: row.get(4)?,
                    value: row.get(5)?,
                    aggregation: row.get(6)?,
                },
                severity: row
                    .get::<_, String>(7)?
                    .parse()
                    .unwrap_or(Severity::Low),
                cooldown_secs: row.get::<_, i64>(8)? as u64,
                active: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO alerts (id, rule_id, rule_name, series_ref, severity,
                                 cond_field, cond_operator, cond_value, cond_aggregation,
                                 observed_value, triggered_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        stmt.execute(params![
            alert.id,
            alert.rule_id,
            alert.rule_name,
            alert.series_ref,
            alert.severity.to_string(),
            alert.condition.field,
            alert.condition.operator,
            alert.condition.value,
            alert.condition.aggregation,
            alert.observed_value,
            alert.triggered_at.timestamp_millis(),
            alert.status.to_string(),
        ])?;
        Ok(())
    }

    pub fn append_delivery_rows(&self, alert_id: &str, results: &[DeliveryResult]) -> Result<()> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO delivery_results (alert_id, channel, outcome, attempted_at, error_detail)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for result in results {
                stmt.execute(params![
                    alert_id,
                    result.channel,
                    result.outcome.to_string(),
                    result.attempted_at.timestamp_millis(),
                    result.error_detail,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Loads one alert with its delivery results in recorded order.
    pub fn get_alert(&self, alert_id: &str) -> Result<Alert> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, rule_id, rule_name, series_ref, severity,
                    cond_field, cond_operator, cond_value, cond_aggregation,
                    observed_value, triggered_at, status
             FROM alerts WHERE id = ?1",
        )?;
        let mut alert = stmt
            .query_row(params![alert_id], |row| {
                Ok(Alert {
                    id: row.get(0)?,
                    rule_id: row.get(1)?,
                    rule_name: row.get(2)?,
                    series_ref: row.get(3)?,
                    severity: row
                        .get::<_, String>(4)?
                        .parse()
                        .unwrap_or(Severity::Low),
                    condition: Condition {
                        field: row.get(5)?,
                        operator: row.get(6)?,
                        value: row.get(7)?,
                        aggregation: row.get(8)?,
                    },
                    observed_value: row.get(9)?,
                    triggered_at: millis_to_datetime(row.get(10)?),
                    status: row
                        .get::<_, String>(11)?
                        .parse()
                        .unwrap_or(AlertStatus::Pending),
                    delivery_results: Vec::new(),
                })
            })
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                entity: "alert",
                id: alert_id.to_string(),
            })?;

        let mut stmt = conn.prepare_cached(
            "SELECT channel, outcome, attempted_at, error_detail
             FROM delivery_results WHERE alert_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![alert_id], |row| {
            Ok(DeliveryResult {
                channel: row.get(0)?,
                outcome: row
                    .get::<_, String>(1)?
                    .parse()
                    .unwrap_or(DeliveryOutcome::Failed),
                attempted_at: millis_to_datetime(row.get(2)?),
                error_detail: row.get(3)?,
            })
        })?;
        alert.delivery_results = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alert)
    }

    /// Inserts one telemetry sample. Ingestion proper is an external
    /// collaborator; this exists for seeding and tests.
    pub fn record_sample(
        &self,
        series_ref: &str,
        field: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO metrics (series_ref, field, value, timestamp) VALUES (?1, ?2, ?3, ?4)",
        )?;
        stmt.execute(params![
            series_ref,
            field,
            value,
            timestamp.timestamp_millis()
        ])?;
        Ok(())
    }

    pub fn aggregate_value(
        &self,
        series_ref: &str,
        field: &str,
        aggregation: Aggregation,
        window: Duration,
    ) -> Result<Option<f64>> {
        let conn = self.lock();
        match aggregation {
            Aggregation::Latest => {
                let mut stmt = conn.prepare_cached(
                    "SELECT value FROM metrics WHERE series_ref = ?1 AND field = ?2
                     ORDER BY timestamp DESC, id DESC LIMIT 1",
                )?;
                Ok(stmt
                    .query_row(params![series_ref, field], |row| row.get::<_, f64>(0))
                    .optional()?)
            }
            Aggregation::Avg | Aggregation::Max | Aggregation::Min => {
                let func = match aggregation {
                    Aggregation::Avg => "AVG",
                    Aggregation::Max => "MAX",
                    Aggregation::Min => "MIN",
                    Aggregation::Latest => unreachable!(),
                };
                let cutoff = Utc::now().timestamp_millis() - window.as_millis() as i64;
                let sql = format!(
                    "SELECT {func}(value) FROM metrics
                     WHERE series_ref = ?1 AND field = ?2 AND timestamp >= ?3"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                // SQL aggregates over zero rows yield NULL, which maps to None.
                Ok(stmt.query_row(params![series_ref, field, cutoff], |row| {
                    row.get::<_, Option<f64>>(0)
                })?)
            }
        }
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl RuleSource for SqliteStore {
    async fn active_rules(&self) -> tripwire_engine::error::Result<Vec<Rule>> {
        self.load_active_rules()
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))
    }
}

#[async_trait]
impl MetricQuery for SqliteStore {
    async fn aggregate(
        &self,
        series_ref: &str,
        field: &str,
        aggregation: Aggregation,
        window: Duration,
    ) -> tripwire_engine::error::Result<Option<f64>> {
        self.aggregate_value(series_ref, field, aggregation, window)
            .map_err(|e| EngineError::Query(e.to_string()))
    }
}

#[async_trait]
impl AlertSink for SqliteStore {
    async fn record(&self, alert: &Alert) -> tripwire_engine::error::Result<String> {
        self.insert_alert(alert)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        Ok(alert.id.clone())
    }

    async fn append_delivery_results(
        &self,
        alert_id: &str,
        results: &[DeliveryResult],
    ) -> tripwire_engine::error::Result<()> {
        self.append_delivery_rows(alert_id, results)
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }
}
