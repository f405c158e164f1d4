use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const UPLOAD_BATCHES: &str = "upload.batches";
pub const UPLOAD_DURATION_MS: &str = "upload.duration_ms";
pub const RUM_EVENTS_WRITTEN: &str = "rum.events.written";
pub const RUM_EVENTS_DROPPED: &str = "rum.events.dropped";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Histogram,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Histogram => "histogram",
        }
    }
}

/// One persisted metric value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: i64,
    pub timestamp: String,
    pub name: String,
    pub value: f64,
    pub labels: Option<String>,
    pub kind: MetricKind,
}

#[derive(Clone, Debug, Default)]
pub struct MetricsQuery {
    pub name: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
}

#[derive(Default)]
struct Observations(Mutex<Vec<f64>>);

impl Observations {
    fn push(&self, v: f64) {
        self.0.lock().push(v);
    }

    fn summary(&self) -> HistogramSummary {
        let mut obs = self.0.lock().clone();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.total_cmp(b));
        let n = obs.len();
        let rank = |q: f64| obs[((n as f64 * q) as usize).min(n - 1)];
        HistogramSummary {
            count: n as u64,
            sum: obs.iter().sum(),
            min: obs[0],
            max: obs[n - 1],
            p50: rank(0.5),
            p95: rank(0.95),
        }
    }
}

/// Name plus labels sorted by key, so label order never splits a series.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    fn labels_json(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        let map: BTreeMap<&str, &str> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        serde_json::to_string(&map).ok()
    }
}

/// In-memory counters and histograms for the event pipeline, optionally
/// snapshotted to SQLite.
pub struct PipelineMetrics {
    counters: RwLock<HashMap<SeriesKey, AtomicU64>>,
    histograms: RwLock<HashMap<SeriesKey, Observations>>,
    db: Option<Mutex<Connection>>,
}

impl PipelineMetrics {
    /// Metrics without persistence.
    pub fn in_memory() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            db: None,
        }
    }

    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS metric_samples (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 name TEXT NOT NULL,
                 value REAL NOT NULL,
                 labels TEXT,
                 kind TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_samples_name ON metric_samples(name, timestamp);",
        )?;
        Ok(Self {
            db: Some(Mutex::new(conn)),
            ..Self::in_memory()
        })
    }

    pub fn incr(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = SeriesKey::new(name, labels);
        if let Some(c) = self.counters.read().get(&key) {
            c.fetch_add(n, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        if let Some(h) = self.histograms.read().get(&key) {
            h.push(value);
            return;
        }
        self.histograms.write().entry(key).or_default().push(value);
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = SeriesKey::new(name, labels);
        self.counters
            .read()
            .get(&key)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Sum of a counter across every label set.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .read()
            .iter()
            .filter(|(k, _)| k.name == name)
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = SeriesKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(Observations::summary)
            .unwrap_or_default()
    }

    /// Persist current values. Returns the number of rows written, zero when
    /// metrics are memory-only.
    pub fn snapshot(&self) -> Result<usize, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let now = Utc::now().to_rfc3339();
        let db = db.lock();
        let mut rows = 0;
        let insert = |key: &SeriesKey, value: f64, kind: MetricKind| {
            db.execute(
                "INSERT INTO metric_samples (timestamp, name, value, labels, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![now, key.name, value, key.labels_json(), kind.as_str()],
            )
        };
        for (key, c) in self.counters.read().iter() {
            rows += insert(key, c.load(Ordering::Relaxed) as f64, MetricKind::Counter)?;
        }
        for (key, h) in self.histograms.read().iter() {
            rows += insert(key, h.summary().p50, MetricKind::Histogram)?;
        }
        Ok(rows)
    }

    pub fn query(&self, q: &MetricsQuery) -> Result<Vec<MetricSample>, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(Vec::new());
        };
        let db = db.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, name, value, labels, kind FROM metric_samples WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(name) = &q.name {
            sql.push_str(&format!(" AND name = ?{}", params.len() + 1));
            params.push(Box::new(name.clone()));
        }
        if let Some(since) = &q.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(since.clone()));
        }
        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let kind: String = row.get(5)?;
            Ok(MetricSample {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                name: row.get(2)?,
                value: row.get(3)?,
                labels: row.get(4)?,
                kind: if kind == "histogram" {
                    MetricKind::Histogram
                } else {
                    MetricKind::Counter
                },
            })
        })?;
        rows.collect()
    }

    /// Delete persisted samples older than `retention_days`.
    pub fn prune(&self, retention_days: u32) -> Result<usize, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let cutoff = Utc::now()
            .checked_sub_signed(chrono::Duration::days(i64::from(retention_days)))
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        db.lock().execute(
            "DELETE FROM metric_samples WHERE timestamp < ?1",
            rusqlite::params![cutoff],
        )
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_are_keyed_by_labels() {
        let m = PipelineMetrics::in_memory();
        m.incr(UPLOAD_BATCHES, &[("feature", "rum"), ("status", "success")], 1);
        m.incr(UPLOAD_BATCHES, &[("status", "success"), ("feature", "rum")], 2);
        m.incr(UPLOAD_BATCHES, &[("feature", "logs"), ("status", "network_error")], 1);

        assert_eq!(
            m.counter(UPLOAD_BATCHES, &[("feature", "rum"), ("status", "success")]),
            3
        );
        assert_eq!(m.counter_total(UPLOAD_BATCHES), 4);
        assert_eq!(m.counter(RUM_EVENTS_DROPPED, &[]), 0);
    }

    #[test]
    fn histogram_summary() {
        let m = PipelineMetrics::in_memory();
        for v in 1..=20 {
            m.observe(UPLOAD_DURATION_MS, &[("feature", "rum")], f64::from(v));
        }
        let s = m.histogram(UPLOAD_DURATION_MS, &[("feature", "rum")]);
        assert_eq!(s.count, 20);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 20.0);
        assert_eq!(s.sum, 210.0);
        assert!(s.p95 >= 19.0);
        assert_eq!(m.histogram("missing", &[]), HistogramSummary::default());
    }

    #[test]
    fn memory_only_snapshot_is_a_noop() {
        let m = PipelineMetrics::in_memory();
        m.incr(RUM_EVENTS_WRITTEN, &[], 1);
        assert_eq!(m.snapshot().unwrap(), 0);
        assert!(m.query(&MetricsQuery::default()).unwrap().is_empty());
    }

    #[test]
    fn snapshot_query_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let m = PipelineMetrics::open(&dir.path().join("metrics.db")).unwrap();
        m.incr(RUM_EVENTS_WRITTEN, &[("kind", "view")], 7);
        m.observe(UPLOAD_DURATION_MS, &[], 12.0);

        assert_eq!(m.snapshot().unwrap(), 2);
        let rows = m
            .query(&MetricsQuery {
                name: Some(RUM_EVENTS_WRITTEN.into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 7.0);
        assert_eq!(rows[0].kind, MetricKind::Counter);
        assert_eq!(rows[0].labels.as_deref(), Some(r#"{"kind":"view"}"#));

        assert_eq!(m.prune(0).unwrap(), 2);
    }

    #[test]
    fn concurrent_increments() {
        let m = Arc::new(PipelineMetrics::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = m.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        m.incr(RUM_EVENTS_WRITTEN, &[], 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.counter(RUM_EVENTS_WRITTEN, &[]), 4_000);
    }
}
