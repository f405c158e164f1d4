use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A persisted SDK diagnostic (warn or error).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub session_id: Option<String>,
    pub feature: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct DiagnosticQuery {
    pub level: Option<String>,
    /// Substring match on the target.
    pub target: Option<String>,
    pub session_id: Option<String>,
    pub feature: Option<String>,
    /// RFC 3339 lower bound.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite table of warn+ diagnostics.
pub struct DiagnosticSink {
    conn: Mutex<Connection>,
}

impl DiagnosticSink {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS diagnostics (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 session_id TEXT,
                 feature TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_diag_level ON diagnostics(level);
             CREATE INDEX IF NOT EXISTS idx_diag_session ON diagnostics(session_id);
             CREATE INDEX IF NOT EXISTS idx_diag_feature ON diagnostics(feature);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, entry: &NewDiagnostic) {
        let conn = self.conn.lock();
        // A failing diagnostics table must not take logging down with it.
        let _ = conn.execute(
            "INSERT INTO diagnostics (timestamp, level, target, message, fields, session_id, feature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                entry.timestamp,
                entry.level,
                entry.target,
                entry.message,
                entry.fields,
                entry.session_id,
                entry.feature,
            ],
        );
    }

    /// Newest first.
    pub fn query(&self, q: &DiagnosticQuery) -> Result<Vec<DiagnosticRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, session_id, feature
             FROM diagnostics WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            sql.push_str(&format!(" AND level = ?{}", params.len() + 1));
            params.push(Box::new(level.to_uppercase()));
        }
        if let Some(target) = &q.target {
            sql.push_str(&format!(" AND target LIKE ?{}", params.len() + 1));
            params.push(Box::new(format!("%{target}%")));
        }
        if let Some(session_id) = &q.session_id {
            sql.push_str(&format!(" AND session_id = ?{}", params.len() + 1));
            params.push(Box::new(session_id.clone()));
        }
        if let Some(feature) = &q.feature {
            sql.push_str(&format!(" AND feature = ?{}", params.len() + 1));
            params.push(Box::new(feature.clone()));
        }
        if let Some(since) = &q.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len() + 1));
            params.push(Box::new(since.clone()));
        }

        sql.push_str(" ORDER BY id DESC");
        sql.push_str(&format!(" LIMIT {}", q.limit.unwrap_or(100)));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(DiagnosticRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                session_id: row.get(6)?,
                feature: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM diagnostics", [], |row| row.get(0))
    }
}

struct NewDiagnostic {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    session_id: Option<String>,
    feature: Option<String>,
}

/// `tracing` layer forwarding warn+ events into a [`DiagnosticSink`].
pub struct DiagnosticLayer {
    sink: Arc<DiagnosticSink>,
}

impl DiagnosticLayer {
    pub fn new(sink: Arc<DiagnosticSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    session_id: Option<String>,
    feature: Option<String>,
}

impl FieldCollector {
    fn put_str(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "session_id" => self.session_id = Some(value),
            "feature" => self.feature = Some(value),
            other => {
                self.fields
                    .insert(other.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        let rendered = if field.name() == "message" {
            rendered
        } else {
            rendered.trim_matches('"').to_string()
        };
        self.put_str(field.name(), rendered);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put_str(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

/// Span-level `session_id`/`feature`, inherited by events inside the span.
struct SpanTags {
    session_id: Option<String>,
    feature: Option<String>,
}

impl<S> Layer<S> for DiagnosticLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        if collector.session_id.is_none() || collector.feature.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    let extensions = span.extensions();
                    if let Some(tags) = extensions.get::<SpanTags>() {
                        if collector.session_id.is_none() {
                            collector.session_id.clone_from(&tags.session_id);
                        }
                        if collector.feature.is_none() {
                            collector.feature.clone_from(&tags.feature);
                        }
                    }
                }
            }
        }

        let fields = (!collector.fields.is_empty())
            .then(|| serde_json::to_string(&collector.fields).unwrap_or_default());

        self.sink.insert(&NewDiagnostic {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: collector.message.unwrap_or_default(),
            fields,
            session_id: collector.session_id,
            feature: collector.feature,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        if collector.session_id.is_none() && collector.feature.is_none() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanTags {
                session_id: collector.session_id,
                feature: collector.feature,
            });
        }
    }
}
