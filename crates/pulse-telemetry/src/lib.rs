//! Internal diagnostics for the SDK: `tracing` subscriber setup, a SQLite
//! sink for warn+ diagnostics and the pipeline metrics recorder.

mod diagnostics;
mod metrics;

pub use diagnostics::{DiagnosticLayer, DiagnosticQuery, DiagnosticRecord, DiagnosticSink};
pub use metrics::{
    HistogramSummary, MetricKind, MetricSample, MetricsQuery, PipelineMetrics, RUM_EVENTS_DROPPED,
    RUM_EVENTS_WRITTEN, UPLOAD_BATCHES, UPLOAD_DURATION_MS,
};

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default level. `RUST_LOG` takes precedence when set.
    pub log_level: Level,
    /// Per-module overrides, e.g. `("pulse_upload", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    /// Where warn+ diagnostics are persisted, if anywhere.
    pub diagnostics_db_path: Option<PathBuf>,
    /// Where metric snapshots are persisted, if anywhere.
    pub metrics_db_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            diagnostics_db_path: None,
            metrics_db_path: None,
        }
    }
}

impl TelemetryConfig {
    fn directives(&self, overrides: &[(String, Level)]) -> String {
        let mut s = self.log_level.to_string().to_lowercase();
        for (module, level) in overrides {
            s.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        s
    }
}

/// Parse a level name such as `"warn"`, falling back to INFO.
pub fn parse_level(s: &str) -> Level {
    s.parse().unwrap_or(Level::INFO)
}

/// Handle to the installed telemetry. Keeps the diagnostics sink and metrics
/// reachable and allows log levels to change at runtime.
pub struct TelemetryGuard {
    config: TelemetryConfig,
    diagnostics: Option<Arc<DiagnosticSink>>,
    metrics: Arc<PipelineMetrics>,
    module_levels: Mutex<Vec<(String, Level)>>,
    reload: Option<reload::Handle<EnvFilter, Registry>>,
}

impl TelemetryGuard {
    /// Change the level of one module and rebuild the active filter.
    pub fn set_module_level(&self, module: &str, level: Level) {
        let mut levels = self.module_levels.lock();
        match levels.iter_mut().find(|(m, _)| m == module) {
            Some(entry) => entry.1 = level,
            None => levels.push((module.to_string(), level)),
        }
        if let Some(handle) = &self.reload {
            let filter = EnvFilter::new(self.config.directives(&levels));
            if let Err(e) = handle.reload(filter) {
                tracing::warn!(error = %e, "failed to reload log filter");
            }
        }
    }

    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.lock().clone()
    }

    pub fn diagnostics(&self) -> Option<&DiagnosticSink> {
        self.diagnostics.as_deref()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }
}

/// Install the global subscriber. If one is already installed (tests, or a
/// host application with its own), the guard still carries sink and metrics.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.directives(&config.module_levels)));
    let (filter, reload_handle) = reload::Layer::new(env_filter);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true);

    let diagnostics = config.diagnostics_db_path.as_ref().and_then(|path| {
        match DiagnosticSink::open(path) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                eprintln!("pulse-telemetry: failed to open diagnostics DB: {e}");
                None
            }
        }
    });
    let diagnostic_layer = diagnostics.clone().map(DiagnosticLayer::new);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(diagnostic_layer)
        .try_init()
        .is_ok();

    let metrics = match &config.metrics_db_path {
        Some(path) => PipelineMetrics::open(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to open metrics DB, keeping metrics in memory");
            PipelineMetrics::in_memory()
        }),
        None => PipelineMetrics::in_memory(),
    };

    TelemetryGuard {
        module_levels: Mutex::new(config.module_levels.clone()),
        config,
        diagnostics,
        metrics: Arc::new(metrics),
        reload: installed.then_some(reload_handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_overrides() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            ..Default::default()
        };
        let d = config.directives(&[("pulse_upload".into(), Level::DEBUG)]);
        assert_eq!(d, "warn,pulse_upload=debug");
    }

    #[test]
    fn parse_level_falls_back() {
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("loud"), Level::INFO);
    }

    #[test]
    fn guard_tracks_module_levels() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init_telemetry(TelemetryConfig {
            diagnostics_db_path: Some(dir.path().join("diag.db")),
            ..Default::default()
        });
        guard.set_module_level("pulse_rum", Level::DEBUG);
        guard.set_module_level("pulse_rum", Level::TRACE);
        assert_eq!(guard.module_levels(), vec![("pulse_rum".to_string(), Level::TRACE)]);
        assert!(guard.diagnostics().is_some());
        guard.metrics().incr(RUM_EVENTS_WRITTEN, &[], 1);
        assert_eq!(guard.metrics().counter(RUM_EVENTS_WRITTEN, &[]), 1);
    }
}
