//! Settings type definitions.
//!
//! All types use camelCase JSON names and `#[serde(default)]`, so a partial
//! settings file only needs the keys it overrides.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use pulse_core::TrackingConsent;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Root settings type for the SDK.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    pub identity: IdentitySettings,
    pub features: FeatureSettings,
    pub rum: RumSettings,
    pub persistence: PersistenceSettings,
    pub upload: UploadSettings,
    pub logging: LoggingSettings,
}

/// Who is reporting and where to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Never written back out.
    #[serde(skip_serializing)]
    pub client_token: Option<SecretString>,
    pub env: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub version: String,
    /// Base URL of the intake.
    pub site: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    /// `source` tag on every event.
    pub source: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            client_token: None,
            env: "prod".to_string(),
            service: None,
            version: "1.0.0".to_string(),
            site: "https://intake.pulse.dev".to_string(),
            application_id: None,
            source: "rust".to_string(),
        }
    }
}

/// Which features are registered at startup.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureSettings {
    pub rum: bool,
    pub logs: bool,
    pub traces: bool,
    pub crash_reports: bool,
    pub web_view: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            rum: true,
            logs: true,
            traces: true,
            crash_reports: true,
            web_view: false,
        }
    }
}

/// Scope tree and telemetry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RumSettings {
    /// Percentage of sessions that emit events.
    pub session_sample_rate: f32,
    /// Percentage of telemetry events kept.
    pub telemetry_sample_rate: f32,
    /// Percentage of sessions that report a configuration event.
    pub telemetry_configuration_sample_rate: f32,
    pub action_inactivity_ms: u64,
    pub action_max_duration_ms: u64,
    pub session_inactivity_ms: u64,
    pub session_max_duration_ms: u64,
    /// Renew the session after this many events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_max_events: Option<u64>,
    pub track_frustrations: bool,
    pub track_background_events: bool,
    pub track_errors: bool,
    pub track_long_tasks: bool,
    pub long_task_threshold_ms: u64,
    pub frozen_frame_threshold_ms: u64,
    pub telemetry_max_events_per_session: usize,
    pub telemetry_max_configuration_events_per_session: usize,
    /// Idle time after which the active view is refreshed.
    pub keep_alive_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_tracking_strategy: Option<String>,
    pub vitals_update_period_ms: u64,
}

impl Default for RumSettings {
    fn default() -> Self {
        Self {
            session_sample_rate: 100.0,
            telemetry_sample_rate: 20.0,
            telemetry_configuration_sample_rate: 20.0,
            action_inactivity_ms: 100,
            action_max_duration_ms: 5_000,
            session_inactivity_ms: 15 * 60 * 1_000,
            session_max_duration_ms: 4 * 60 * 60 * 1_000,
            session_max_events: None,
            track_frustrations: true,
            track_background_events: false,
            track_errors: true,
            track_long_tasks: true,
            long_task_threshold_ms: 100,
            frozen_frame_threshold_ms: 700,
            telemetry_max_events_per_session: 100,
            telemetry_max_configuration_events_per_session: 1,
            keep_alive_ms: 5 * 60 * 1_000,
            view_tracking_strategy: None,
            vitals_update_period_ms: 500,
        }
    }
}

impl RumSettings {
    pub fn action_inactivity(&self) -> Duration {
        Duration::from_millis(self.action_inactivity_ms)
    }

    pub fn action_max_duration(&self) -> Duration {
        Duration::from_millis(self.action_max_duration_ms)
    }

    pub fn session_inactivity(&self) -> Duration {
        Duration::from_millis(self.session_inactivity_ms)
    }

    pub fn session_max_duration(&self) -> Duration {
        Duration::from_millis(self.session_max_duration_ms)
    }

    pub fn frozen_frame_threshold(&self) -> Duration {
        Duration::from_millis(self.frozen_frame_threshold_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

/// Batch file layout and hygiene limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceSettings {
    /// Root directory for batch files. Defaults to `~/.pulse/storage`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<String>,
    /// A batch file stays writable for this long after creation.
    pub recent_delay_ms: u64,
    pub max_batch_bytes: u64,
    pub max_item_bytes: u64,
    pub max_items_per_batch: usize,
    pub old_file_threshold_ms: u64,
    pub max_disk_bytes: u64,
    pub tracking_consent: TrackingConsent,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            storage_dir: None,
            recent_delay_ms: 5_000,
            max_batch_bytes: 4 * 1024 * 1024,
            max_item_bytes: 512 * 1024,
            max_items_per_batch: 500,
            old_file_threshold_ms: 18 * 60 * 60 * 1_000,
            max_disk_bytes: 128 * 1024 * 1024,
            tracking_consent: TrackingConsent::Granted,
        }
    }
}

impl PersistenceSettings {
    pub fn storage_root(&self) -> PathBuf {
        match &self.storage_dir {
            Some(dir) => PathBuf::from(dir),
            None => pulse_home().join("storage"),
        }
    }
}

/// How often batches are drained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadFrequency {
    Frequent,
    #[default]
    Average,
    Rare,
}

impl UploadFrequency {
    /// Base delay between upload passes.
    pub fn base_step(&self) -> Duration {
        match self {
            Self::Frequent => Duration::from_millis(500),
            Self::Average => Duration::from_millis(2_000),
            Self::Rare => Duration::from_millis(5_000),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "frequent" => Some(Self::Frequent),
            "average" => Some(Self::Average),
            "rare" => Some(Self::Rare),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadSettings {
    pub frequency: UploadFrequency,
    pub request_timeout_ms: u64,
    /// Bound on the shutdown flush.
    pub drain_timeout_ms: u64,
    pub use_proxy: bool,
    pub use_local_encryption: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            frequency: UploadFrequency::Average,
            request_timeout_ms: 10_000,
            drain_timeout_ms: 10_000,
            use_proxy: false,
            use_local_encryption: false,
        }
    }
}

impl UploadSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub module_levels: BTreeMap<String, String>,
    /// Persist warn+ SDK diagnostics to SQLite.
    pub persist_diagnostics: bool,
    pub metrics_enabled: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_levels: BTreeMap::new(),
            persist_diagnostics: true,
            metrics_enabled: true,
        }
    }
}

/// `~/.pulse`, or `/tmp/.pulse` without a home directory.
pub fn pulse_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse")
}
