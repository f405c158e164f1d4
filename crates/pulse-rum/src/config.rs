use std::time::Duration;

use pulse_core::ids::ApplicationId;
use pulse_settings::PulseSettings;

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const TELEMETRY_SERVICE_NAME: &str = "pulse-sdk";

/// Policy and identity for one RUM application instance.
#[derive(Clone, Debug)]
pub struct RumConfig {
    pub application_id: ApplicationId,
    pub service: Option<String>,
    pub version: Option<String>,
    pub source: String,
    pub sdk_version: String,
    pub session_sample_rate: f32,
    pub telemetry_sample_rate: f32,
    pub telemetry_configuration_sample_rate: f32,
    pub action_inactivity: Duration,
    pub action_max_duration: Duration,
    pub session_inactivity: Duration,
    pub session_max_duration: Duration,
    pub session_max_events: Option<u64>,
    pub track_frustrations: bool,
    pub track_background_events: bool,
    pub track_errors: bool,
    pub track_long_tasks: bool,
    pub long_task_threshold: Duration,
    pub frozen_frame_threshold: Duration,
    pub keep_alive: Duration,
    pub telemetry_max_events_per_session: usize,
    pub telemetry_max_configuration_events_per_session: usize,
    pub view_tracking_strategy: Option<String>,
    pub vitals_update_period: Duration,
    /// Monotonic reading taken at process start; application start is
    /// measured from here.
    pub process_start_ns: i64,
}

impl Default for RumConfig {
    fn default() -> Self {
        Self::from_settings(&PulseSettings::default())
    }
}

impl RumConfig {
    pub fn from_settings(settings: &PulseSettings) -> Self {
        let rum = &settings.rum;
        let identity = &settings.identity;
        Self {
            application_id: identity
                .application_id
                .clone()
                .map(ApplicationId::from_raw)
                .unwrap_or_default(),
            service: identity.service.clone(),
            version: Some(identity.version.clone()),
            source: identity.source.clone(),
            sdk_version: SDK_VERSION.to_string(),
            session_sample_rate: rum.session_sample_rate,
            telemetry_sample_rate: rum.telemetry_sample_rate,
            telemetry_configuration_sample_rate: rum.telemetry_configuration_sample_rate,
            action_inactivity: rum.action_inactivity(),
            action_max_duration: rum.action_max_duration(),
            session_inactivity: rum.session_inactivity(),
            session_max_duration: rum.session_max_duration(),
            session_max_events: rum.session_max_events,
            track_frustrations: rum.track_frustrations,
            track_background_events: rum.track_background_events,
            track_errors: rum.track_errors,
            track_long_tasks: rum.track_long_tasks,
            long_task_threshold: Duration::from_millis(rum.long_task_threshold_ms),
            frozen_frame_threshold: rum.frozen_frame_threshold(),
            keep_alive: rum.keep_alive(),
            telemetry_max_events_per_session: rum.telemetry_max_events_per_session,
            telemetry_max_configuration_events_per_session: rum
                .telemetry_max_configuration_events_per_session,
            view_tracking_strategy: rum.view_tracking_strategy.clone(),
            vitals_update_period: Duration::from_millis(rum.vitals_update_period_ms),
            process_start_ns: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_are_carried_over() {
        let mut settings = PulseSettings::default();
        settings.identity.application_id = Some("app-1".into());
        settings.rum.action_inactivity_ms = 250;
        settings.rum.session_max_events = Some(10);
        let config = RumConfig::from_settings(&settings);
        assert_eq!(config.application_id.as_str(), "app-1");
        assert_eq!(config.action_inactivity, Duration::from_millis(250));
        assert_eq!(config.session_max_events, Some(10));
        assert_eq!(config.frozen_frame_threshold, Duration::from_millis(700));
    }
}
