//! SDK self-telemetry: debug, error and configuration reports about the
//! SDK itself, written through the RUM writer.
//!
//! Each event is sampled first, then deduplicated by identity within the
//! session, then capped per session. Configuration reports have their own
//! extra sampler and a separate cap.

use std::collections::HashSet;
use std::sync::Arc;

use pulse_core::context::{GlobalState, RumContext};
use pulse_core::events::{
    ConfigurationMarker, DdMeta, DebugStatus, ErrorStatus, IdRef, TelemetryCommon,
    TelemetryConfiguration, TelemetryConfigurationData, TelemetryConfigurationEvent,
    TelemetryDebugData, TelemetryDebugEvent, TelemetryErrorData, TelemetryErrorDetails,
    TelemetryErrorEvent,
};
use pulse_core::raw::{CoreConfiguration, TelemetryType};
use pulse_core::sampling::{RateBasedSampler, Sampler};
use pulse_core::time::{duration_to_nanos, TimeProvider};
use pulse_core::{DataWriter, RawEvent, RawEventKind, RumEvent};

use crate::config::{RumConfig, TELEMETRY_SERVICE_NAME};

/// What makes two telemetry events the same for deduplication.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TelemetryEventId {
    pub telemetry_type: TelemetryType,
    pub message: String,
    pub kind: Option<String>,
}

/// Why an event was not written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelemetryOutcome {
    Written,
    Sampled,
    Duplicate,
    LimitReached,
    WriteFailed,
    /// Recorded as state; nothing to write.
    Recorded,
}

pub struct TelemetryEventHandler {
    config: RumConfig,
    globals: Arc<GlobalState>,
    time_provider: Arc<dyn TimeProvider>,
    sampler: Arc<dyn Sampler>,
    configuration_sampler: Arc<dyn Sampler>,
    seen: HashSet<TelemetryEventId>,
    configuration_count: usize,
}

impl TelemetryEventHandler {
    pub fn new(
        config: RumConfig,
        globals: Arc<GlobalState>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let sampler = Arc::new(RateBasedSampler::new(config.telemetry_sample_rate));
        let configuration_sampler = Arc::new(RateBasedSampler::new(
            config.telemetry_configuration_sample_rate,
        ));
        Self::with_samplers(config, globals, time_provider, sampler, configuration_sampler)
    }

    pub fn with_samplers(
        config: RumConfig,
        globals: Arc<GlobalState>,
        time_provider: Arc<dyn TimeProvider>,
        sampler: Arc<dyn Sampler>,
        configuration_sampler: Arc<dyn Sampler>,
    ) -> Self {
        Self {
            config,
            globals,
            time_provider,
            sampler,
            configuration_sampler,
            seen: HashSet::new(),
            configuration_count: 0,
        }
    }

    /// Forget everything counted for the previous session.
    pub fn on_session_started(&mut self) {
        self.seen.clear();
        self.configuration_count = 0;
    }

    pub fn handle_event(
        &mut self,
        event: &RawEvent,
        ctx: &RumContext,
        writer: &dyn DataWriter<RumEvent>,
    ) -> TelemetryOutcome {
        let RawEventKind::SendTelemetry {
            telemetry_type,
            message,
            stack,
            kind,
            configuration,
        } = &event.kind
        else {
            return TelemetryOutcome::Recorded;
        };

        if *telemetry_type == TelemetryType::InterceptorSetup {
            self.globals.set_interceptor_configured(true);
            return TelemetryOutcome::Recorded;
        }

        if !self.sampler.sample() {
            return TelemetryOutcome::Sampled;
        }

        let rum_event = if *telemetry_type == TelemetryType::Configuration {
            if !self.configuration_sampler.sample() {
                return TelemetryOutcome::Sampled;
            }
            if self.configuration_count >= self.config.telemetry_max_configuration_events_per_session {
                tracing::info!("configuration telemetry already sent for this session, rejecting");
                return TelemetryOutcome::LimitReached;
            }
            self.configuration_count += 1;
            self.configuration_event(event, ctx, configuration.clone().unwrap_or_default())
        } else {
            let identity = TelemetryEventId {
                telemetry_type: *telemetry_type,
                message: message.clone(),
                kind: kind.clone(),
            };
            if self.seen.contains(&identity) {
                tracing::info!(message = %message, "telemetry event already seen in this session, rejecting");
                return TelemetryOutcome::Duplicate;
            }
            if self.seen.len() >= self.config.telemetry_max_events_per_session {
                tracing::info!("max number of telemetry events per session reached, rejecting");
                return TelemetryOutcome::LimitReached;
            }
            self.seen.insert(identity);
            match telemetry_type {
                TelemetryType::Error => self.error_event(event, ctx, message, stack, kind),
                _ => self.debug_event(event, ctx, message),
            }
        };

        if writer.write(&rum_event) {
            TelemetryOutcome::Written
        } else {
            tracing::debug!(message = %message, "telemetry event was not written");
            TelemetryOutcome::WriteFailed
        }
    }

    fn common(&self, event: &RawEvent, ctx: &RumContext) -> TelemetryCommon {
        TelemetryCommon {
            date: event.time.timestamp_ms + self.time_provider.server_offset_ms(),
            service: TELEMETRY_SERVICE_NAME.to_string(),
            source: self.config.source.clone(),
            version: self.config.sdk_version.clone(),
            application: Some(IdRef::new(ctx.application_id.as_str())),
            session: ctx.session_id.as_ref().map(|s| IdRef::new(s.as_str())),
            view: ctx.view_id.as_ref().map(|v| IdRef::new(v.as_str())),
            action: ctx.action_id.as_ref().map(|a| IdRef::new(a.as_str())),
            dd: DdMeta::current(),
        }
    }

    fn debug_event(&self, event: &RawEvent, ctx: &RumContext, message: &str) -> RumEvent {
        RumEvent::TelemetryDebug(TelemetryDebugEvent {
            common: self.common(event, ctx),
            telemetry: TelemetryDebugData {
                message: message.to_owned(),
                status: DebugStatus::Debug,
            },
        })
    }

    fn error_event(
        &self,
        event: &RawEvent,
        ctx: &RumContext,
        message: &str,
        stack: &Option<String>,
        kind: &Option<String>,
    ) -> RumEvent {
        let error = (stack.is_some() || kind.is_some()).then(|| TelemetryErrorDetails {
            stack: stack.clone(),
            kind: kind.clone(),
        });
        RumEvent::TelemetryError(TelemetryErrorEvent {
            common: self.common(event, ctx),
            telemetry: TelemetryErrorData {
                message: message.to_owned(),
                status: ErrorStatus::Error,
                error,
            },
        })
    }

    fn configuration_event(
        &self,
        event: &RawEvent,
        ctx: &RumContext,
        core: CoreConfiguration,
    ) -> RumEvent {
        let period_ms = duration_to_nanos(self.config.vitals_update_period) / 1_000_000;
        RumEvent::TelemetryConfiguration(TelemetryConfigurationEvent {
            common: self.common(event, ctx),
            telemetry: TelemetryConfigurationData {
                marker: ConfigurationMarker::Configuration,
                configuration: TelemetryConfiguration {
                    session_sample_rate: self.config.session_sample_rate.round() as i64,
                    telemetry_sample_rate: self.config.telemetry_sample_rate.round() as i64,
                    use_proxy: core.use_proxy,
                    use_local_encryption: core.use_local_encryption,
                    track_errors: core.track_errors,
                    track_long_task: self.config.track_long_tasks,
                    track_frustrations: self.config.track_frustrations,
                    track_background_events: self.config.track_background_events,
                    track_network_requests: self.globals.interceptor_configured(),
                    use_tracing: self.globals.tracer_registered(),
                    view_tracking_strategy: self.config.view_tracking_strategy.clone(),
                    batch_size: core.batch_size,
                    batch_upload_frequency: core.batch_upload_frequency,
                    mobile_vitals_update_period: period_ms,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use pulse_core::ids::{ApplicationId, SessionId};
    use pulse_core::sampling::ConstantSampler;
    use pulse_core::time::FixedTimeProvider;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<RumEvent>>,
    }

    impl DataWriter<RumEvent> for Recorder {
        fn write(&self, event: &RumEvent) -> bool {
            self.events.lock().push(event.clone());
            true
        }
    }

    fn handler(sampled: bool) -> (TelemetryEventHandler, Arc<GlobalState>) {
        let globals = GlobalState::new();
        let handler = TelemetryEventHandler::with_samplers(
            RumConfig::default(),
            globals.clone(),
            Arc::new(FixedTimeProvider(1_000)),
            Arc::new(ConstantSampler(sampled)),
            Arc::new(ConstantSampler(true)),
        );
        (handler, globals)
    }

    fn ctx() -> RumContext {
        RumContext::for_application(ApplicationId::from_raw("app")).with_session(SessionId::new())
    }

    fn telemetry(telemetry_type: TelemetryType, message: &str) -> RawEvent {
        RawEvent::new(RawEventKind::SendTelemetry {
            telemetry_type,
            message: message.into(),
            stack: None,
            kind: None,
            configuration: None,
        })
    }

    #[test]
    fn duplicates_are_rejected_until_next_session() {
        let (mut handler, _) = handler(true);
        let writer = Recorder::default();
        let event = telemetry(TelemetryType::Debug, "cache miss");

        assert_eq!(handler.handle_event(&event, &ctx(), &writer), TelemetryOutcome::Written);
        assert_eq!(handler.handle_event(&event, &ctx(), &writer), TelemetryOutcome::Duplicate);
        handler.on_session_started();
        assert_eq!(handler.handle_event(&event, &ctx(), &writer), TelemetryOutcome::Written);
        assert_eq!(writer.events.lock().len(), 2);
    }

    #[test]
    fn same_message_with_different_type_is_distinct() {
        let (mut handler, _) = handler(true);
        let writer = Recorder::default();
        handler.handle_event(&telemetry(TelemetryType::Debug, "x"), &ctx(), &writer);
        let outcome = handler.handle_event(&telemetry(TelemetryType::Error, "x"), &ctx(), &writer);
        assert_eq!(outcome, TelemetryOutcome::Written);
        let events = writer.events.lock();
        assert!(matches!(events[1], RumEvent::TelemetryError(_)));
    }

    #[test]
    fn sampling_happens_before_dedup() {
        let (mut handler, _) = handler(false);
        let writer = Recorder::default();
        let event = telemetry(TelemetryType::Error, "boom");
        assert_eq!(handler.handle_event(&event, &ctx(), &writer), TelemetryOutcome::Sampled);
        assert!(handler.seen.is_empty());
    }

    #[test]
    fn per_session_cap_applies() {
        let (mut handler, _) = handler(true);
        let writer = Recorder::default();
        for i in 0..100 {
            let outcome =
                handler.handle_event(&telemetry(TelemetryType::Debug, &format!("m{i}")), &ctx(), &writer);
            assert_eq!(outcome, TelemetryOutcome::Written);
        }
        let outcome = handler.handle_event(&telemetry(TelemetryType::Debug, "one more"), &ctx(), &writer);
        assert_eq!(outcome, TelemetryOutcome::LimitReached);
    }

    #[test]
    fn per_session_cap_resets_on_new_session() {
        let (mut handler, _) = handler(true);
        let writer = Recorder::default();
        let cap = handler.config.telemetry_max_events_per_session;
        for i in 0..cap {
            handler.handle_event(&telemetry(TelemetryType::Debug, &format!("old{i}")), &ctx(), &writer);
        }
        assert_eq!(
            handler.handle_event(&telemetry(TelemetryType::Debug, "late"), &ctx(), &writer),
            TelemetryOutcome::LimitReached
        );

        handler.on_session_started();
        for i in 0..cap {
            let outcome =
                handler.handle_event(&telemetry(TelemetryType::Error, &format!("new{i}")), &ctx(), &writer);
            assert_eq!(outcome, TelemetryOutcome::Written);
        }
        assert_eq!(
            handler.handle_event(&telemetry(TelemetryType::Error, "overflow"), &ctx(), &writer),
            TelemetryOutcome::LimitReached
        );
        assert_eq!(writer.events.lock().len(), cap * 2);
    }

    #[test]
    fn configuration_has_its_own_counter() {
        let (mut handler, globals) = handler(true);
        let writer = Recorder::default();
        globals.set_tracer_registered(true);
        handler.handle_event(&telemetry(TelemetryType::InterceptorSetup, ""), &ctx(), &writer);
        assert!(globals.interceptor_configured());
        assert!(writer.events.lock().is_empty());

        let config = RawEvent::new(RawEventKind::SendTelemetry {
            telemetry_type: TelemetryType::Configuration,
            message: String::new(),
            stack: None,
            kind: None,
            configuration: Some(CoreConfiguration {
                batch_size: 500,
                ..CoreConfiguration::default()
            }),
        });
        assert_eq!(handler.handle_event(&config, &ctx(), &writer), TelemetryOutcome::Written);
        assert_eq!(
            handler.handle_event(&config, &ctx(), &writer),
            TelemetryOutcome::LimitReached
        );
        assert_eq!(
            handler.handle_event(&telemetry(TelemetryType::Debug, "d"), &ctx(), &writer),
            TelemetryOutcome::Written
        );

        let events = writer.events.lock();
        let RumEvent::TelemetryConfiguration(event) = &events[0] else {
            panic!("expected configuration");
        };
        let configuration = &event.telemetry.configuration;
        assert!(configuration.use_tracing);
        assert!(configuration.track_network_requests);
        assert_eq!(configuration.batch_size, 500);
        assert_eq!(configuration.session_sample_rate, 100);
        assert_eq!(configuration.mobile_vitals_update_period, 500);
    }

    #[test]
    fn date_is_corrected_by_server_offset() {
        let (mut handler, _) = handler(true);
        let writer = Recorder::default();
        let event = telemetry(TelemetryType::Debug, "offset");
        handler.handle_event(&event, &ctx(), &writer);
        let events = writer.events.lock();
        let RumEvent::TelemetryDebug(debug) = &events[0] else {
            panic!("expected debug");
        };
        assert_eq!(debug.common.date, event.time.timestamp_ms + 1_000);
        assert_eq!(debug.common.service, "pulse-sdk");
    }
}
