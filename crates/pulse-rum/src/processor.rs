use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::context::RumContext;
use pulse_core::ids::ViewId;
use pulse_core::time::duration_to_nanos;
use pulse_core::{DataWriter, RawEvent, RawEventKind, RumEvent};
use pulse_telemetry::{PipelineMetrics, RUM_EVENTS_DROPPED, RUM_EVENTS_WRITTEN};

use crate::mapper::{self, EventMapper};
use crate::scope::{ApplicationScope, EmittedEvent, RumScope, ScopeEnv, ScopeOutput};
use crate::telemetry::{TelemetryEventHandler, TelemetryOutcome};

/// Owns the scope tree and turns raw events into written records.
///
/// Single-threaded by construction: the monitor's worker task is the only
/// caller. Write outcomes are fed back as acknowledgements so views can
/// keep their counters and know when they are complete.
pub struct RumProcessor {
    app: ApplicationScope,
    env: ScopeEnv,
    telemetry: TelemetryEventHandler,
    writer: Arc<dyn DataWriter<RumEvent>>,
    mapper: Option<Arc<dyn EventMapper>>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl RumProcessor {
    pub fn new(
        env: ScopeEnv,
        telemetry: TelemetryEventHandler,
        writer: Arc<dyn DataWriter<RumEvent>>,
    ) -> Self {
        Self {
            app: ApplicationScope::new(env.config.application_id.clone()),
            env,
            telemetry,
            writer,
            mapper: None,
            metrics: None,
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn EventMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn application(&self) -> &ApplicationScope {
        &self.app
    }

    pub fn env(&self) -> &ScopeEnv {
        &self.env
    }

    /// How long the worker may stay idle before it injects a keep-alive.
    /// Shorter while an action is waiting on its inactivity threshold.
    pub fn idle_timeout(&self) -> Duration {
        if self.app.has_active_action() {
            self.env.config.action_inactivity + Duration::from_millis(10)
        } else {
            self.env.config.keep_alive
        }
    }

    pub fn process(&mut self, event: RawEvent) {
        match &event.kind {
            RawEventKind::SendTelemetry { .. } => {
                let ctx = self.app.current_context();
                let outcome = self.telemetry.handle_event(&event, &ctx, self.writer.as_ref());
                if outcome == TelemetryOutcome::Written {
                    self.record(RUM_EVENTS_WRITTEN, &[("type", "telemetry")]);
                }
                return;
            }
            RawEventKind::AddLongTask { duration_ns, .. } => {
                let threshold = duration_to_nanos(self.env.config.long_task_threshold);
                if !self.env.config.track_long_tasks || *duration_ns < threshold {
                    return;
                }
            }
            _ => {}
        }

        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let mut out = ScopeOutput::default();
            self.app
                .handle_event(&event, &RumContext::default(), &self.env, &mut out);
            for _ in out.started_sessions.drain(..) {
                self.telemetry.on_session_started();
            }
            for emitted in out.take_events() {
                if let Some(ack) = self.write(emitted) {
                    queue.push_back(RawEvent::at(event.time, ack));
                }
            }
        }
    }

    /// Write one event and return the acknowledgement its view expects.
    fn write(&self, emitted: EmittedEvent) -> Option<RawEventKind> {
        let sent = ack_for(&emitted.event, true);
        let dropped = ack_for(&emitted.event, false);
        let event_type = emitted.event.type_name();

        if !emitted.tracked {
            self.record(RUM_EVENTS_DROPPED, &[("type", event_type), ("reason", "untracked")]);
            return dropped;
        }

        let event = match &self.mapper {
            Some(m) => match mapper::apply(m.as_ref(), emitted.event) {
                Some(event) => event,
                None => {
                    tracing::debug!(event_type, "event discarded by mapper");
                    self.record(RUM_EVENTS_DROPPED, &[("type", event_type), ("reason", "mapper")]);
                    return dropped;
                }
            },
            None => emitted.event,
        };

        if self.writer.write(&event) {
            self.record(RUM_EVENTS_WRITTEN, &[("type", event_type)]);
            sent
        } else {
            tracing::warn!(event_type, "event could not be written");
            self.record(RUM_EVENTS_DROPPED, &[("type", event_type), ("reason", "writer")]);
            dropped
        }
    }

    fn record(&self, name: &str, labels: &[(&str, &str)]) {
        if let Some(metrics) = &self.metrics {
            metrics.incr(name, labels, 1);
        }
    }
}

fn ack_for(event: &RumEvent, sent: bool) -> Option<RawEventKind> {
    let view_id = ViewId::from_raw(event.view_id()?);
    let kind = match (event, sent) {
        (RumEvent::Action(_), true) => RawEventKind::ActionSent { view_id },
        (RumEvent::Action(_), false) => RawEventKind::ActionDropped { view_id },
        (RumEvent::Resource(_), true) => RawEventKind::ResourceSent { view_id },
        (RumEvent::Resource(_), false) => RawEventKind::ResourceDropped { view_id },
        (RumEvent::Error(_), true) => RawEventKind::ErrorSent { view_id },
        (RumEvent::Error(_), false) => RawEventKind::ErrorDropped { view_id },
        (RumEvent::LongTask(e), true) => RawEventKind::LongTaskSent {
            view_id,
            is_frozen_frame: e.long_task.is_frozen_frame,
        },
        (RumEvent::LongTask(e), false) => RawEventKind::LongTaskDropped {
            view_id,
            is_frozen_frame: e.long_task.is_frozen_frame,
        },
        _ => return None,
    };
    Some(kind)
}
