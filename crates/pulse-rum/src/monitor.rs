//! Public RUM API.
//!
//! Every call stamps a raw event and hands it to a single worker task over
//! an unbounded channel, so host threads never block and events are
//! processed strictly in call order.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::context::{GlobalState, UserInfo};
use pulse_core::ids::{ResourceKey, ViewKey};
use pulse_core::raw::{ActionType, CoreConfiguration, ErrorSource, ResourceKind, TelemetryType};
use pulse_core::time::duration_to_nanos;
use pulse_core::{Attributes, RawEvent, RawEventKind};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::errors::{Result, RumError};
use crate::processor::RumProcessor;

enum MonitorCommand {
    Event(RawEvent),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// An error reported by the host application.
#[derive(Clone, Debug)]
pub struct ErrorReport {
    pub message: String,
    pub source: ErrorSource,
    pub stack_trace: Option<String>,
    pub error_type: Option<String>,
    pub is_fatal: bool,
    pub attributes: Attributes,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>, source: ErrorSource) -> Self {
        Self {
            message: message.into(),
            source,
            stack_trace: None,
            error_type: None,
            is_fatal: false,
            attributes: Attributes::new(),
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn fatal(mut self) -> Self {
        self.is_fatal = true;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// How a resource load failed.
#[derive(Clone, Debug)]
pub struct ResourceFailure {
    pub status_code: Option<i64>,
    pub message: String,
    pub source: ErrorSource,
    pub stack_trace: Option<String>,
    pub error_type: Option<String>,
}

pub struct RumMonitor {
    tx: mpsc::UnboundedSender<MonitorCommand>,
    worker_handle: JoinHandle<()>,
    globals: Arc<GlobalState>,
}

impl RumMonitor {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(processor: RumProcessor) -> Self {
        let globals = processor.env().globals.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker_handle = tokio::spawn(monitor_worker(rx, processor));
        Self {
            tx,
            worker_handle,
            globals,
        }
    }

    fn send(&self, kind: RawEventKind) {
        let event = RawEvent::new(kind);
        if self.tx.send(MonitorCommand::Event(event)).is_err() {
            tracing::debug!("rum monitor stopped, event discarded");
        }
    }

    pub fn start_view(&self, key: impl Into<ViewKey>, name: impl Into<String>, attributes: Attributes) {
        let key = key.into();
        let url = key.as_str().to_owned();
        self.send(RawEventKind::StartView {
            key,
            name: name.into(),
            url,
            attributes,
        });
    }

    pub fn stop_view(&self, key: impl Into<ViewKey>, attributes: Attributes) {
        self.send(RawEventKind::StopView {
            key: key.into(),
            attributes,
        });
    }

    /// Record an instantaneous action.
    pub fn add_action(&self, action_type: ActionType, name: impl Into<String>, attributes: Attributes) {
        self.send(RawEventKind::StartAction {
            action_type,
            name: name.into(),
            wait_for_stop: false,
            attributes,
        });
    }

    /// Start a continuous action that lasts until [`Self::stop_action`].
    pub fn start_action(&self, action_type: ActionType, name: impl Into<String>, attributes: Attributes) {
        self.send(RawEventKind::StartAction {
            action_type,
            name: name.into(),
            wait_for_stop: true,
            attributes,
        });
    }

    pub fn stop_action(
        &self,
        action_type: Option<ActionType>,
        name: Option<String>,
        attributes: Attributes,
    ) {
        self.send(RawEventKind::StopAction {
            action_type,
            name,
            attributes,
        });
    }

    pub fn start_resource(
        &self,
        key: impl Into<ResourceKey>,
        method: impl Into<String>,
        url: impl Into<String>,
        attributes: Attributes,
    ) {
        self.send(RawEventKind::StartResource {
            key: key.into(),
            url: url.into(),
            method: method.into(),
            attributes,
        });
    }

    pub fn stop_resource(
        &self,
        key: impl Into<ResourceKey>,
        status_code: Option<i64>,
        size: Option<i64>,
        kind: ResourceKind,
        attributes: Attributes,
    ) {
        self.send(RawEventKind::StopResource {
            key: key.into(),
            status_code,
            size,
            kind,
            attributes,
        });
    }

    pub fn stop_resource_with_error(
        &self,
        key: impl Into<ResourceKey>,
        failure: ResourceFailure,
        attributes: Attributes,
    ) {
        let key = key.into();
        let kind = match failure.stack_trace {
            Some(stack_trace) => RawEventKind::StopResourceWithStackTrace {
                key,
                status_code: failure.status_code,
                message: failure.message,
                source: failure.source,
                stack_trace,
                error_type: failure.error_type,
                attributes,
            },
            None => RawEventKind::StopResourceWithError {
                key,
                status_code: failure.status_code,
                message: failure.message,
                source: failure.source,
                error_type: failure.error_type,
                attributes,
            },
        };
        self.send(kind);
    }

    pub fn add_error(&self, report: ErrorReport) {
        self.send(RawEventKind::AddError {
            message: report.message,
            source: report.source,
            stack_trace: report.stack_trace,
            error_type: report.error_type,
            is_fatal: report.is_fatal,
            attributes: report.attributes,
        });
    }

    pub fn add_long_task(&self, duration: Duration, target: impl Into<String>) {
        self.send(RawEventKind::AddLongTask {
            duration_ns: duration_to_nanos(duration),
            target: target.into(),
        });
    }

    /// Record a named timing relative to the active view's start.
    pub fn add_timing(&self, name: impl Into<String>) {
        self.send(RawEventKind::AddViewTiming { name: name.into() });
    }

    pub fn reset_session(&self) {
        self.send(RawEventKind::ResetSession);
    }

    pub fn send_debug_telemetry(&self, message: impl Into<String>) {
        self.send(RawEventKind::SendTelemetry {
            telemetry_type: TelemetryType::Debug,
            message: message.into(),
            stack: None,
            kind: None,
            configuration: None,
        });
    }

    pub fn send_error_telemetry(
        &self,
        message: impl Into<String>,
        stack: Option<String>,
        kind: Option<String>,
    ) {
        self.send(RawEventKind::SendTelemetry {
            telemetry_type: TelemetryType::Error,
            message: message.into(),
            stack,
            kind,
            configuration: None,
        });
    }

    pub fn send_configuration_telemetry(&self, configuration: CoreConfiguration) {
        self.send(RawEventKind::SendTelemetry {
            telemetry_type: TelemetryType::Configuration,
            message: String::new(),
            stack: None,
            kind: None,
            configuration: Some(configuration),
        });
    }

    pub fn notify_interceptor_setup(&self) {
        self.send(RawEventKind::SendTelemetry {
            telemetry_type: TelemetryType::InterceptorSetup,
            message: String::new(),
            stack: None,
            kind: None,
            configuration: None,
        });
    }

    pub fn add_attribute(&self, key: impl Into<String>, value: Value) {
        self.globals.add_attribute(key, value);
    }

    pub fn remove_attribute(&self, key: &str) {
        self.globals.remove_attribute(key);
    }

    pub fn set_user(&self, user: UserInfo) {
        self.globals.set_user(user);
    }

    pub fn globals(&self) -> &Arc<GlobalState> {
        &self.globals
    }

    fn closed_error(&self) -> RumError {
        if self.worker_handle.is_finished() {
            RumError::WorkerExited
        } else {
            RumError::MonitorClosed
        }
    }

    /// Wait until every event sent before this call has been processed.
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MonitorCommand::Flush(reply_tx))
            .map_err(|_| self.closed_error())?;
        reply_rx.await.map_err(|_| self.closed_error())
    }

    /// Process what is queued, then stop the worker. Later calls are
    /// discarded.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MonitorCommand::Shutdown(reply_tx))
            .map_err(|_| self.closed_error())?;
        reply_rx.await.map_err(|_| self.closed_error())
    }
}

async fn monitor_worker(mut rx: mpsc::UnboundedReceiver<MonitorCommand>, mut processor: RumProcessor) {
    loop {
        let idle = processor.idle_timeout();
        let command = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(_) => {
                processor.process(RawEvent::new(RawEventKind::KeepAlive));
                continue;
            }
        };
        match command {
            MonitorCommand::Event(event) => processor.process(event),
            MonitorCommand::Flush(reply) => {
                let _ = reply.send(());
            }
            MonitorCommand::Shutdown(reply) => {
                rx.close();
                let _ = reply.send(());
                break;
            }
        }
    }
    tracing::debug!("rum monitor worker stopped");
}
