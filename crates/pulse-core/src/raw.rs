use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::ids::{ResourceKey, ViewId, ViewKey};
use crate::time::Time;

/// One instrumentation signal, stamped when it was produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEvent {
    pub time: Time,
    pub kind: RawEventKind,
}

impl RawEvent {
    pub fn new(kind: RawEventKind) -> Self {
        Self {
            time: Time::now(),
            kind,
        }
    }

    pub fn at(time: Time, kind: RawEventKind) -> Self {
        Self { time, kind }
    }

    /// Events that count as user interaction for session renewal.
    pub fn is_interaction(&self) -> bool {
        matches!(
            self.kind,
            RawEventKind::StartView { .. } | RawEventKind::StartAction { .. }
        )
    }

    /// Events allowed to open a background view when no view is active.
    pub fn can_start_background_view(&self) -> bool {
        matches!(
            self.kind,
            RawEventKind::StartAction { .. }
                | RawEventKind::AddError { .. }
                | RawEventKind::StartResource { .. }
        )
    }

    /// Acknowledgements of previously written events.
    pub fn is_ack(&self) -> bool {
        matches!(
            self.kind,
            RawEventKind::ActionSent { .. }
                | RawEventKind::ActionDropped { .. }
                | RawEventKind::ResourceSent { .. }
                | RawEventKind::ResourceDropped { .. }
                | RawEventKind::ErrorSent { .. }
                | RawEventKind::ErrorDropped { .. }
                | RawEventKind::LongTaskSent { .. }
                | RawEventKind::LongTaskDropped { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawEventKind {
    StartView {
        key: ViewKey,
        name: String,
        url: String,
        attributes: Attributes,
    },
    StopView {
        key: ViewKey,
        attributes: Attributes,
    },
    StartAction {
        action_type: ActionType,
        name: String,
        wait_for_stop: bool,
        attributes: Attributes,
    },
    StopAction {
        action_type: Option<ActionType>,
        name: Option<String>,
        attributes: Attributes,
    },
    SendCustomActionNow,
    StartResource {
        key: ResourceKey,
        url: String,
        method: String,
        attributes: Attributes,
    },
    StopResource {
        key: ResourceKey,
        status_code: Option<i64>,
        size: Option<i64>,
        kind: ResourceKind,
        attributes: Attributes,
    },
    StopResourceWithError {
        key: ResourceKey,
        status_code: Option<i64>,
        message: String,
        source: ErrorSource,
        error_type: Option<String>,
        attributes: Attributes,
    },
    StopResourceWithStackTrace {
        key: ResourceKey,
        status_code: Option<i64>,
        message: String,
        source: ErrorSource,
        stack_trace: String,
        error_type: Option<String>,
        attributes: Attributes,
    },
    AddError {
        message: String,
        source: ErrorSource,
        stack_trace: Option<String>,
        error_type: Option<String>,
        is_fatal: bool,
        attributes: Attributes,
    },
    AddLongTask {
        duration_ns: i64,
        target: String,
    },
    AddViewTiming {
        name: String,
    },
    ApplicationStarted {
        /// Nanoseconds between process start and the first view.
        startup_ns: i64,
    },
    ResetSession,
    KeepAlive,
    SendTelemetry {
        telemetry_type: TelemetryType,
        message: String,
        stack: Option<String>,
        kind: Option<String>,
        configuration: Option<CoreConfiguration>,
    },
    ActionSent {
        view_id: ViewId,
    },
    ActionDropped {
        view_id: ViewId,
    },
    ResourceSent {
        view_id: ViewId,
    },
    ResourceDropped {
        view_id: ViewId,
    },
    ErrorSent {
        view_id: ViewId,
    },
    ErrorDropped {
        view_id: ViewId,
    },
    LongTaskSent {
        view_id: ViewId,
        is_frozen_frame: bool,
    },
    LongTaskDropped {
        view_id: ViewId,
        is_frozen_frame: bool,
    },
}

impl RawEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartView { .. } => "start_view",
            Self::StopView { .. } => "stop_view",
            Self::StartAction { .. } => "start_action",
            Self::StopAction { .. } => "stop_action",
            Self::SendCustomActionNow => "send_custom_action_now",
            Self::StartResource { .. } => "start_resource",
            Self::StopResource { .. } => "stop_resource",
            Self::StopResourceWithError { .. } => "stop_resource_with_error",
            Self::StopResourceWithStackTrace { .. } => "stop_resource_with_stack_trace",
            Self::AddError { .. } => "add_error",
            Self::AddLongTask { .. } => "add_long_task",
            Self::AddViewTiming { .. } => "add_view_timing",
            Self::ApplicationStarted { .. } => "application_started",
            Self::ResetSession => "reset_session",
            Self::KeepAlive => "keep_alive",
            Self::SendTelemetry { .. } => "send_telemetry",
            Self::ActionSent { .. } => "action_sent",
            Self::ActionDropped { .. } => "action_dropped",
            Self::ResourceSent { .. } => "resource_sent",
            Self::ResourceDropped { .. } => "resource_dropped",
            Self::ErrorSent { .. } => "error_sent",
            Self::ErrorDropped { .. } => "error_dropped",
            Self::LongTaskSent { .. } => "long_task_sent",
            Self::LongTaskDropped { .. } => "long_task_dropped",
        }
    }

    /// Resource key carried by resource stop events.
    pub fn stopped_resource_key(&self) -> Option<&ResourceKey> {
        match self {
            Self::StopResource { key, .. }
            | Self::StopResourceWithError { key, .. }
            | Self::StopResourceWithStackTrace { key, .. } => Some(key),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Tap,
    Scroll,
    Swipe,
    Click,
    Back,
    Custom,
    ApplicationStart,
}

impl ActionType {
    /// Only taps can carry an error-tap frustration.
    pub fn is_tap_like(&self) -> bool {
        matches!(self, Self::Tap)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Xhr,
    Fetch,
    Document,
    Image,
    Js,
    Font,
    Css,
    Media,
    Native,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Network,
    Source,
    Console,
    Logger,
    Agent,
    Webview,
    Custom,
    Report,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryType {
    Debug,
    Error,
    Configuration,
    InterceptorSetup,
}

/// SDK configuration reported by telemetry configuration events.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfiguration {
    pub use_proxy: bool,
    pub use_local_encryption: bool,
    pub track_errors: bool,
    pub batch_size: i64,
    pub batch_upload_frequency: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_action() -> RawEvent {
        RawEvent::new(RawEventKind::StartAction {
            action_type: ActionType::Tap,
            name: "buy".into(),
            wait_for_stop: false,
            attributes: Attributes::new(),
        })
    }

    #[test]
    fn interaction_classification() {
        assert!(start_action().is_interaction());
        assert!(!RawEvent::new(RawEventKind::KeepAlive).is_interaction());
    }

    #[test]
    fn background_view_triggers() {
        assert!(start_action().can_start_background_view());
        assert!(!RawEvent::new(RawEventKind::AddLongTask {
            duration_ns: 1,
            target: String::new()
        })
        .can_start_background_view());
    }

    #[test]
    fn acks_are_recognised() {
        let ack = RawEvent::new(RawEventKind::LongTaskSent {
            view_id: ViewId::new(),
            is_frozen_frame: true,
        });
        assert!(ack.is_ack());
        assert_eq!(ack.name(), "long_task_sent");
    }

    #[test]
    fn stop_events_expose_key() {
        let kind = RawEventKind::StopResourceWithError {
            key: ResourceKey::from("k"),
            status_code: Some(500),
            message: "boom".into(),
            source: ErrorSource::Network,
            error_type: None,
            attributes: Attributes::new(),
        };
        assert_eq!(kind.stopped_resource_key(), Some(&ResourceKey::from("k")));
        assert!(RawEventKind::KeepAlive.stopped_resource_key().is_none());
    }

    #[test]
    fn action_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ActionType::ApplicationStart).unwrap(),
            r#""application_start""#
        );
        assert!(ActionType::Tap.is_tap_like());
        assert!(!ActionType::Scroll.is_tap_like());
        assert!(!ActionType::Click.is_tap_like());
    }
}
