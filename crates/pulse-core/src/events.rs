//! Finalized RUM and telemetry records as they are written to storage.
//!
//! Field names follow the intake's snake_case JSON layout. The `type`
//! discriminator is not part of these structs; the codec adds it on
//! serialization and dispatches on it when reading back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attributes::Attributes;
use crate::context::{DeviceInfo, NetworkInfo, OsInfo, UserInfo};
use crate::raw::{ActionType, ErrorSource, ResourceKind};

pub const FORMAT_VERSION: u8 = 2;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: String,
}

impl IdRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: String,
    #[serde(rename = "type")]
    pub session_type: String,
    #[serde(default)]
    pub has_replay: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DdMeta {
    pub format_version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_version: Option<u64>,
}

impl DdMeta {
    pub fn current() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            document_version: None,
        }
    }
}

/// Fields shared by every RUM event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventCommon {
    pub date: i64,
    pub application: IdRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub session: SessionRef,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usr: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<NetworkInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<OsInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Attributes>,
    #[serde(rename = "_dd")]
    pub dd: DdMeta,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Count {
    pub count: i64,
}

impl Count {
    pub fn of(count: i64) -> Self {
        Self { count }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrustrationType {
    ErrorTap,
    RageTap,
    DeadClick,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frustration {
    #[serde(rename = "type")]
    pub types: Vec<FrustrationType>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionTarget {
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target: ActionTarget,
    /// Nanoseconds.
    pub loading_time: i64,
    pub error: Count,
    pub crash: Count,
    pub long_task: Count,
    pub resource: Count,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frustration: Option<Frustration>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub view: ViewRef,
    pub action: ActionData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceData {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    /// Nanoseconds.
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub view: ViewRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<IdRef>,
    pub resource: ResourceData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorResource {
    pub method: String,
    pub status_code: i64,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub id: String,
    pub message: String,
    pub source: ErrorSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub is_crash: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ErrorResource>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub view: ViewRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<IdRef>,
    pub error: ErrorData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LongTaskData {
    pub id: String,
    /// Nanoseconds.
    pub duration: i64,
    pub is_frozen_frame: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LongTaskEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub view: ViewRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<IdRef>,
    pub long_task: LongTaskData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewData {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub url: String,
    /// Nanoseconds since the view started.
    pub time_spent: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_time: Option<i64>,
    pub action: Count,
    pub resource: Count,
    pub error: Count,
    pub crash: Count,
    pub long_task: Count,
    pub frozen_frame: Count,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_timings: BTreeMap<String, i64>,
    pub is_active: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewEvent {
    #[serde(flatten)]
    pub common: EventCommon,
    pub view: ViewData,
}

/// Fields shared by telemetry events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryCommon {
    pub date: i64,
    pub service: String,
    pub source: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<IdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<IdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<IdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<IdRef>,
    #[serde(rename = "_dd")]
    pub dd: DdMeta,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugStatus {
    #[serde(rename = "debug")]
    Debug,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorStatus {
    #[serde(rename = "error")]
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryDebugData {
    pub message: String,
    pub status: DebugStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryErrorData {
    pub message: String,
    pub status: ErrorStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TelemetryErrorDetails>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationMarker {
    #[serde(rename = "configuration")]
    Configuration,
}

/// Snapshot of the SDK configuration sent once per session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfiguration {
    pub session_sample_rate: i64,
    pub telemetry_sample_rate: i64,
    pub use_proxy: bool,
    pub use_local_encryption: bool,
    pub track_errors: bool,
    pub track_long_task: bool,
    pub track_frustrations: bool,
    pub track_background_events: bool,
    pub track_network_requests: bool,
    pub use_tracing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_tracking_strategy: Option<String>,
    pub batch_size: i64,
    pub batch_upload_frequency: i64,
    pub mobile_vitals_update_period: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfigurationData {
    #[serde(rename = "type")]
    pub marker: ConfigurationMarker,
    pub configuration: TelemetryConfiguration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryDebugEvent {
    #[serde(flatten)]
    pub common: TelemetryCommon,
    pub telemetry: TelemetryDebugData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryErrorEvent {
    #[serde(flatten)]
    pub common: TelemetryCommon,
    pub telemetry: TelemetryErrorData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfigurationEvent {
    #[serde(flatten)]
    pub common: TelemetryCommon,
    pub telemetry: TelemetryConfigurationData,
}

/// Any event the RUM feature writes.
#[derive(Clone, Debug, PartialEq)]
pub enum RumEvent {
    View(ViewEvent),
    Action(ActionEvent),
    Resource(ResourceEvent),
    Error(ErrorEvent),
    LongTask(LongTaskEvent),
    TelemetryDebug(TelemetryDebugEvent),
    TelemetryError(TelemetryErrorEvent),
    TelemetryConfiguration(TelemetryConfigurationEvent),
}

impl RumEvent {
    /// Value of the `type` discriminator on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::View(_) => "view",
            Self::Action(_) => "action",
            Self::Resource(_) => "resource",
            Self::Error(_) => "error",
            Self::LongTask(_) => "long_task",
            Self::TelemetryDebug(_)
            | Self::TelemetryError(_)
            | Self::TelemetryConfiguration(_) => "telemetry",
        }
    }

    /// View the event belongs to, when it is a RUM event.
    pub fn view_id(&self) -> Option<&str> {
        match self {
            Self::View(e) => Some(&e.view.id),
            Self::Action(e) => Some(&e.view.id),
            Self::Resource(e) => Some(&e.view.id),
            Self::Error(e) => Some(&e.view.id),
            Self::LongTask(e) => Some(&e.view.id),
            _ => None,
        }
    }

    pub fn is_telemetry(&self) -> bool {
        self.type_name() == "telemetry"
    }
}
