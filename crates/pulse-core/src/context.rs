use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::attributes::{self, Attributes};
use crate::ids::{ActionId, ApplicationId, SessionId, ViewId};

/// Identity snapshot handed from a parent scope to its children while an
/// event is being handled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RumContext {
    pub application_id: ApplicationId,
    pub session_id: Option<SessionId>,
    pub view_id: Option<ViewId>,
    pub view_name: Option<String>,
    pub view_url: Option<String>,
    pub action_id: Option<ActionId>,
}

impl RumContext {
    pub fn for_application(application_id: ApplicationId) -> Self {
        Self {
            application_id,
            session_id: None,
            view_id: None,
            view_name: None,
            view_url: None,
            action_id: None,
        }
    }

    pub fn with_session(&self, session_id: SessionId) -> Self {
        Self {
            application_id: self.application_id.clone(),
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    pub fn with_view(&self, view_id: ViewId, name: &str, url: &str) -> Self {
        Self {
            view_id: Some(view_id),
            view_name: Some(name.to_owned()),
            view_url: Some(url.to_owned()),
            action_id: None,
            ..self.clone()
        }
    }

    pub fn with_action(&self, action_id: Option<ActionId>) -> Self {
        Self {
            action_id,
            ..self.clone()
        }
    }
}

/// Current end user as set by the host application.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten, default)]
    pub extra: Attributes,
}

impl UserInfo {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none() && self.email.is_none() && self.extra.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Connected,
    NotConnected,
    #[default]
    Maybe,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub status: ConnectivityStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carrier_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    pub model: String,
    pub brand: String,
    pub architecture: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_type: "desktop".into(),
            name: std::env::consts::OS.into(),
            model: "unknown".into(),
            brand: "unknown".into(),
            architecture: std::env::consts::ARCH.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub version: String,
    pub version_major: String,
}

impl Default for OsInfo {
    fn default() -> Self {
        Self {
            name: std::env::consts::OS.into(),
            version: "unknown".into(),
            version_major: "unknown".into(),
        }
    }
}

/// Process-wide state that scopes read when building events. Owned by the
/// SDK handle and shared by `Arc`; every accessor is a snapshot read.
#[derive(Debug, Default)]
pub struct GlobalState {
    attributes: RwLock<Attributes>,
    user: RwLock<UserInfo>,
    network: RwLock<NetworkInfo>,
    device: DeviceInfo,
    os: OsInfo,
    tracer_registered: AtomicBool,
    interceptor_configured: AtomicBool,
}

impl GlobalState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_attribute(&self, key: impl Into<String>, value: serde_json::Value) {
        self.attributes.write().insert(key.into(), value);
    }

    pub fn remove_attribute(&self, key: &str) {
        self.attributes.write().remove(key);
    }

    pub fn attributes(&self) -> Attributes {
        self.attributes.read().clone()
    }

    /// Global attributes overridden by the event's own.
    pub fn merged_attributes(&self, local: &Attributes) -> Attributes {
        attributes::merge(&self.attributes.read(), local)
    }

    pub fn set_user(&self, user: UserInfo) {
        *self.user.write() = user;
    }

    pub fn user(&self) -> UserInfo {
        self.user.read().clone()
    }

    pub fn set_network(&self, network: NetworkInfo) {
        *self.network.write() = network;
    }

    pub fn network(&self) -> NetworkInfo {
        self.network.read().clone()
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn os(&self) -> &OsInfo {
        &self.os
    }

    pub fn set_tracer_registered(&self, registered: bool) {
        self.tracer_registered.store(registered, Ordering::Relaxed);
    }

    pub fn tracer_registered(&self) -> bool {
        self.tracer_registered.load(Ordering::Relaxed)
    }

    pub fn set_interceptor_configured(&self, configured: bool) {
        self.interceptor_configured.store(configured, Ordering::Relaxed);
    }

    pub fn interceptor_configured(&self) -> bool {
        self.interceptor_configured.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn view_context_keeps_session() {
        let app = RumContext::for_application(ApplicationId::from_raw("app"));
        let session = SessionId::new();
        let view = ViewId::new();
        let ctx = app.with_session(session.clone()).with_view(view.clone(), "Home", "app/home");
        assert_eq!(ctx.session_id, Some(session));
        assert_eq!(ctx.view_id, Some(view));
        assert_eq!(ctx.view_name.as_deref(), Some("Home"));
        assert!(ctx.action_id.is_none());
    }

    #[test]
    fn new_session_clears_view() {
        let app = RumContext::for_application(ApplicationId::from_raw("app"));
        let ctx = app.with_session(SessionId::new()).with_view(ViewId::new(), "A", "a");
        let renewed = ctx.with_session(SessionId::new());
        assert!(renewed.view_id.is_none());
        assert_eq!(renewed.application_id.as_str(), "app");
    }

    #[test]
    fn local_attributes_override_globals() {
        let state = GlobalState::new();
        state.add_attribute("env", json!("prod"));
        state.add_attribute("shared", json!(1));
        let mut local = Attributes::new();
        local.insert("shared".into(), json!(2));
        let merged = state.merged_attributes(&local);
        assert_eq!(merged["env"], json!("prod"));
        assert_eq!(merged["shared"], json!(2));
    }

    #[test]
    fn ambient_flags_default_off() {
        let state = GlobalState::new();
        assert!(!state.tracer_registered());
        state.set_interceptor_configured(true);
        assert!(state.interceptor_configured());
    }

    #[test]
    fn empty_user_serializes_compactly() {
        let user = UserInfo::default();
        assert!(user.is_empty());
        assert_eq!(serde_json::to_value(&user).unwrap(), json!({}));
    }
}
