//! The RUM scope tree.
//!
//! `ApplicationScope` owns sessions, a `SessionScope` owns views, and a
//! `ViewScope` owns at most one action plus any number of in-flight
//! resources. Every raw event enters at the root and is routed down; each
//! scope answers with a [`Transition`] telling its parent whether to keep,
//! replace or discard it. Finalized events are collected in a
//! [`ScopeOutput`] that the monitor drains after each event.

mod action;
mod application;
mod resource;
mod session;
mod view;

use std::sync::Arc;

use pulse_core::context::{GlobalState, RumContext};
use pulse_core::events::{DdMeta, EventCommon, IdRef, SessionRef, ViewRef};
use pulse_core::ids::SessionId;
use pulse_core::sampling::Sampler;
use pulse_core::time::{duration_to_nanos, Time, TimeProvider};
use pulse_core::{Attributes, RawEvent, RumEvent};

use crate::config::RumConfig;

pub use action::ActionScope;
pub use application::ApplicationScope;
pub use resource::ResourceScope;
pub use session::{SessionScope, SessionState};
pub use view::ViewScope;

/// What a parent does with a child after the child handled an event.
#[derive(Debug)]
pub enum Transition<S> {
    /// Keep the child as is.
    Continue,
    /// Swap in a successor; the parent decides what happens to the old one.
    Replace(S),
    /// The child is complete and must be dropped.
    Terminate,
}

impl<S> Transition<S> {
    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }
}

pub trait RumScope: Sized {
    fn handle_event(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) -> Transition<Self>;

    /// Identity this scope exposes to its children, derived from the
    /// parent's context on every call.
    fn context(&self, parent: &RumContext) -> RumContext;

    fn is_active(&self) -> bool;
}

/// Read-only environment shared by every scope in the tree.
pub struct ScopeEnv {
    pub config: RumConfig,
    pub globals: Arc<GlobalState>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub session_sampler: Arc<dyn Sampler>,
}

impl ScopeEnv {
    pub fn new(
        config: RumConfig,
        globals: Arc<GlobalState>,
        time_provider: Arc<dyn TimeProvider>,
        session_sampler: Arc<dyn Sampler>,
    ) -> Self {
        Self {
            config,
            globals,
            time_provider,
            session_sampler,
        }
    }

    pub(crate) fn nanos(&self, d: std::time::Duration) -> i64 {
        duration_to_nanos(d)
    }

    /// Wall-clock date of `time` corrected to the intake's clock.
    pub(crate) fn server_date(&self, time: &Time) -> i64 {
        time.timestamp_ms + self.time_provider.server_offset_ms()
    }

    /// Common envelope for an event emitted under `ctx`.
    pub(crate) fn common(&self, ctx: &RumContext, time: &Time, local: &Attributes) -> EventCommon {
        let user = self.globals.user();
        let attributes = self.globals.merged_attributes(local);
        EventCommon {
            date: self.server_date(time),
            application: IdRef::new(ctx.application_id.as_str()),
            service: self.config.service.clone(),
            version: self.config.version.clone(),
            session: SessionRef {
                id: ctx
                    .session_id
                    .as_ref()
                    .map(|s| s.as_str().to_owned())
                    .unwrap_or_default(),
                session_type: "user".into(),
                has_replay: false,
            },
            source: self.config.source.clone(),
            usr: (!user.is_empty()).then_some(user),
            connectivity: Some(self.globals.network()),
            os: Some(self.globals.os().clone()),
            device: Some(self.globals.device().clone()),
            context: (!attributes.is_empty()).then_some(attributes),
            dd: DdMeta::current(),
        }
    }

    pub(crate) fn view_ref(ctx: &RumContext) -> ViewRef {
        ViewRef {
            id: ctx
                .view_id
                .as_ref()
                .map(|v| v.as_str().to_owned())
                .unwrap_or_default(),
            name: ctx.view_name.clone(),
            url: ctx.view_url.clone().unwrap_or_default(),
        }
    }
}

/// An event finalized by a scope. `tracked` is false when the owning
/// session is sampled out or expired; such events are acknowledged as
/// dropped without reaching storage.
#[derive(Clone, Debug)]
pub struct EmittedEvent {
    pub event: RumEvent,
    pub tracked: bool,
}

#[derive(Debug, Default)]
pub struct ScopeOutput {
    pub events: Vec<EmittedEvent>,
    pub started_sessions: Vec<SessionId>,
}

impl ScopeOutput {
    pub(crate) fn emit(&mut self, event: RumEvent) {
        self.events.push(EmittedEvent {
            event,
            tracked: true,
        });
    }

    pub fn take_events(&mut self) -> Vec<EmittedEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use pulse_core::context::GlobalState;
    use pulse_core::ids::{ResourceKey, ViewKey};
    use pulse_core::raw::{ActionType, ErrorSource, ResourceKind};
    use pulse_core::sampling::ConstantSampler;
    use pulse_core::time::{FixedTimeProvider, Time};
    use pulse_core::{Attributes, RawEvent, RawEventKind};

    use super::ScopeEnv;
    use crate::config::RumConfig;

    pub fn env() -> ScopeEnv {
        env_with(RumConfig::default(), true)
    }

    pub fn env_with(config: RumConfig, sampled: bool) -> ScopeEnv {
        ScopeEnv::new(
            config,
            GlobalState::new(),
            Arc::new(FixedTimeProvider(0)),
            Arc::new(ConstantSampler(sampled)),
        )
    }

    /// Deterministic clock for driving scopes by hand.
    pub struct Clock {
        now: Time,
    }

    impl Clock {
        pub fn new() -> Self {
            Self {
                now: Time::from_parts(1_700_000_000_000, 1_000_000_000),
            }
        }

        pub fn advance(&mut self, d: Duration) {
            self.now = self.now.plus(d);
        }

        pub fn now(&self) -> Time {
            self.now
        }

        pub fn at(&self, kind: RawEventKind) -> RawEvent {
            RawEvent::at(self.now, kind)
        }
    }

    pub fn start_view(key: &str) -> RawEventKind {
        RawEventKind::StartView {
            key: ViewKey::from(key),
            name: key.to_uppercase(),
            url: format!("app/{key}"),
            attributes: Attributes::new(),
        }
    }

    pub fn stop_view(key: &str) -> RawEventKind {
        RawEventKind::StopView {
            key: ViewKey::from(key),
            attributes: Attributes::new(),
        }
    }

    pub fn start_action(action_type: ActionType, wait_for_stop: bool) -> RawEventKind {
        RawEventKind::StartAction {
            action_type,
            name: "checkout".into(),
            wait_for_stop,
            attributes: Attributes::new(),
        }
    }

    pub fn stop_action() -> RawEventKind {
        RawEventKind::StopAction {
            action_type: None,
            name: None,
            attributes: Attributes::new(),
        }
    }

    pub fn start_resource(key: &str) -> RawEventKind {
        RawEventKind::StartResource {
            key: ResourceKey::from(key),
            url: format!("https://api.test/{key}"),
            method: "GET".into(),
            attributes: Attributes::new(),
        }
    }

    pub fn stop_resource(key: &str) -> RawEventKind {
        RawEventKind::StopResource {
            key: ResourceKey::from(key),
            status_code: Some(200),
            size: Some(512),
            kind: ResourceKind::Fetch,
            attributes: Attributes::new(),
        }
    }

    pub fn stop_resource_with_error(key: &str) -> RawEventKind {
        RawEventKind::StopResourceWithError {
            key: ResourceKey::from(key),
            status_code: Some(500),
            message: "upstream failed".into(),
            source: ErrorSource::Network,
            error_type: None,
            attributes: Attributes::new(),
        }
    }

    pub fn stop_resource_with_stack_trace(key: &str) -> RawEventKind {
        RawEventKind::StopResourceWithStackTrace {
            key: ResourceKey::from(key),
            status_code: None,
            message: "connection reset".into(),
            source: ErrorSource::Network,
            stack_trace: "at fetch()".into(),
            error_type: Some("IoError".into()),
            attributes: Attributes::new(),
        }
    }

    pub fn add_error(is_fatal: bool) -> RawEventKind {
        RawEventKind::AddError {
            message: "boom".into(),
            source: ErrorSource::Source,
            stack_trace: None,
            error_type: None,
            is_fatal,
            attributes: Attributes::new(),
        }
    }
}
