use pulse_core::attributes;
use pulse_core::context::RumContext;
use pulse_core::events::{
    ErrorData, ErrorEvent, ErrorResource, IdRef, ResourceData, ResourceEvent,
};
use pulse_core::ids::{ActionId, ErrorId, ResourceId, ResourceKey};
use pulse_core::raw::ErrorSource;
use pulse_core::time::{duration_at_least_one, Time};
use pulse_core::{Attributes, RawEvent, RawEventKind, RumEvent};

use super::{RumScope, ScopeEnv, ScopeOutput, Transition};

/// An in-flight resource load keyed by the caller's resource key.
#[derive(Debug)]
pub struct ResourceScope {
    id: ResourceId,
    key: ResourceKey,
    url: String,
    method: String,
    attributes: Attributes,
    start: Time,
    /// Action that was active when the resource started.
    action_id: Option<ActionId>,
    stopped: bool,
}

impl ResourceScope {
    pub fn from_event(event: &RawEvent, action_id: Option<ActionId>) -> Option<Self> {
        match &event.kind {
            RawEventKind::StartResource {
                key,
                url,
                method,
                attributes,
            } => Some(Self {
                id: ResourceId::new(),
                key: key.clone(),
                url: url.clone(),
                method: method.clone(),
                attributes: attributes.clone(),
                start: event.time,
                action_id,
                stopped: false,
            }),
            _ => None,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Steady-clock reading at start; pairs with the key to identify this
    /// particular load.
    pub fn started_ns(&self) -> i64 {
        self.start.nano_time
    }

    fn action_ref(&self) -> Option<IdRef> {
        self.action_id.as_ref().map(|a| IdRef::new(a.as_str()))
    }

    fn send_resource(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        let RawEventKind::StopResource {
            status_code,
            size,
            kind,
            attributes: extra,
            ..
        } = &event.kind
        else {
            return;
        };
        attributes::extend(&mut self.attributes, extra);
        let ctx = self.context(parent);
        out.emit(RumEvent::Resource(ResourceEvent {
            common: env.common(&ctx, &self.start, &self.attributes),
            view: ScopeEnv::view_ref(&ctx),
            action: self.action_ref(),
            resource: ResourceData {
                id: self.id.as_str().to_owned(),
                kind: *kind,
                url: self.url.clone(),
                method: self.method.clone(),
                status_code: *status_code,
                duration: duration_at_least_one(self.start.nano_time, event.time.nano_time),
                size: *size,
            },
        }));
        self.stopped = true;
    }

    #[allow(clippy::too_many_arguments)]
    fn send_error(
        &mut self,
        event: &RawEvent,
        message: &str,
        source: ErrorSource,
        status_code: Option<i64>,
        stack: Option<String>,
        error_type: Option<String>,
        extra: &Attributes,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        attributes::extend(&mut self.attributes, extra);
        let ctx = self.context(parent);
        out.emit(RumEvent::Error(ErrorEvent {
            common: env.common(&ctx, &event.time, &self.attributes),
            view: ScopeEnv::view_ref(&ctx),
            action: self.action_ref(),
            error: ErrorData {
                id: ErrorId::new().as_str().to_owned(),
                message: message.to_owned(),
                source,
                stack,
                is_crash: false,
                error_type,
                resource: Some(ErrorResource {
                    method: self.method.clone(),
                    status_code: status_code.unwrap_or(0),
                    url: self.url.clone(),
                }),
            },
        }));
        self.stopped = true;
    }
}

impl RumScope for ResourceScope {
    fn handle_event(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) -> Transition<Self> {
        if event.kind.stopped_resource_key() != Some(&self.key) {
            return Transition::Continue;
        }
        match &event.kind {
            RawEventKind::StopResource { .. } => self.send_resource(event, parent, env, out),
            RawEventKind::StopResourceWithError {
                status_code,
                message,
                source,
                error_type,
                attributes,
                ..
            } => self.send_error(
                event,
                message,
                *source,
                *status_code,
                None,
                error_type.clone(),
                attributes,
                parent,
                env,
                out,
            ),
            RawEventKind::StopResourceWithStackTrace {
                status_code,
                message,
                source,
                stack_trace,
                error_type,
                attributes,
                ..
            } => self.send_error(
                event,
                message,
                *source,
                *status_code,
                Some(stack_trace.clone()),
                error_type.clone(),
                attributes,
                parent,
                env,
                out,
            ),
            _ => {}
        }
        if self.stopped {
            Transition::Terminate
        } else {
            Transition::Continue
        }
    }

    fn context(&self, parent: &RumContext) -> RumContext {
        parent.with_action(self.action_id.clone())
    }

    fn is_active(&self) -> bool {
        !self.stopped
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::ids::{ApplicationId, SessionId, ViewId};

    use super::*;
    use crate::scope::testing::*;

    fn parent() -> RumContext {
        RumContext::for_application(ApplicationId::from_raw("app"))
            .with_session(SessionId::new())
            .with_view(ViewId::new(), "Cart", "app/cart")
    }

    #[test]
    fn stop_emits_resource_with_duration() {
        let env = env();
        let mut clock = Clock::new();
        let mut out = ScopeOutput::default();
        let action = ActionId::new();
        let mut scope =
            ResourceScope::from_event(&clock.at(start_resource("img")), Some(action.clone()))
                .unwrap();

        clock.advance(Duration::from_millis(40));
        let t = scope.handle_event(&clock.at(stop_resource("other")), &parent(), &env, &mut out);
        assert!(matches!(t, Transition::Continue));

        let t = scope.handle_event(&clock.at(stop_resource("img")), &parent(), &env, &mut out);
        assert!(t.is_terminate());
        let RumEvent::Resource(event) = &out.events[0].event else {
            panic!("expected resource");
        };
        assert_eq!(event.resource.duration, 40_000_000);
        assert_eq!(event.resource.status_code, Some(200));
        assert_eq!(event.resource.url, "https://api.test/img");
        assert_eq!(event.action, Some(IdRef::new(action.as_str())));
    }

    #[test]
    fn failure_emits_error_linked_to_resource() {
        let env = env();
        let clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut scope = ResourceScope::from_event(&clock.at(start_resource("api")), None).unwrap();
        let t = scope.handle_event(
            &clock.at(RawEventKind::StopResourceWithStackTrace {
                key: ResourceKey::from("api"),
                status_code: Some(503),
                message: "unavailable".into(),
                source: ErrorSource::Network,
                stack_trace: "at fetch()".into(),
                error_type: Some("HttpError".into()),
                attributes: Attributes::new(),
            }),
            &parent(),
            &env,
            &mut out,
        );
        assert!(t.is_terminate());
        let RumEvent::Error(event) = &out.events[0].event else {
            panic!("expected error");
        };
        assert_eq!(event.error.source, ErrorSource::Network);
        assert_eq!(event.error.stack.as_deref(), Some("at fetch()"));
        let resource = event.error.resource.as_ref().unwrap();
        assert_eq!(resource.status_code, 503);
        assert_eq!(resource.method, "GET");
        assert!(event.action.is_none());
    }
}
