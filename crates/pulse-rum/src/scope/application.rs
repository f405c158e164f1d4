use pulse_core::context::RumContext;
use pulse_core::ids::ApplicationId;
use pulse_core::{RawEvent, RawEventKind};

use super::{RumScope, ScopeEnv, ScopeOutput, SessionScope, Transition};

/// Root of the scope tree. Owns the active session and any retired
/// sessions that still have views waiting to complete.
#[derive(Debug)]
pub struct ApplicationScope {
    application_id: ApplicationId,
    active: Option<SessionScope>,
    retired: Vec<SessionScope>,
    app_start_sent: bool,
}

impl ApplicationScope {
    pub fn new(application_id: ApplicationId) -> Self {
        Self {
            application_id,
            active: None,
            retired: Vec::new(),
            app_start_sent: false,
        }
    }

    pub fn active_session(&self) -> Option<&SessionScope> {
        self.active.as_ref()
    }

    pub fn retired_sessions(&self) -> usize {
        self.retired.len()
    }

    /// Identity of whatever is currently in the foreground, for events that
    /// are built outside the tree.
    pub fn current_context(&self) -> RumContext {
        let root = self.context(&RumContext::default());
        let Some(session) = self.active.as_ref() else {
            return root;
        };
        let ctx = session.context(&root);
        match session.active_view() {
            Some(view) => view.context(&ctx),
            None => ctx,
        }
    }

    pub fn has_active_action(&self) -> bool {
        self.active
            .as_ref()
            .and_then(|s| s.active_view())
            .is_some_and(|v| v.has_active_action())
    }

    fn open_session(&mut self, event: &RawEvent, env: &ScopeEnv, out: &mut ScopeOutput) {
        let session = SessionScope::new(env, &event.time);
        tracing::info!(session_id = %session.id(), sampled = session.is_sampled(), "session started");
        out.started_sessions.push(session.id().clone());
        self.active = Some(session);
    }
}

impl RumScope for ApplicationScope {
    fn handle_event(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) -> Transition<Self> {
        let ctx = self.context(parent);

        self.retired
            .retain_mut(|session| !session.handle_event(event, &ctx, env, out).is_terminate());

        if self.active.is_none() {
            if event.is_ack() || matches!(event.kind, RawEventKind::KeepAlive) {
                return Transition::Continue;
            }
            self.open_session(event, env, out);
        }

        if let Some(session) = self.active.as_mut() {
            match session.handle_event(event, &ctx, env, out) {
                Transition::Continue => {}
                Transition::Replace(next) => {
                    let previous = std::mem::replace(session, next);
                    if !previous.is_complete() {
                        self.retired.push(previous);
                    }
                }
                Transition::Terminate => self.active = None,
            }
        }

        if matches!(event.kind, RawEventKind::StartView { .. }) && !self.app_start_sent {
            self.app_start_sent = true;
            let startup_ns = (event.time.nano_time - env.config.process_start_ns).max(1);
            let started = RawEvent::at(event.time, RawEventKind::ApplicationStarted { startup_ns });
            if let Some(session) = self.active.as_mut() {
                session.handle_event(&started, &ctx, env, out);
            }
        }

        Transition::Continue
    }

    fn context(&self, _parent: &RumContext) -> RumContext {
        RumContext::for_application(self.application_id.clone())
    }

    fn is_active(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::events::ActionEvent;
    use pulse_core::raw::ActionType;
    use pulse_core::RumEvent;

    use super::*;
    use crate::config::RumConfig;
    use crate::scope::testing::*;

    fn actions(out: &ScopeOutput) -> Vec<&ActionEvent> {
        out.events
            .iter()
            .filter_map(|e| match &e.event {
                RumEvent::Action(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_view_synthesizes_application_start_once() {
        let config = RumConfig {
            process_start_ns: 400_000_000,
            ..RumConfig::default()
        };
        let env = env_with(config, true);
        let mut clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut app = ApplicationScope::new(ApplicationId::from_raw("app"));

        app.handle_event(&clock.at(start_view("home")), &RumContext::default(), &env, &mut out);
        clock.advance(Duration::from_secs(1));
        app.handle_event(&clock.at(start_view("cart")), &RumContext::default(), &env, &mut out);

        let starts: Vec<_> = actions(&out)
            .into_iter()
            .filter(|a| a.action.action_type == ActionType::ApplicationStart)
            .collect();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].action.loading_time, 600_000_000);
        assert_eq!(starts[0].view.name.as_deref(), Some("HOME"));
        assert_eq!(out.started_sessions.len(), 1);
    }

    #[test]
    fn current_context_follows_foreground() {
        let env = env();
        let clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut app = ApplicationScope::new(ApplicationId::from_raw("app"));
        assert!(app.current_context().session_id.is_none());

        app.handle_event(&clock.at(start_view("home")), &RumContext::default(), &env, &mut out);
        app.handle_event(
            &clock.at(start_action(ActionType::Tap, true)),
            &RumContext::default(),
            &env,
            &mut out,
        );
        let ctx = app.current_context();
        assert_eq!(ctx.application_id.as_str(), "app");
        assert_eq!(ctx.view_name.as_deref(), Some("HOME"));
        assert!(ctx.action_id.is_some());
        assert!(app.has_active_action());
    }

    #[test]
    fn retired_session_lingers_until_acked() {
        let env = env();
        let mut clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut app = ApplicationScope::new(ApplicationId::from_raw("app"));
        let root = RumContext::default();

        app.handle_event(&clock.at(start_view("home")), &root, &env, &mut out);
        app.handle_event(&clock.at(add_error(false)), &root, &env, &mut out);
        let pending: Vec<_> = out
            .take_events()
            .into_iter()
            .filter_map(|e| match e.event {
                RumEvent::Action(a) => Some(RawEventKind::ActionSent {
                    view_id: pulse_core::ids::ViewId::from_raw(a.view.id),
                }),
                RumEvent::Error(err) => Some(RawEventKind::ErrorSent {
                    view_id: pulse_core::ids::ViewId::from_raw(err.view.id),
                }),
                _ => None,
            })
            .collect();
        assert_eq!(pending.len(), 2, "application start and the error");

        app.handle_event(&clock.at(RawEventKind::ResetSession), &root, &env, &mut out);
        assert_eq!(app.retired_sessions(), 1);

        for ack in pending {
            clock.advance(Duration::from_millis(1));
            app.handle_event(&clock.at(ack), &root, &env, &mut out);
        }
        assert_eq!(app.retired_sessions(), 0);
        assert_eq!(out.started_sessions.len(), 2);
    }

    #[test]
    fn acks_without_sessions_do_not_open_one() {
        let env = env();
        let clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut app = ApplicationScope::new(ApplicationId::from_raw("app"));
        app.handle_event(&clock.at(RawEventKind::KeepAlive), &RumContext::default(), &env, &mut out);
        assert!(app.active_session().is_none());
        assert!(out.events.is_empty());
    }
}
