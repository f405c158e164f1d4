use pulse_core::context::RumContext;
use pulse_core::ids::SessionId;
use pulse_core::time::Time;
use pulse_core::{Attributes, RawEvent, RawEventKind};

use super::{RumScope, ScopeEnv, ScopeOutput, Transition, ViewScope};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Tracked,
    /// Sampled out at creation; events are built but never written.
    NotTracked,
    /// Inactive for too long; events are muted until an interaction renews
    /// the session.
    Expired,
}

#[derive(Debug)]
pub struct SessionScope {
    id: SessionId,
    state: SessionState,
    sampled: bool,
    /// Replaced by a newer session; only finishes its views.
    retired: bool,
    started_ns: i64,
    last_interaction_ns: i64,
    tracked_events: u64,
    views: Vec<ViewScope>,
}

impl SessionScope {
    pub fn new(env: &ScopeEnv, time: &Time) -> Self {
        let sampled = env.session_sampler.sample();
        let id = SessionId::new();
        tracing::debug!(session_id = %id, sampled, "session created");
        Self {
            id,
            state: if sampled {
                SessionState::Tracked
            } else {
                SessionState::NotTracked
            },
            sampled,
            retired: false,
            started_ns: time.nano_time,
            last_interaction_ns: time.nano_time,
            tracked_events: 0,
            views: Vec::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// True once every view, active or stopped, has completed.
    pub fn is_complete(&self) -> bool {
        self.views.is_empty()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn active_view(&self) -> Option<&ViewScope> {
        self.views.iter().rev().find(|v| v.is_active())
    }

    fn max_events_reached(&self, env: &ScopeEnv) -> bool {
        env.config
            .session_max_events
            .is_some_and(|max| self.tracked_events >= max)
    }

    /// Retire this session and start its successor at `event.time`. The
    /// active view is stopped here and reopened in the new session.
    fn renew(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
        reason: &'static str,
    ) -> SessionScope {
        let restart = self.active_view().map(|v| v.restart_event(event.time));

        let from = out.events.len();
        let ctx = self.context(parent);
        self.views.retain_mut(|view| {
            if !view.is_active() {
                return true;
            }
            let stop = RawEvent::at(
                event.time,
                RawEventKind::StopView {
                    key: view.key().clone(),
                    attributes: Attributes::new(),
                },
            );
            !view.handle_event(&stop, &ctx, env, out).is_terminate()
        });
        self.mark(out, from);
        self.retired = true;

        let mut next = SessionScope::new(env, &event.time);
        tracing::info!(
            previous_session = %self.id,
            session_id = %next.id,
            reason,
            "session renewed"
        );
        out.started_sessions.push(next.id.clone());
        if let Some(start) = restart {
            next.route(&start, parent, env, out);
        }
        next
    }

    fn route(&mut self, event: &RawEvent, parent: &RumContext, env: &ScopeEnv, out: &mut ScopeOutput) {
        let from = out.events.len();
        let ctx = self.context(parent);
        let had_active_view = self.active_view().is_some();

        self.views
            .retain_mut(|view| !view.handle_event(event, &ctx, env, out).is_terminate());

        if !self.retired {
            if let RawEventKind::StartView { name, .. } = &event.kind {
                if let Some(mut view) = ViewScope::from_event(event) {
                    tracing::debug!(session_id = %self.id, view = %name, "view started");
                    view.send_update(event.time, &ctx, env, out);
                    self.views.push(view);
                }
            } else if !had_active_view && event.can_start_background_view() {
                if env.config.track_background_events {
                    let mut view = ViewScope::background(event.time);
                    view.send_update(event.time, &ctx, env, out);
                    view.handle_event(event, &ctx, env, out);
                    self.views.push(view);
                } else {
                    tracing::debug!(event = event.name(), "no active view, event dropped");
                }
            }
        }
        self.mark(out, from);
    }

    /// Stamp events emitted since `from` with this session's tracking state.
    fn mark(&mut self, out: &mut ScopeOutput, from: usize) {
        let tracked = self.state == SessionState::Tracked;
        for emitted in &mut out.events[from..] {
            if tracked {
                self.tracked_events += 1;
            } else {
                emitted.tracked = false;
            }
        }
    }

    fn transition(&self) -> Transition<Self> {
        if self.retired && self.is_complete() {
            Transition::Terminate
        } else {
            Transition::Continue
        }
    }
}

impl RumScope for SessionScope {
    fn handle_event(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) -> Transition<Self> {
        if event.is_ack() || self.retired {
            self.route(event, parent, env, out);
            return self.transition();
        }
        if matches!(event.kind, RawEventKind::ResetSession) {
            return Transition::Replace(self.renew(event, parent, env, out, "reset"));
        }

        let now = event.time.nano_time;
        let expired = now - self.last_interaction_ns >= env.nanos(env.config.session_inactivity);
        let timed_out = now - self.started_ns >= env.nanos(env.config.session_max_duration)
            || self.max_events_reached(env);

        let reason = if event.is_interaction() {
            if expired {
                Some("inactivity")
            } else if timed_out {
                Some("max_duration")
            } else {
                self.last_interaction_ns = now;
                None
            }
        } else if expired {
            if env.config.track_background_events && event.can_start_background_view() {
                Some("background_event")
            } else {
                if self.state != SessionState::Expired {
                    tracing::debug!(session_id = %self.id, "session expired");
                }
                self.state = SessionState::Expired;
                None
            }
        } else if timed_out {
            Some("max_duration")
        } else {
            None
        };

        if let Some(reason) = reason {
            let mut next = self.renew(event, parent, env, out, reason);
            next.route(event, parent, env, out);
            return Transition::Replace(next);
        }

        self.route(event, parent, env, out);
        Transition::Continue
    }

    fn context(&self, parent: &RumContext) -> RumContext {
        parent.with_session(self.id.clone())
    }

    fn is_active(&self) -> bool {
        !self.retired
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_core::ids::ApplicationId;
    use pulse_core::raw::ActionType;
    use pulse_core::RumEvent;

    use super::*;
    use crate::config::RumConfig;
    use crate::scope::testing::*;

    fn root() -> RumContext {
        RumContext::for_application(ApplicationId::from_raw("app"))
    }

    fn replaced(t: Transition<SessionScope>) -> SessionScope {
        match t {
            Transition::Replace(next) => next,
            other => panic!("expected replacement, got {other:?}"),
        }
    }

    #[test]
    fn sampled_out_session_mutes_everything() {
        let env = env_with(RumConfig::default(), false);
        let clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut session = SessionScope::new(&env, &clock.now());
        session.handle_event(&clock.at(start_view("home")), &root(), &env, &mut out);
        session.handle_event(&clock.at(add_error(false)), &root(), &env, &mut out);

        assert_eq!(session.state(), SessionState::NotTracked);
        assert_eq!(out.events.len(), 2);
        assert!(out.events.iter().all(|e| !e.tracked));
    }

    #[test]
    fn interaction_after_inactivity_renews_and_restarts_view() {
        let env = env();
        let mut clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut session = SessionScope::new(&env, &clock.now());
        session.handle_event(&clock.at(start_view("home")), &root(), &env, &mut out);
        let old_view = session.active_view().unwrap().id().clone();

        clock.advance(Duration::from_secs(16 * 60));
        let t = session.handle_event(
            &clock.at(start_action(ActionType::Tap, false)),
            &root(),
            &env,
            &mut out,
        );
        let next = replaced(t);

        assert_ne!(next.id(), session.id());
        assert!(session.is_retired());
        assert!(session.is_complete());
        assert_eq!(out.started_sessions, vec![next.id().clone()]);

        let restarted = next.active_view().unwrap();
        assert_eq!(restarted.name(), "HOME");
        assert_ne!(restarted.id(), &old_view);
        assert!(restarted.has_active_action());

        let old_final = out
            .events
            .iter()
            .filter_map(|e| match &e.event {
                RumEvent::View(v) if v.view.id == old_view.as_str() => Some(v),
                _ => None,
            })
            .last()
            .unwrap();
        assert!(!old_final.view.is_active);
    }

    #[test]
    fn non_interaction_after_inactivity_is_muted() {
        let env = env();
        let mut clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut session = SessionScope::new(&env, &clock.now());
        session.handle_event(&clock.at(start_view("home")), &root(), &env, &mut out);
        out.events.clear();

        clock.advance(Duration::from_secs(15 * 60));
        let t = session.handle_event(&clock.at(add_error(false)), &root(), &env, &mut out);
        assert!(matches!(t, Transition::Continue));
        assert_eq!(session.state(), SessionState::Expired);
        assert_eq!(out.events.len(), 1);
        assert!(!out.events[0].tracked);
    }

    #[test]
    fn background_event_renews_when_tracking_enabled() {
        let config = RumConfig {
            track_background_events: true,
            ..RumConfig::default()
        };
        let env = env_with(config, true);
        let mut clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut session = SessionScope::new(&env, &clock.now());

        clock.advance(Duration::from_secs(20 * 60));
        let next = replaced(session.handle_event(
            &clock.at(add_error(false)),
            &root(),
            &env,
            &mut out,
        ));
        let view = next.active_view().unwrap();
        assert_eq!(view.name(), "Background");
        assert!(out.events.iter().all(|e| e.tracked));
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e.event, RumEvent::Error(_))));
    }

    #[test]
    fn events_without_a_view_are_dropped_by_default() {
        let env = env();
        let clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut session = SessionScope::new(&env, &clock.now());
        session.handle_event(&clock.at(start_resource("r")), &root(), &env, &mut out);
        assert!(out.events.is_empty());
        assert_eq!(session.view_count(), 0);
    }

    #[test]
    fn reset_renews_immediately() {
        let env = env();
        let clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut session = SessionScope::new(&env, &clock.now());
        session.handle_event(&clock.at(start_view("home")), &root(), &env, &mut out);
        let next = replaced(session.handle_event(
            &clock.at(RawEventKind::ResetSession),
            &root(),
            &env,
            &mut out,
        ));
        assert_eq!(next.active_view().unwrap().name(), "HOME");
        assert!(session.is_retired());
    }

    #[test]
    fn event_cap_renews_session() {
        let config = RumConfig {
            session_max_events: Some(2),
            ..RumConfig::default()
        };
        let env = env_with(config, true);
        let clock = Clock::new();
        let mut out = ScopeOutput::default();
        let mut session = SessionScope::new(&env, &clock.now());
        session.handle_event(&clock.at(start_view("home")), &root(), &env, &mut out);
        session.handle_event(&clock.at(add_error(false)), &root(), &env, &mut out);
        let t = session.handle_event(&clock.at(RawEventKind::KeepAlive), &root(), &env, &mut out);
        assert!(matches!(t, Transition::Replace(_)));
    }
}
