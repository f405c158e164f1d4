use std::collections::HashMap;

use pulse_core::attributes;
use pulse_core::context::RumContext;
use pulse_core::events::{
    ActionData, ActionEvent, ActionTarget, Count, Frustration, FrustrationType,
};
use pulse_core::ids::{ActionId, ResourceKey};
use pulse_core::raw::ActionType;
use pulse_core::time::{duration_at_least_one, Time};
use pulse_core::{Attributes, RawEvent, RawEventKind, RumEvent};

use super::{RumScope, ScopeEnv, ScopeOutput, Transition};

/// A user action, finalized exactly once.
///
/// An action ends when it has been idle for the inactivity threshold with
/// no ongoing resource (and, for `wait_for_stop` actions, after it was
/// stopped), when it outlives the maximum duration, when its view starts or
/// stops, or immediately on a fatal error.
#[derive(Debug)]
pub struct ActionScope {
    id: ActionId,
    action_type: ActionType,
    name: String,
    attributes: Attributes,
    wait_for_stop: bool,
    start: Time,
    last_interaction: Time,
    /// Resources started while this action was active, keyed to the start
    /// reading of the resource scope that owns them.
    ongoing: HashMap<ResourceKey, i64>,
    resource_count: i64,
    error_count: i64,
    crash_count: i64,
    long_task_count: i64,
    stopped: bool,
    sent: bool,
}

impl ActionScope {
    pub fn new(
        action_type: ActionType,
        name: impl Into<String>,
        wait_for_stop: bool,
        attributes: Attributes,
        start: Time,
    ) -> Self {
        Self {
            id: ActionId::new(),
            action_type,
            name: name.into(),
            attributes,
            wait_for_stop,
            start,
            last_interaction: start,
            ongoing: HashMap::new(),
            resource_count: 0,
            error_count: 0,
            crash_count: 0,
            long_task_count: 0,
            stopped: false,
            sent: false,
        }
    }

    pub fn from_event(event: &RawEvent) -> Option<Self> {
        match &event.kind {
            RawEventKind::StartAction {
                action_type,
                name,
                wait_for_stop,
                attributes,
            } => Some(Self::new(
                *action_type,
                name.clone(),
                *wait_for_stop,
                attributes.clone(),
                event.time,
            )),
            _ => None,
        }
    }

    pub fn id(&self) -> &ActionId {
        &self.id
    }

    pub fn ongoing_resources(&self) -> usize {
        self.ongoing.len()
    }

    /// Forget resources whose owning scope no longer exists.
    pub fn retain_live_resources(&mut self, is_live: impl Fn(&ResourceKey, i64) -> bool) {
        self.ongoing.retain(|key, started| is_live(key, *started));
    }

    fn frustration(&self, env: &ScopeEnv) -> Option<Frustration> {
        (env.config.track_frustrations && self.error_count > 0 && self.action_type.is_tap_like())
            .then(|| Frustration {
                types: vec![FrustrationType::ErrorTap],
            })
    }

    fn send(&mut self, end: Time, parent: &RumContext, env: &ScopeEnv, out: &mut ScopeOutput) {
        if self.sent {
            return;
        }
        let ctx = self.context(parent);
        let event = ActionEvent {
            common: env.common(&ctx, &self.start, &self.attributes),
            view: ScopeEnv::view_ref(&ctx),
            action: ActionData {
                id: self.id.as_str().to_owned(),
                action_type: self.action_type,
                target: ActionTarget {
                    name: self.name.clone(),
                },
                loading_time: duration_at_least_one(self.start.nano_time, end.nano_time),
                error: Count::of(self.error_count),
                crash: Count::of(self.crash_count),
                long_task: Count::of(self.long_task_count),
                resource: Count::of(self.resource_count),
                frustration: self.frustration(env),
            },
        };
        tracing::debug!(
            action_id = %self.id,
            action_type = ?self.action_type,
            errors = self.error_count,
            resources = self.resource_count,
            "action finalized"
        );
        out.emit(RumEvent::Action(event));
        self.sent = true;
    }
}

impl RumScope for ActionScope {
    fn handle_event(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) -> Transition<Self> {
        let now = event.time.nano_time;
        let inactivity = env.nanos(env.config.action_inactivity);
        let max_duration = env.nanos(env.config.action_max_duration);
        let is_inactive = now - self.last_interaction.nano_time > inactivity;
        let is_expired = now - self.start.nano_time > max_duration;
        let is_waiting = self.wait_for_stop && !self.stopped;

        if is_inactive && self.ongoing.is_empty() && !is_waiting {
            let end = self.last_interaction;
            self.send(end, parent, env, out);
        } else if is_expired {
            self.send(event.time, parent, env, out);
        } else {
            match &event.kind {
                RawEventKind::SendCustomActionNow => {
                    let end = self.last_interaction;
                    self.send(end, parent, env, out);
                }
                RawEventKind::StartView { .. } | RawEventKind::StopView { .. } => {
                    self.ongoing.clear();
                    self.send(event.time, parent, env, out);
                }
                RawEventKind::StopAction {
                    action_type,
                    name,
                    attributes: extra,
                } => {
                    if let Some(t) = action_type {
                        self.action_type = *t;
                    }
                    if let Some(n) = name {
                        self.name = n.clone();
                    }
                    attributes::extend(&mut self.attributes, extra);
                    self.stopped = true;
                    self.last_interaction = event.time;
                }
                RawEventKind::StartResource { key, .. } => {
                    self.last_interaction = event.time;
                    self.resource_count += 1;
                    self.ongoing.insert(key.clone(), now);
                }
                RawEventKind::StopResource { key, .. } => {
                    if self.ongoing.remove(key).is_some() {
                        self.last_interaction = event.time;
                    }
                }
                // A failed resource is reported as an error, not a resource.
                RawEventKind::StopResourceWithError { key, .. }
                | RawEventKind::StopResourceWithStackTrace { key, .. } => {
                    if self.ongoing.remove(key).is_some() {
                        self.resource_count -= 1;
                        self.error_count += 1;
                        self.last_interaction = event.time;
                    }
                }
                RawEventKind::AddError { is_fatal, .. } => {
                    self.last_interaction = event.time;
                    self.error_count += 1;
                    if *is_fatal {
                        self.crash_count += 1;
                        self.send(event.time, parent, env, out);
                    }
                }
                RawEventKind::AddLongTask { .. } => {
                    self.last_interaction = event.time;
                    self.long_task_count += 1;
                }
                _ => {}
            }
        }

        if self.sent {
            Transition::Terminate
        } else {
            Transition::Continue
        }
    }

    fn context(&self, parent: &RumContext) -> RumContext {
        parent.with_action(Some(self.id.clone()))
    }

    fn is_active(&self) -> bool {
        !self.sent
    }
}
