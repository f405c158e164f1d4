use std::collections::{BTreeMap, HashMap};

use pulse_core::attributes;
use pulse_core::context::RumContext;
use pulse_core::events::{
    ActionData, ActionEvent, ActionTarget, Count, ErrorData, ErrorEvent, IdRef, LongTaskData,
    LongTaskEvent, ViewData, ViewEvent,
};
use pulse_core::ids::{ActionId, ErrorId, LongTaskId, ResourceKey, ViewId, ViewKey};
use pulse_core::raw::ActionType;
use pulse_core::time::{duration_at_least_one, Time};
use pulse_core::{Attributes, RawEvent, RawEventKind, RumEvent};
use serde_json::Value;

use super::{ActionScope, ResourceScope, RumScope, ScopeEnv, ScopeOutput, Transition};

pub const BACKGROUND_VIEW_KEY: &str = "pulse.background.view";
pub const BACKGROUND_VIEW_NAME: &str = "Background";
pub const BACKGROUND_VIEW_URL: &str = "pulse.background.view";

/// Events this view emitted that have not been acknowledged yet.
#[derive(Debug, Default)]
struct Pending {
    actions: i64,
    resources: i64,
    errors: i64,
    long_tasks: i64,
}

impl Pending {
    fn total(&self) -> i64 {
        self.actions + self.resources + self.errors + self.long_tasks
    }
}

#[derive(Debug, Default)]
struct Counters {
    actions: i64,
    resources: i64,
    errors: i64,
    crashes: i64,
    long_tasks: i64,
    frozen_frames: i64,
}

#[derive(Debug)]
pub struct ViewScope {
    id: ViewId,
    key: ViewKey,
    name: String,
    url: String,
    attributes: Attributes,
    start: Time,
    end: Option<Time>,
    action: Option<ActionScope>,
    resources: HashMap<ResourceKey, ResourceScope>,
    counters: Counters,
    pending: Pending,
    custom_timings: BTreeMap<String, i64>,
    version: u64,
}

impl ViewScope {
    pub fn new(
        key: ViewKey,
        name: impl Into<String>,
        url: impl Into<String>,
        attributes: Attributes,
        start: Time,
    ) -> Self {
        Self {
            id: ViewId::new(),
            key,
            name: name.into(),
            url: url.into(),
            attributes,
            start,
            end: None,
            action: None,
            resources: HashMap::new(),
            counters: Counters::default(),
            pending: Pending::default(),
            custom_timings: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn from_event(event: &RawEvent) -> Option<Self> {
        match &event.kind {
            RawEventKind::StartView {
                key,
                name,
                url,
                attributes,
            } => Some(Self::new(
                key.clone(),
                name.clone(),
                url.clone(),
                attributes.clone(),
                event.time,
            )),
            _ => None,
        }
    }

    /// View opened for events arriving while nothing is on screen.
    pub fn background(start: Time) -> Self {
        Self::new(
            ViewKey::from(BACKGROUND_VIEW_KEY),
            BACKGROUND_VIEW_NAME,
            BACKGROUND_VIEW_URL,
            Attributes::new(),
            start,
        )
    }

    /// A start event reopening this view with the same identity.
    pub fn restart_event(&self, time: Time) -> RawEvent {
        RawEvent::at(
            time,
            RawEventKind::StartView {
                key: self.key.clone(),
                name: self.name.clone(),
                url: self.url.clone(),
                attributes: self.attributes.clone(),
            },
        )
    }

    pub fn id(&self) -> &ViewId {
        &self.id
    }

    pub fn key(&self) -> &ViewKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn has_active_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn active_action_id(&self) -> Option<&ActionId> {
        self.action.as_ref().map(|a| a.id())
    }

    fn stopped(&self) -> bool {
        self.end.is_some()
    }

    fn is_complete(&self) -> bool {
        self.stopped()
            && self.action.is_none()
            && self.resources.is_empty()
            && self.pending.total() <= 0
    }

    fn view_context(&self, parent: &RumContext) -> RumContext {
        parent.with_view(self.id.clone(), &self.name, &self.url)
    }

    /// Emit the next version of the view document.
    pub fn send_update(
        &mut self,
        time: Time,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        self.version += 1;
        let end = self.end.unwrap_or(time);
        let ctx = self.view_context(parent);
        let mut common = env.common(&ctx, &self.start, &self.attributes);
        common.dd.document_version = Some(self.version);
        out.emit(RumEvent::View(ViewEvent {
            common,
            view: ViewData {
                id: self.id.as_str().to_owned(),
                name: Some(self.name.clone()),
                url: self.url.clone(),
                time_spent: duration_at_least_one(self.start.nano_time, end.nano_time),
                loading_time: None,
                action: Count::of(self.counters.actions),
                resource: Count::of(self.counters.resources),
                error: Count::of(self.counters.errors),
                crash: Count::of(self.counters.crashes),
                long_task: Count::of(self.counters.long_tasks),
                frozen_frame: Count::of(self.counters.frozen_frames),
                custom_timings: self.custom_timings.clone(),
                is_active: !self.stopped(),
            },
        }));
    }

    fn stop(&mut self, time: Time, parent: &RumContext, env: &ScopeEnv, out: &mut ScopeOutput) {
        if self.stopped() {
            return;
        }
        self.end = Some(time);
        self.send_update(time, parent, env, out);
    }

    /// Route an event to the active action and the in-flight resources.
    fn delegate(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        let ctx = self.view_context(parent);
        if let Some(action) = self.action.as_mut() {
            let resources = &self.resources;
            action.retain_live_resources(|key, started| {
                resources.get(key).is_some_and(|r| r.started_ns() == started)
            });
            if action.handle_event(event, &ctx, env, out).is_terminate() {
                self.action = None;
            }
        }
        if let Some(key) = event.kind.stopped_resource_key() {
            if let Some(resource) = self.resources.get_mut(key) {
                if resource.handle_event(event, &ctx, env, out).is_terminate() {
                    self.resources.remove(key);
                }
            }
        }
    }

    fn on_start_action(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        self.delegate(event, parent, env, out);
        if self.stopped() {
            return;
        }
        let Some(mut action) = ActionScope::from_event(event) else {
            return;
        };
        let RawEventKind::StartAction {
            action_type,
            wait_for_stop,
            name,
            ..
        } = &event.kind
        else {
            return;
        };
        if self.action.is_none() {
            self.action = Some(action);
            return;
        }
        if *action_type == ActionType::Custom && !*wait_for_stop {
            let ctx = self.view_context(parent);
            let now = RawEvent::at(event.time, RawEventKind::SendCustomActionNow);
            action.handle_event(&now, &ctx, env, out);
        } else {
            tracing::debug!(
                view = %self.name,
                action = %name,
                "action dropped, another action is still active for this view"
            );
        }
    }

    fn on_start_resource(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        self.delegate(event, parent, env, out);
        if self.stopped() {
            return;
        }
        let action_id = self.active_action_id().cloned();
        if let Some(resource) = ResourceScope::from_event(event, action_id) {
            self.resources.insert(resource.key().clone(), resource);
        }
    }

    fn on_add_error(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        let action_id = self.active_action_id().cloned();
        self.delegate(event, parent, env, out);
        if self.stopped() {
            return;
        }
        let RawEventKind::AddError {
            message,
            source,
            stack_trace,
            error_type,
            is_fatal,
            attributes,
        } = &event.kind
        else {
            return;
        };
        let ctx = self.view_context(parent).with_action(action_id.clone());
        out.emit(RumEvent::Error(ErrorEvent {
            common: env.common(&ctx, &event.time, attributes),
            view: ScopeEnv::view_ref(&ctx),
            action: action_id.map(|a| IdRef::new(a.as_str())),
            error: ErrorData {
                id: ErrorId::new().as_str().to_owned(),
                message: message.clone(),
                source: *source,
                stack: stack_trace.clone(),
                is_crash: *is_fatal,
                error_type: error_type.clone(),
                resource: None,
            },
        }));
        if *is_fatal {
            self.counters.crashes += 1;
            self.send_update(event.time, parent, env, out);
        }
    }

    fn on_add_long_task(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        let action_id = self.active_action_id().cloned();
        self.delegate(event, parent, env, out);
        if self.stopped() {
            return;
        }
        let RawEventKind::AddLongTask {
            duration_ns,
            target,
        } = &event.kind
        else {
            return;
        };
        let started = Time::from_parts(
            event.time.timestamp_ms - duration_ns / 1_000_000,
            event.time.nano_time - duration_ns,
        );
        let mut local = Attributes::new();
        if !target.is_empty() {
            local.insert("long_task.target".into(), Value::String(target.clone()));
        }
        let ctx = self.view_context(parent).with_action(action_id.clone());
        out.emit(RumEvent::LongTask(LongTaskEvent {
            common: env.common(&ctx, &started, &local),
            view: ScopeEnv::view_ref(&ctx),
            action: action_id.map(|a| IdRef::new(a.as_str())),
            long_task: LongTaskData {
                id: LongTaskId::new().as_str().to_owned(),
                duration: *duration_ns,
                is_frozen_frame: *duration_ns > env.nanos(env.config.frozen_frame_threshold),
            },
        }));
    }

    fn on_application_started(
        &mut self,
        event: &RawEvent,
        startup_ns: i64,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) {
        if self.stopped() {
            return;
        }
        let process_start = Time::from_parts(
            event.time.timestamp_ms - startup_ns / 1_000_000,
            event.time.nano_time - startup_ns,
        );
        let ctx = self.view_context(parent);
        out.emit(RumEvent::Action(ActionEvent {
            common: env.common(&ctx, &process_start, &Attributes::new()),
            view: ScopeEnv::view_ref(&ctx),
            action: ActionData {
                id: ActionId::new().as_str().to_owned(),
                action_type: ActionType::ApplicationStart,
                target: ActionTarget {
                    name: "application_start".into(),
                },
                loading_time: startup_ns.max(1),
                error: Count::default(),
                crash: Count::default(),
                long_task: Count::default(),
                resource: Count::default(),
                frustration: None,
            },
        }));
    }

    /// Count children's events emitted since `from` as awaiting an ack.
    fn track_pending(&mut self, out: &ScopeOutput, from: usize) {
        let id = self.id.as_str();
        for emitted in &out.events[from..] {
            if emitted.event.view_id() != Some(id) {
                continue;
            }
            match emitted.event {
                RumEvent::Action(_) => self.pending.actions += 1,
                RumEvent::Resource(_) => self.pending.resources += 1,
                RumEvent::Error(_) => self.pending.errors += 1,
                RumEvent::LongTask(_) => self.pending.long_tasks += 1,
                _ => {}
            }
        }
    }

    /// Apply an acknowledgement addressed to this view. Returns false for
    /// acks meant for another view.
    fn on_ack(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) -> bool {
        let own = self.id.clone();
        let mine = |view_id: &ViewId| view_id == &own;
        let sent = match &event.kind {
            RawEventKind::ActionSent { view_id } if mine(view_id) => {
                self.pending.actions -= 1;
                self.counters.actions += 1;
                true
            }
            RawEventKind::ResourceSent { view_id } if mine(view_id) => {
                self.pending.resources -= 1;
                self.counters.resources += 1;
                true
            }
            RawEventKind::ErrorSent { view_id } if mine(view_id) => {
                self.pending.errors -= 1;
                self.counters.errors += 1;
                true
            }
            RawEventKind::LongTaskSent {
                view_id,
                is_frozen_frame,
            } if mine(view_id) => {
                self.pending.long_tasks -= 1;
                self.counters.long_tasks += 1;
                if *is_frozen_frame {
                    self.counters.frozen_frames += 1;
                }
                true
            }
            RawEventKind::ActionDropped { view_id } if mine(view_id) => {
                self.pending.actions -= 1;
                false
            }
            RawEventKind::ResourceDropped { view_id } if mine(view_id) => {
                self.pending.resources -= 1;
                false
            }
            RawEventKind::ErrorDropped { view_id } if mine(view_id) => {
                self.pending.errors -= 1;
                false
            }
            RawEventKind::LongTaskDropped { view_id, .. } if mine(view_id) => {
                self.pending.long_tasks -= 1;
                false
            }
            _ => return false,
        };
        if sent {
            self.send_update(event.time, parent, env, out);
        }
        true
    }
}

impl RumScope for ViewScope {
    fn handle_event(
        &mut self,
        event: &RawEvent,
        parent: &RumContext,
        env: &ScopeEnv,
        out: &mut ScopeOutput,
    ) -> Transition<Self> {
        if event.is_ack() {
            self.on_ack(event, parent, env, out);
            return self.transition();
        }

        let from = out.events.len();
        match &event.kind {
            RawEventKind::StartView { .. } => {
                self.delegate(event, parent, env, out);
                self.stop(event.time, parent, env, out);
            }
            RawEventKind::StopView { key, attributes } => {
                self.delegate(event, parent, env, out);
                if key == &self.key && !self.stopped() {
                    attributes::extend(&mut self.attributes, attributes);
                    self.stop(event.time, parent, env, out);
                }
            }
            RawEventKind::StartAction { .. } => self.on_start_action(event, parent, env, out),
            RawEventKind::StartResource { .. } => self.on_start_resource(event, parent, env, out),
            RawEventKind::AddError { .. } => self.on_add_error(event, parent, env, out),
            RawEventKind::AddLongTask { .. } => self.on_add_long_task(event, parent, env, out),
            RawEventKind::ApplicationStarted { startup_ns } => {
                self.on_application_started(event, *startup_ns, parent, env, out);
            }
            RawEventKind::AddViewTiming { name } => {
                if !self.stopped() {
                    let elapsed = event.time.nanos_since(&self.start).max(1);
                    self.custom_timings.insert(name.clone(), elapsed);
                    self.send_update(event.time, parent, env, out);
                }
            }
            RawEventKind::KeepAlive => {
                self.delegate(event, parent, env, out);
                if !self.stopped() {
                    self.send_update(event.time, parent, env, out);
                }
            }
            _ => self.delegate(event, parent, env, out),
        }
        self.track_pending(out, from);
        self.transition()
    }

    fn context(&self, parent: &RumContext) -> RumContext {
        self.view_context(parent)
            .with_action(self.active_action_id().cloned())
    }

    fn is_active(&self) -> bool {
        !self.stopped()
    }
}

impl ViewScope {
    fn transition(&self) -> Transition<Self> {
        if self.is_complete() {
            Transition::Terminate
        } else {
            Transition::Continue
        }
    }
}
