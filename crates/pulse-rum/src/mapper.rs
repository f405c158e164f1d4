use pulse_core::events::{ActionEvent, ErrorEvent, LongTaskEvent, ResourceEvent, ViewEvent};
use pulse_core::RumEvent;

/// Host hook applied to every RUM event right before it is written.
///
/// Returning `None` drops the event. Views can be rewritten but never
/// dropped, since later updates of the same view would be orphaned.
/// Telemetry events bypass the mapper.
pub trait EventMapper: Send + Sync {
    fn map_view(&self, event: ViewEvent) -> ViewEvent {
        event
    }

    fn map_action(&self, event: ActionEvent) -> Option<ActionEvent> {
        Some(event)
    }

    fn map_resource(&self, event: ResourceEvent) -> Option<ResourceEvent> {
        Some(event)
    }

    fn map_error(&self, event: ErrorEvent) -> Option<ErrorEvent> {
        Some(event)
    }

    fn map_long_task(&self, event: LongTaskEvent) -> Option<LongTaskEvent> {
        Some(event)
    }
}

pub fn apply(mapper: &dyn EventMapper, event: RumEvent) -> Option<RumEvent> {
    match event {
        RumEvent::View(e) => Some(RumEvent::View(mapper.map_view(e))),
        RumEvent::Action(e) => mapper.map_action(e).map(RumEvent::Action),
        RumEvent::Resource(e) => mapper.map_resource(e).map(RumEvent::Resource),
        RumEvent::Error(e) => mapper.map_error(e).map(RumEvent::Error),
        RumEvent::LongTask(e) => mapper.map_long_task(e).map(RumEvent::LongTask),
        telemetry => Some(telemetry),
    }
}

#[cfg(test)]
mod tests {
    use pulse_core::events::*;

    use super::*;

    struct DropErrors;

    impl EventMapper for DropErrors {
        fn map_error(&self, _event: ErrorEvent) -> Option<ErrorEvent> {
            None
        }

        fn map_view(&self, mut event: ViewEvent) -> ViewEvent {
            event.view.name = Some("redacted".into());
            event
        }
    }

    fn common() -> EventCommon {
        EventCommon {
            date: 0,
            application: IdRef::new("a"),
            service: None,
            version: None,
            session: SessionRef {
                id: "s".into(),
                session_type: "user".into(),
                has_replay: false,
            },
            source: "rust".into(),
            usr: None,
            connectivity: None,
            os: None,
            device: None,
            context: None,
            dd: DdMeta::current(),
        }
    }

    fn view() -> ViewEvent {
        ViewEvent {
            common: common(),
            view: ViewData {
                id: "v".into(),
                name: Some("Home".into()),
                url: "home".into(),
                time_spent: 1,
                loading_time: None,
                action: Count::default(),
                resource: Count::default(),
                error: Count::default(),
                crash: Count::default(),
                long_task: Count::default(),
                frozen_frame: Count::default(),
                custom_timings: Default::default(),
                is_active: true,
            },
        }
    }

    #[test]
    fn views_are_rewritten_never_dropped() {
        let Some(RumEvent::View(mapped)) = apply(&DropErrors, RumEvent::View(view())) else {
            panic!("view must survive");
        };
        assert_eq!(mapped.view.name.as_deref(), Some("redacted"));
    }

    #[test]
    fn mapper_can_drop_errors() {
        let error = RumEvent::Error(ErrorEvent {
            common: common(),
            view: ViewRef {
                id: "v".into(),
                name: None,
                url: "home".into(),
            },
            action: None,
            error: ErrorData {
                id: "e".into(),
                message: "m".into(),
                source: pulse_core::raw::ErrorSource::Custom,
                stack: None,
                is_crash: false,
                error_type: None,
                resource: None,
            },
        });
        assert!(apply(&DropErrors, error).is_none());
    }
}
