//! JSON codec for [`RumEvent`].
//!
//! Serialized events carry a top-level `type` discriminator. Telemetry
//! events share `type = "telemetry"` and are told apart by
//! `telemetry.type == "configuration"` or else by `telemetry.status`.

use pulse_core::{CodecError, Deserializer, RumEvent, Serializer};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Default)]
pub struct RumEventSerializer;

impl RumEventSerializer {
    pub fn to_value(event: &RumEvent) -> Result<Value, CodecError> {
        let value = match event {
            RumEvent::View(e) => serde_json::to_value(e)?,
            RumEvent::Action(e) => serde_json::to_value(e)?,
            RumEvent::Resource(e) => serde_json::to_value(e)?,
            RumEvent::Error(e) => serde_json::to_value(e)?,
            RumEvent::LongTask(e) => serde_json::to_value(e)?,
            RumEvent::TelemetryDebug(e) => serde_json::to_value(e)?,
            RumEvent::TelemetryError(e) => serde_json::to_value(e)?,
            RumEvent::TelemetryConfiguration(e) => serde_json::to_value(e)?,
        };
        let Value::Object(mut object) = value else {
            return Err(CodecError::NotAnObject);
        };
        object.insert("type".into(), Value::String(event.type_name().into()));
        Ok(Value::Object(object))
    }
}

impl Serializer<RumEvent> for RumEventSerializer {
    fn serialize(&self, event: &RumEvent) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&Self::to_value(event)?)?)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RumEventDeserializer;

fn decode<T: DeserializeOwned>(object: Map<String, Value>) -> Result<T, CodecError> {
    Ok(serde_json::from_value(Value::Object(object))?)
}

impl RumEventDeserializer {
    pub fn from_value(value: Value) -> Result<RumEvent, CodecError> {
        let Value::Object(mut object) = value else {
            return Err(CodecError::NotAnObject);
        };
        let Some(Value::String(event_type)) = object.remove("type") else {
            return Err(CodecError::MissingField("type"));
        };
        match event_type.as_str() {
            "view" => decode(object).map(RumEvent::View),
            "action" => decode(object).map(RumEvent::Action),
            "resource" => decode(object).map(RumEvent::Resource),
            "error" => decode(object).map(RumEvent::Error),
            "long_task" => decode(object).map(RumEvent::LongTask),
            "telemetry" => Self::telemetry(object),
            other => Err(CodecError::UnknownType(other.to_owned())),
        }
    }

    fn telemetry(object: Map<String, Value>) -> Result<RumEvent, CodecError> {
        let Some(Value::Object(telemetry)) = object.get("telemetry") else {
            return Err(CodecError::MissingField("telemetry"));
        };
        if telemetry.get("type").and_then(Value::as_str) == Some("configuration") {
            return decode(object).map(RumEvent::TelemetryConfiguration);
        }
        let status = match telemetry.get("status") {
            Some(Value::String(status)) => status.clone(),
            _ => return Err(CodecError::MissingField("telemetry.status")),
        };
        match status.as_str() {
            "debug" => decode(object).map(RumEvent::TelemetryDebug),
            "error" => decode(object).map(RumEvent::TelemetryError),
            _ => Err(CodecError::UnknownStatus(status)),
        }
    }
}

impl Deserializer<RumEvent> for RumEventDeserializer {
    fn deserialize(&self, input: &str) -> Result<RumEvent, CodecError> {
        let value: Value = serde_json::from_str(input)?;
        Self::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use pulse_core::events::*;
    use pulse_core::raw::ErrorSource;
    use serde_json::json;

    use super::*;

    fn telemetry_common() -> TelemetryCommon {
        TelemetryCommon {
            date: 1,
            service: "pulse-sdk".into(),
            source: "rust".into(),
            version: "0.1.0".into(),
            application: Some(IdRef::new("app")),
            session: None,
            view: None,
            action: None,
            dd: DdMeta::current(),
        }
    }

    fn error_event() -> RumEvent {
        RumEvent::Error(ErrorEvent {
            common: EventCommon {
                date: 10,
                application: IdRef::new("app"),
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
            },
            view: ViewRef {
                id: "v".into(),
                name: None,
                url: "home".into(),
            },
            action: None,
            error: ErrorData {
                id: "e".into(),
                message: "boom".into(),
                source: ErrorSource::Source,
                stack: None,
                is_crash: false,
                error_type: Some("Panic".into()),
                resource: None,
            },
        })
    }

    #[test]
    fn serializer_adds_discriminator() {
        let text = RumEventSerializer.serialize(&error_event()).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], json!("error"));
        assert_eq!(value["error"]["type"], json!("Panic"));
        let back = RumEventDeserializer.deserialize(&text).unwrap();
        assert_eq!(back, error_event());
    }

    #[test]
    fn telemetry_dispatches_on_configuration_then_status() {
        let debug = RumEvent::TelemetryDebug(TelemetryDebugEvent {
            common: telemetry_common(),
            telemetry: TelemetryDebugData {
                message: "m".into(),
                status: DebugStatus::Debug,
            },
        });
        let text = RumEventSerializer.serialize(&debug).unwrap();
        assert!(matches!(
            RumEventDeserializer.deserialize(&text).unwrap(),
            RumEvent::TelemetryDebug(_)
        ));

        let configuration = RumEvent::TelemetryConfiguration(TelemetryConfigurationEvent {
            common: telemetry_common(),
            telemetry: TelemetryConfigurationData {
                marker: ConfigurationMarker::Configuration,
                configuration: TelemetryConfiguration::default(),
            },
        });
        let text = RumEventSerializer.serialize(&configuration).unwrap();
        assert_eq!(RumEventDeserializer.deserialize(&text).unwrap(), configuration);
    }

    #[test]
    fn unknown_telemetry_status_fails_explicitly() {
        let mut value = RumEventSerializer::to_value(&RumEvent::TelemetryDebug(TelemetryDebugEvent {
            common: telemetry_common(),
            telemetry: TelemetryDebugData {
                message: "m".into(),
                status: DebugStatus::Debug,
            },
        }))
        .unwrap();
        value["telemetry"]["status"] = json!("warn");
        let err = RumEventDeserializer::from_value(value).unwrap_err();
        assert!(matches!(err, CodecError::UnknownStatus(ref s) if s == "warn"));
    }

    #[test]
    fn malformed_inputs_are_rejected() {
        assert!(matches!(
            RumEventDeserializer.deserialize(r#"{"date": 1}"#),
            Err(CodecError::MissingField("type"))
        ));
        assert!(matches!(
            RumEventDeserializer.deserialize(r#"{"type": "vital"}"#),
            Err(CodecError::UnknownType(t)) if t == "vital"
        ));
        assert!(matches!(
            RumEventDeserializer.deserialize("[1, 2]"),
            Err(CodecError::NotAnObject)
        ));
        assert!(matches!(
            RumEventDeserializer.deserialize("not json"),
            Err(CodecError::Json(_))
        ));
        assert!(RumEventDeserializer
            .deserialize(r#"{"type": "view", "date": 1}"#)
            .is_err());
    }
}
