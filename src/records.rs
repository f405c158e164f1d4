use pulse_core::{CodecError, Serializer};
use serde_json::Value;

/// Writes records that callers already shaped as JSON, one per line.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonRecordSerializer;

impl Serializer<Value> for JsonRecordSerializer {
    fn serialize(&self, record: &Value) -> Result<String, CodecError> {
        if !record.is_object() {
            return Err(CodecError::NotAnObject);
        }
        Ok(serde_json::to_string(record)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn records_are_compact_objects() {
        let line = JsonRecordSerializer
            .serialize(&json!({"message": "hello", "status": "info"}))
            .unwrap();
        assert!(!line.contains('\n'));
        assert!(matches!(
            JsonRecordSerializer.serialize(&json!([1])),
            Err(CodecError::NotAnObject)
        ));
    }
}
