use pulse_core::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record of {size} bytes exceeds the {max} byte limit")]
    ItemTooLarge { size: u64, max: u64 },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] CodecError),

    #[error("persistence executor is shut down")]
    ExecutorClosed,
}

impl From<StoreError> for pulse_core::CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Serialization(c) => pulse_core::CoreError::Codec(c),
            StoreError::ExecutorClosed => pulse_core::CoreError::WriterClosed,
            other => pulse_core::CoreError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_message() {
        let e = StoreError::ItemTooLarge { size: 10, max: 4 };
        assert_eq!(e.to_string(), "record of 10 bytes exceeds the 4 byte limit");
    }

    #[test]
    fn converts_into_core_error() {
        let core: pulse_core::CoreError = StoreError::ExecutorClosed.into();
        assert!(matches!(core, pulse_core::CoreError::WriterClosed));
        let core: pulse_core::CoreError =
            StoreError::InvalidRecord("newline".into()).into();
        assert!(core.to_string().contains("newline"));
    }
}
