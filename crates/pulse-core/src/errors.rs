/// Errors raised by the shared pipeline seams.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("writer closed")]
    WriterClosed,
}

/// Failures converting events to and from their persisted form.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record is not a json object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unknown event type `{0}`")]
    UnknownType(String),
    #[error("unknown telemetry status `{0}`")]
    UnknownStatus(String),
}

impl CodecError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::NotAnObject => "not_an_object",
            Self::MissingField(_) => "missing_field",
            Self::UnknownType(_) => "unknown_type",
            Self::UnknownStatus(_) => "unknown_status",
        }
    }
}
