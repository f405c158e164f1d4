use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("settings error: {0}")]
    Settings(#[from] pulse_settings::SettingsError),

    #[error("uploader error: {0}")]
    Upload(#[from] pulse_upload::UploadError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity.clientToken is required to upload")]
    MissingClientToken,

    #[error("the SDK must be initialized inside a tokio runtime")]
    NoRuntime,
}

impl SdkError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Settings(_) => "settings",
            Self::Upload(_) => "upload",
            Self::Io(_) => "io",
            Self::MissingClientToken => "missing_client_token",
            Self::NoRuntime => "no_runtime",
        }
    }
}

pub type Result<T> = std::result::Result<T, SdkError>;
