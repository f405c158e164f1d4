use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid intake site: {0}")]
    InvalidSite(String),

    #[error("invalid value for header {0}")]
    InvalidHeader(&'static str),
}

impl UploadError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Client(_) => "client",
            Self::InvalidSite(_) => "invalid_site",
            Self::InvalidHeader(_) => "invalid_header",
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
