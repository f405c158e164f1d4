use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one upload attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Success,
    NetworkError,
    InvalidTokenError,
    HttpRedirection,
    HttpClientError,
    HttpClientRateLimiting,
    HttpServerError,
    UnknownError,
}

impl UploadStatus {
    /// Classify an HTTP status code.
    pub fn from_status(code: u16) -> Self {
        match code {
            200..=299 => Self::Success,
            300..=399 => Self::HttpRedirection,
            401 | 403 => Self::InvalidTokenError,
            408 | 429 => Self::HttpClientRateLimiting,
            400..=499 => Self::HttpClientError,
            500..=599 => Self::HttpServerError,
            _ => Self::UnknownError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Failures caused by the request itself rather than the network or intake.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            Self::InvalidTokenError | Self::HttpClientError | Self::HttpRedirection
        )
    }

    /// Short classification string for logging/metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NetworkError => "network_error",
            Self::InvalidTokenError => "invalid_token",
            Self::HttpRedirection => "http_redirection",
            Self::HttpClientError => "http_client_error",
            Self::HttpClientRateLimiting => "rate_limited",
            Self::HttpServerError => "http_server_error",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
