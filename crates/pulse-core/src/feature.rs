use serde::{Deserialize, Serialize};
use std::fmt;

/// Independent telemetry channel with its own storage and uploader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Rum,
    Logs,
    Traces,
    CrashReports,
    WebViewRum,
    WebViewLogs,
}

/// How records of one batch are joined into a request body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Records separated by `\n`, sent as `text/plain`.
    NewlineDelimited,
    /// Records wrapped in a JSON array, sent as `application/json`.
    JsonArray,
}

impl PayloadFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::NewlineDelimited => "text/plain;charset=UTF-8",
            Self::JsonArray => "application/json",
        }
    }
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::CrashReports,
        Feature::Logs,
        Feature::Traces,
        Feature::Rum,
        Feature::WebViewRum,
        Feature::WebViewLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rum => "rum",
            Self::Logs => "logs",
            Self::Traces => "traces",
            Self::CrashReports => "crash",
            Self::WebViewRum => "web-rum",
            Self::WebViewLogs => "web-logs",
        }
    }

    /// Directory name under the storage root.
    pub fn storage_dir(&self) -> &'static str {
        match self {
            Self::Rum => "rum",
            Self::Logs => "logs",
            Self::Traces => "traces",
            Self::CrashReports => "crash",
            Self::WebViewRum => "web-rum",
            Self::WebViewLogs => "web-logs",
        }
    }

    pub fn payload_format(&self) -> PayloadFormat {
        match self {
            Self::Rum | Self::CrashReports | Self::WebViewRum => PayloadFormat::NewlineDelimited,
            Self::Logs | Self::Traces | Self::WebViewLogs => PayloadFormat::JsonArray,
        }
    }

    /// Intake path relative to the site's base URL.
    pub fn intake_path(&self) -> &'static str {
        match self {
            Self::Rum | Self::CrashReports | Self::WebViewRum => "/api/v2/rum",
            Self::Logs | Self::WebViewLogs => "/api/v2/logs",
            Self::Traces => "/api/v2/spans",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
