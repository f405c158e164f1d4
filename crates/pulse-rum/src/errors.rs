use thiserror::Error;

#[derive(Debug, Error)]
pub enum RumError {
    #[error("rum monitor is not running")]
    MonitorClosed,

    #[error("rum monitor worker exited unexpectedly")]
    WorkerExited,
}

impl RumError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MonitorClosed => "monitor_closed",
            Self::WorkerExited => "worker_exited",
        }
    }
}

pub type Result<T> = std::result::Result<T, RumError>;
