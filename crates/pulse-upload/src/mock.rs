use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::UploadStatus;

use crate::uploader::{DataUploader, UploadRequest};

/// Uploader that answers from a script and records every request.
///
/// Statuses are consumed in order; once the script is exhausted every
/// request gets the default status.
#[derive(Debug)]
pub struct MockUploader {
    script: Mutex<VecDeque<UploadStatus>>,
    default_status: UploadStatus,
    requests: Mutex<Vec<UploadRequest>>,
}

impl Default for MockUploader {
    fn default() -> Self {
        Self::with_default(UploadStatus::Success)
    }
}

impl MockUploader {
    pub fn with_default(status: UploadStatus) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_status: status,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn scripted(statuses: impl IntoIterator<Item = UploadStatus>) -> Self {
        let mock = Self::default();
        mock.script.lock().extend(statuses);
        mock
    }

    pub fn push(&self, status: UploadStatus) {
        self.script.lock().push_back(status);
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl DataUploader for MockUploader {
    async fn upload(&self, request: &UploadRequest) -> UploadStatus {
        self.requests.lock().push(request.clone());
        self.script.lock().pop_front().unwrap_or(self.default_status)
    }
}
