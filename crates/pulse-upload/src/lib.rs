//! Upload side of the pipeline: frames stored batches, sends them to the
//! intake and decides when the next drain pass runs.

pub mod errors;
pub mod http;
pub mod mock;
pub mod payload;
pub mod scheduler;
pub mod uploader;
pub mod worker;

pub use errors::{Result, UploadError};
pub use http::{HttpUploader, HttpUploaderConfig};
pub use mock::MockUploader;
pub use payload::PayloadDecoration;
pub use scheduler::{next_delay, SchedulerConfig, UploadScheduler};
pub use uploader::{DataUploader, UploadRequest};
pub use worker::{FeatureReport, UploadReport, UploadTarget, UploadWorker};
