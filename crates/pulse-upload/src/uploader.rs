use async_trait::async_trait;
use bytes::Bytes;
use pulse_core::{Batch, BatchId, Feature, UploadStatus};

use crate::payload::PayloadDecoration;

/// One framed batch ready to be sent.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub feature: Feature,
    pub batch_id: BatchId,
    pub item_count: usize,
    pub body: Bytes,
}

impl UploadRequest {
    pub fn from_batch(feature: Feature, batch: &Batch) -> Self {
        let decoration = PayloadDecoration::for_format(feature.payload_format());
        Self {
            feature,
            batch_id: batch.id.clone(),
            item_count: batch.item_count(),
            body: decoration.frame(&batch.records),
        }
    }
}

/// Sends one request and reports how it went. Implementations never fail;
/// transport problems come back as [`UploadStatus::NetworkError`].
#[async_trait]
pub trait DataUploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> UploadStatus;
}
