//! One drain pass over every registered feature.
//!
//! Features drain concurrently. Inside a feature batches go one at a time,
//! oldest first. Failed batches stay locked until the feature is exhausted
//! and are then released together, so a pass never retries a batch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use pulse_core::{Batch, BatchId, DataReader, Feature, UploadStatus};
use pulse_telemetry::{PipelineMetrics, UPLOAD_BATCHES, UPLOAD_DURATION_MS};
use tracing::{debug, error, info, warn};

use crate::uploader::{DataUploader, UploadRequest};

/// A feature and the reader its batches come from.
#[derive(Clone)]
pub struct UploadTarget {
    pub feature: Feature,
    pub reader: Arc<dyn DataReader>,
}

impl UploadTarget {
    pub fn new(feature: Feature, reader: Arc<dyn DataReader>) -> Self {
        Self { feature, reader }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureReport {
    pub feature: Option<Feature>,
    pub uploaded: usize,
    pub uploaded_items: usize,
    pub failed: usize,
    pub empty: usize,
    pub last_failure: Option<UploadStatus>,
}

impl FeatureReport {
    fn new(feature: Feature) -> Self {
        Self {
            feature: Some(feature),
            ..Self::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.uploaded + self.failed
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub features: Vec<FeatureReport>,
}

impl UploadReport {
    pub fn uploaded(&self) -> usize {
        self.features.iter().map(|f| f.uploaded).sum()
    }

    pub fn failed(&self) -> usize {
        self.features.iter().map(|f| f.failed).sum()
    }

    pub fn attempted(&self) -> usize {
        self.features.iter().map(FeatureReport::attempted).sum()
    }

    /// At least one batch went out and none failed.
    pub fn all_succeeded(&self) -> bool {
        self.attempted() > 0 && self.failed() == 0
    }

    pub fn feature(&self, feature: Feature) -> Option<&FeatureReport> {
        self.features.iter().find(|f| f.feature == Some(feature))
    }
}

pub struct UploadWorker {
    targets: Vec<UploadTarget>,
    uploader: Arc<dyn DataUploader>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl UploadWorker {
    pub fn new(targets: Vec<UploadTarget>, uploader: Arc<dyn DataUploader>) -> Self {
        Self {
            targets,
            uploader,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn features(&self) -> Vec<Feature> {
        self.targets.iter().map(|t| t.feature).collect()
    }

    pub async fn run_once(&self) -> UploadReport {
        let passes = self.targets.iter().map(|target| self.drain_feature(target));
        let features = futures::future::join_all(passes).await;
        let report = UploadReport { features };
        if report.attempted() > 0 {
            info!(
                uploaded = report.uploaded(),
                failed = report.failed(),
                "upload pass finished"
            );
        }
        report
    }

    async fn drain_feature(&self, target: &UploadTarget) -> FeatureReport {
        let feature = target.feature;
        let mut report = FeatureReport::new(feature);
        let mut failed: Vec<Batch> = Vec::new();
        let mut seen: HashSet<BatchId> = HashSet::new();

        while let Some(batch) = next_batch(target).await {
            // A batch that could not be deleted comes back unlocked.
            if !seen.insert(batch.id.clone()) {
                warn!(feature = %feature, batch_id = %batch.id, "batch returned twice in one pass");
                failed.push(batch);
                break;
            }

            if batch.is_empty() {
                debug!(feature = %feature, batch_id = %batch.id, "dropping empty batch");
                report.empty += 1;
                finish(target, batch, true).await;
                continue;
            }

            let request = UploadRequest::from_batch(feature, &batch);
            let started = Instant::now();
            let status = self.uploader.upload(&request).await;
            self.record(feature, status, started);

            if status.is_success() {
                debug!(
                    feature = %feature,
                    batch_id = %batch.id,
                    items = request.item_count,
                    "batch uploaded"
                );
                report.uploaded += 1;
                report.uploaded_items += request.item_count;
                finish(target, batch, true).await;
            } else {
                if status.is_client_side() {
                    error!(feature = %feature, batch_id = %batch.id, status = %status, "batch rejected by intake");
                } else {
                    warn!(feature = %feature, batch_id = %batch.id, status = %status, "batch upload failed, will retry");
                }
                report.failed += 1;
                report.last_failure = Some(status);
                failed.push(batch);
            }
        }

        for batch in failed {
            finish(target, batch, false).await;
        }
        report
    }

    fn record(&self, feature: Feature, status: UploadStatus, started: Instant) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.incr(
            UPLOAD_BATCHES,
            &[("feature", feature.as_str()), ("status", status.as_str())],
            1,
        );
        metrics.observe(
            UPLOAD_DURATION_MS,
            &[("feature", feature.as_str())],
            started.elapsed().as_secs_f64() * 1_000.0,
        );
    }
}

async fn next_batch(target: &UploadTarget) -> Option<Batch> {
    let reader = target.reader.clone();
    match tokio::task::spawn_blocking(move || reader.lock_and_read_next()).await {
        Ok(batch) => batch,
        Err(e) => {
            error!(feature = %target.feature, error = %e, "batch read task failed");
            None
        }
    }
}

/// Drop (`consumed`) or release a batch off the async runtime.
async fn finish(target: &UploadTarget, batch: Batch, consumed: bool) {
    let reader = target.reader.clone();
    let result = tokio::task::spawn_blocking(move || {
        if consumed {
            reader.drop_batch(batch);
        } else {
            reader.release_batch(batch);
        }
    })
    .await;
    if let Err(e) = result {
        error!(feature = %target.feature, error = %e, "batch completion task failed");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use chrono::Utc;
    use pulse_store::{BatchFileOrchestrator, BatchFileReader, FilePersistenceConfig};

    use super::*;
    use crate::mock::MockUploader;

    fn reader_with(dir: &Path, contents: &[&str]) -> (Arc<BatchFileReader>, Vec<PathBuf>) {
        let base = Utc::now().timestamp_millis() - 60_000;
        let mut paths = Vec::new();
        for (i, content) in contents.iter().enumerate() {
            let path = dir.join((base + i as i64).to_string());
            fs::write(&path, content).unwrap();
            paths.push(path);
        }
        let orchestrator = Arc::new(BatchFileOrchestrator::new(
            dir,
            FilePersistenceConfig {
                recent_delay: Duration::from_millis(1),
                ..FilePersistenceConfig::default()
            },
        ));
        (Arc::new(BatchFileReader::new(orchestrator)), paths)
    }

    #[tokio::test]
    async fn failed_batch_is_released_and_successes_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, paths) = reader_with(dir.path(), &["{\"n\":1}\n", "{\"n\":2}\n", "{\"n\":3}\n"]);
        let uploader = Arc::new(MockUploader::scripted([
            UploadStatus::Success,
            UploadStatus::HttpServerError,
            UploadStatus::Success,
        ]));
        let metrics = Arc::new(PipelineMetrics::in_memory());
        let worker = UploadWorker::new(
            vec![UploadTarget::new(Feature::Rum, reader.clone())],
            uploader.clone(),
        )
        .with_metrics(metrics.clone());

        let report = worker.run_once().await;

        assert!(!paths[0].exists());
        assert!(paths[1].exists());
        assert!(!paths[2].exists());
        assert_eq!(reader.locked_count(), 0);
        assert_eq!(report.uploaded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_succeeded());
        assert_eq!(
            report.feature(Feature::Rum).unwrap().last_failure,
            Some(UploadStatus::HttpServerError)
        );

        // Oldest first, one request per batch.
        let bodies: Vec<_> = uploader.requests().into_iter().map(|r| r.body).collect();
        assert_eq!(bodies, vec!["{\"n\":1}", "{\"n\":2}", "{\"n\":3}"]);
        assert_eq!(
            metrics.counter(UPLOAD_BATCHES, &[("feature", "rum"), ("status", "success")]),
            2
        );

        // The released batch is picked up by the next pass.
        let report = worker.run_once().await;
        assert_eq!(report.uploaded(), 1);
        assert!(report.all_succeeded());
        assert!(!paths[1].exists());
    }

    #[tokio::test]
    async fn every_failure_kind_is_retried_later() {
        for status in [
            UploadStatus::NetworkError,
            UploadStatus::InvalidTokenError,
            UploadStatus::HttpClientRateLimiting,
            UploadStatus::HttpClientError,
        ] {
            let dir = tempfile::tempdir().unwrap();
            let (reader, paths) = reader_with(dir.path(), &["{}\n"]);
            let uploader = Arc::new(MockUploader::with_default(status));
            let worker = UploadWorker::new(vec![UploadTarget::new(Feature::Rum, reader)], uploader.clone());
            worker.run_once().await;
            assert!(paths[0].exists(), "{status} must keep the batch");
            assert_eq!(uploader.request_count(), 1, "no retry within a pass");
        }
    }

    #[tokio::test]
    async fn empty_batches_are_dropped_without_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, paths) = reader_with(dir.path(), &["", "[1]\n"]);
        let uploader = Arc::new(MockUploader::default());
        let worker = UploadWorker::new(vec![UploadTarget::new(Feature::Logs, reader)], uploader.clone());
        let report = worker.run_once().await;
        assert!(!paths[0].exists());
        assert_eq!(report.feature(Feature::Logs).unwrap().empty, 1);
        assert_eq!(uploader.requests()[0].body, "[[1]]");
    }

    #[tokio::test]
    async fn features_drain_independently() {
        let rum_dir = tempfile::tempdir().unwrap();
        let logs_dir = tempfile::tempdir().unwrap();
        let (rum, _) = reader_with(rum_dir.path(), &["{}\n", "{}\n"]);
        let (logs, _) = reader_with(logs_dir.path(), &["{}\n"]);
        let worker = UploadWorker::new(
            vec![
                UploadTarget::new(Feature::Rum, rum),
                UploadTarget::new(Feature::Logs, logs),
            ],
            Arc::new(MockUploader::default()),
        );
        let report = worker.run_once().await;
        assert_eq!(report.feature(Feature::Rum).unwrap().uploaded, 2);
        assert_eq!(report.feature(Feature::Logs).unwrap().uploaded, 1);
        assert_eq!(worker.features(), vec![Feature::Rum, Feature::Logs]);
    }

    #[tokio::test]
    async fn idle_pass_is_not_a_success() {
        let dir = tempfile::tempdir().unwrap();
        let (reader, _) = reader_with(dir.path(), &[]);
        let worker = UploadWorker::new(
            vec![UploadTarget::new(Feature::Rum, reader)],
            Arc::new(MockUploader::default()),
        );
        let report = worker.run_once().await;
        assert_eq!(report.attempted(), 0);
        assert!(!report.all_succeeded());
    }
}
