//! SDK lifecycle: wiring settings into storage, the RUM monitor and the
//! upload scheduler, and draining all of it on shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::raw::CoreConfiguration;
use pulse_core::time::SyncedTimeProvider;
use pulse_core::{
    DataWriter, Feature, GlobalState, RateBasedSampler, RumEvent, Sampler, TrackingConsent,
};
use pulse_rum::{
    EventMapper, RumConfig, RumEventSerializer, RumMonitor, RumProcessor, ScopeEnv,
    TelemetryEventHandler,
};
use pulse_settings::{validate, FeatureSettings, PersistenceSettings, PulseSettings};
use pulse_store::{FeatureStorage, FeatureWriter, FilePersistenceConfig, PersistenceExecutor};
use pulse_telemetry::PipelineMetrics;
use pulse_upload::{
    DataUploader, HttpUploader, HttpUploaderConfig, SchedulerConfig, UploadReport,
    UploadScheduler, UploadTarget, UploadWorker,
};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::errors::{Result, SdkError};
use crate::records::JsonRecordSerializer;

static INSTANCE: Mutex<Option<Arc<SdkHandle>>> = Mutex::new(None);

/// Optional process-wide holder for one [`SdkHandle`].
///
/// Nothing inside the SDK reads this slot: scopes, storages and the upload
/// scheduler only see what [`SdkBuilder::build`] hands them. Hosts that keep
/// their own handle can skip `Sdk` entirely and run several independent
/// instances side by side.
pub struct Sdk;

impl Sdk {
    /// Initialize the shared instance. A second call returns the running
    /// instance and ignores the new settings.
    pub fn initialize(settings: PulseSettings) -> Result<Arc<SdkHandle>> {
        Self::initialize_with(SdkBuilder::new(settings))
    }

    pub fn initialize_with(builder: SdkBuilder) -> Result<Arc<SdkHandle>> {
        let mut slot = INSTANCE.lock();
        if let Some(handle) = slot.as_ref() {
            warn!("SDK already initialized, new configuration ignored");
            return Ok(handle.clone());
        }
        let handle = Arc::new(builder.build()?);
        *slot = Some(handle.clone());
        Ok(handle)
    }

    pub fn instance() -> Option<Arc<SdkHandle>> {
        INSTANCE.lock().clone()
    }

    /// Drain and release the shared instance so a later `initialize` starts fresh.
    pub async fn stop() -> Option<ShutdownReport> {
        let handle = INSTANCE.lock().take()?;
        Some(handle.drain_and_shutdown().await)
    }
}

/// Features registered for a settings file, in upload order.
pub fn enabled_features(features: &FeatureSettings) -> Vec<Feature> {
    let mut out = Vec::new();
    if features.crash_reports {
        out.push(Feature::CrashReports);
    }
    if features.logs {
        out.push(Feature::Logs);
    }
    if features.traces {
        out.push(Feature::Traces);
    }
    if features.rum {
        out.push(Feature::Rum);
    }
    if features.web_view {
        out.push(Feature::WebViewRum);
        out.push(Feature::WebViewLogs);
    }
    out
}

pub fn persistence_config(settings: &PersistenceSettings) -> FilePersistenceConfig {
    FilePersistenceConfig {
        recent_delay: Duration::from_millis(settings.recent_delay_ms),
        max_batch_size: settings.max_batch_bytes,
        max_item_size: settings.max_item_bytes,
        max_items_per_batch: settings.max_items_per_batch,
        old_file_threshold: Duration::from_millis(settings.old_file_threshold_ms),
        max_disk_space: settings.max_disk_bytes,
    }
}

/// Open the storage of every enabled feature under the configured root.
pub fn open_storages(
    settings: &PulseSettings,
    executor: &Arc<PersistenceExecutor>,
) -> BTreeMap<Feature, Arc<FeatureStorage>> {
    let root = settings.persistence.storage_root();
    let config = persistence_config(&settings.persistence);
    let consent = settings.persistence.tracking_consent;
    enabled_features(&settings.features)
        .into_iter()
        .map(|feature| {
            let storage = FeatureStorage::new(&root, feature, config.clone(), consent, executor.clone());
            (feature, storage)
        })
        .collect()
}

/// HTTP uploader for the configured intake.
pub fn http_uploader(settings: &PulseSettings, time: Arc<SyncedTimeProvider>) -> Result<HttpUploader> {
    let identity = &settings.identity;
    let token = identity
        .client_token
        .clone()
        .filter(|t| !t.expose_secret().is_empty())
        .ok_or(SdkError::MissingClientToken)?;
    let uploader = HttpUploader::new(HttpUploaderConfig {
        site: identity.site.clone(),
        client_token: token,
        source: identity.source.clone(),
        sdk_version: pulse_rum::config::SDK_VERSION.to_string(),
        request_timeout: settings.upload.request_timeout(),
    })?;
    Ok(uploader.with_time_sync(time))
}

fn core_configuration(settings: &PulseSettings) -> CoreConfiguration {
    CoreConfiguration {
        use_proxy: settings.upload.use_proxy,
        use_local_encryption: settings.upload.use_local_encryption,
        track_errors: settings.rum.track_errors,
        batch_size: i64::try_from(settings.persistence.max_items_per_batch).unwrap_or(i64::MAX),
        batch_upload_frequency: i64::try_from(settings.upload.frequency.base_step().as_millis())
            .unwrap_or(i64::MAX),
    }
}

pub struct SdkBuilder {
    settings: PulseSettings,
    uploader: Option<Arc<dyn DataUploader>>,
    mapper: Option<Arc<dyn EventMapper>>,
    metrics: Option<Arc<PipelineMetrics>>,
    session_sampler: Option<Arc<dyn Sampler>>,
    upload_enabled: bool,
}

impl SdkBuilder {
    pub fn new(settings: PulseSettings) -> Self {
        Self {
            settings,
            uploader: None,
            mapper: None,
            metrics: None,
            session_sampler: None,
            upload_enabled: true,
        }
    }

    /// Replace the HTTP uploader.
    pub fn uploader(mut self, uploader: Arc<dyn DataUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn mapper(mut self, mapper: Arc<dyn EventMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn session_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.session_sampler = Some(sampler);
        self
    }

    /// Collect and store only; nothing is scheduled or sent.
    pub fn without_upload(mut self) -> Self {
        self.upload_enabled = false;
        self
    }

    pub fn build(self) -> Result<SdkHandle> {
        validate(&self.settings)?;
        tokio::runtime::Handle::try_current().map_err(|_| SdkError::NoRuntime)?;

        let settings = self.settings;
        let time = Arc::new(SyncedTimeProvider::new());
        let executor = Arc::new(PersistenceExecutor::new("pulse-persistence")?);
        let storages = open_storages(&settings, &executor);

        let upload = if self.upload_enabled {
            let uploader: Arc<dyn DataUploader> = match self.uploader {
                Some(uploader) => uploader,
                None => Arc::new(http_uploader(&settings, time.clone())?),
            };
            let targets = storages
                .iter()
                .map(|(feature, storage)| UploadTarget::new(*feature, storage.reader()))
                .collect();
            let mut worker = UploadWorker::new(targets, uploader);
            if let Some(metrics) = &self.metrics {
                worker = worker.with_metrics(metrics.clone());
            }
            let worker = Arc::new(worker);
            let scheduler = UploadScheduler::start(
                worker.clone(),
                SchedulerConfig {
                    base_step: settings.upload.frequency.base_step(),
                    drain_timeout: settings.upload.drain_timeout(),
                },
            );
            Some(UploadPipeline { worker, scheduler })
        } else {
            None
        };

        let monitor = storages.get(&Feature::Rum).map(|storage| {
            let config = RumConfig::from_settings(&settings);
            let globals = GlobalState::new();
            let sampler = self
                .session_sampler
                .unwrap_or_else(|| Arc::new(RateBasedSampler::new(config.session_sample_rate)));
            let env = ScopeEnv::new(config.clone(), globals.clone(), time.clone(), sampler);
            let telemetry = TelemetryEventHandler::new(config, globals, time.clone());
            let writer: Arc<dyn DataWriter<RumEvent>> =
                Arc::new(storage.writer(Arc::new(RumEventSerializer)));
            let mut processor = RumProcessor::new(env, telemetry, writer);
            if let Some(mapper) = self.mapper {
                processor = processor.with_mapper(mapper);
            }
            if let Some(metrics) = &self.metrics {
                processor = processor.with_metrics(metrics.clone());
            }
            let monitor = RumMonitor::start(processor);
            monitor.send_configuration_telemetry(core_configuration(&settings));
            monitor
        });

        info!(
            features = ?storages.keys().collect::<Vec<_>>(),
            storage_root = %settings.persistence.storage_root().display(),
            upload = upload.is_some(),
            consent = ?settings.persistence.tracking_consent,
            "SDK initialized"
        );

        Ok(SdkHandle {
            settings,
            monitor,
            storages,
            executor,
            upload,
            time,
            stopped: AtomicBool::new(false),
        })
    }
}

struct UploadPipeline {
    worker: Arc<UploadWorker>,
    scheduler: UploadScheduler,
}

/// What a shutdown managed to flush.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Persistence jobs run inline after the executor closed.
    pub inline_jobs: usize,
    pub final_upload: Option<UploadReport>,
}

pub struct SdkHandle {
    settings: PulseSettings,
    monitor: Option<RumMonitor>,
    storages: BTreeMap<Feature, Arc<FeatureStorage>>,
    executor: Arc<PersistenceExecutor>,
    upload: Option<UploadPipeline>,
    time: Arc<SyncedTimeProvider>,
    stopped: AtomicBool,
}

impl SdkHandle {
    pub fn settings(&self) -> &PulseSettings {
        &self.settings
    }

    /// The RUM monitor, when the RUM feature is enabled.
    pub fn rum(&self) -> Option<&RumMonitor> {
        self.monitor.as_ref()
    }

    pub fn storage(&self, feature: Feature) -> Option<&Arc<FeatureStorage>> {
        self.storages.get(&feature)
    }

    /// Writer for externally shaped JSON records (logs, spans, web-view events).
    pub fn record_writer(&self, feature: Feature) -> Option<FeatureWriter<Value>> {
        self.storages
            .get(&feature)
            .map(|storage| storage.writer(Arc::new(JsonRecordSerializer)))
    }

    pub fn time_provider(&self) -> Arc<SyncedTimeProvider> {
        self.time.clone()
    }

    pub fn set_tracking_consent(&self, consent: TrackingConsent) {
        for storage in self.storages.values() {
            storage.set_consent(consent);
        }
    }

    /// Run one upload pass now, outside the schedule.
    pub async fn upload_now(&self) -> UploadReport {
        match &self.upload {
            Some(pipeline) => pipeline.worker.run_once().await,
            None => UploadReport::default(),
        }
    }

    /// Stop accepting events, persist what is queued and run a final upload
    /// pass. Only the first call does anything.
    pub async fn drain_and_shutdown(&self) -> ShutdownReport {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }
        let drain_timeout = self.settings.upload.drain_timeout();

        if let Some(monitor) = &self.monitor {
            if let Err(e) = monitor.shutdown().await {
                warn!(error = %e, "rum monitor did not shut down cleanly");
            }
        }

        let executor = self.executor.clone();
        let inline_jobs =
            match tokio::task::spawn_blocking(move || executor.drain_and_shutdown(drain_timeout)).await {
                Ok(count) => count,
                Err(e) => {
                    error!(error = %e, "persistence drain task failed");
                    0
                }
            };

        for storage in self.storages.values() {
            storage.seal();
        }

        let final_upload = match &self.upload {
            Some(pipeline) => pipeline.scheduler.shutdown().await,
            None => None,
        };

        info!(
            inline_jobs,
            uploaded = final_upload.as_ref().map_or(0, UploadReport::uploaded),
            "SDK shut down"
        );
        ShutdownReport {
            inline_jobs,
            final_upload,
        }
    }
}
