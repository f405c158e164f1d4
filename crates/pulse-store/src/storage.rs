use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use pulse_core::{DataReader, DataWriter, Feature, Serializer, TrackingConsent};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::FilePersistenceConfig;
use crate::error::StoreError;
use crate::executor::PersistenceExecutor;
use crate::migration::migration_for;
use crate::orchestrator::BatchFileOrchestrator;
use crate::reader::BatchFileReader;
use crate::writer::{validate_record, BatchFileWriter};

/// Summary of one batch file, for inspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchInfo {
    pub feature: Feature,
    pub id: String,
    pub consent: TrackingConsent,
    pub size: u64,
    pub items: usize,
    pub created_at_ms: i64,
}

/// Storage of one feature: a pending directory for data collected before
/// consent is known and a granted directory that feeds the uploader.
pub struct FeatureStorage {
    feature: Feature,
    pending: Arc<BatchFileOrchestrator>,
    granted: Arc<BatchFileOrchestrator>,
    reader: Arc<BatchFileReader>,
    consent: RwLock<TrackingConsent>,
    executor: Arc<PersistenceExecutor>,
}

impl FeatureStorage {
    pub fn new(
        root: &Path,
        feature: Feature,
        config: FilePersistenceConfig,
        consent: TrackingConsent,
        executor: Arc<PersistenceExecutor>,
    ) -> Arc<Self> {
        let granted_dir = root.join(feature.storage_dir());
        let pending_dir = root.join(format!("{}-pending", feature.storage_dir()));
        let granted = Arc::new(BatchFileOrchestrator::new(granted_dir, config.clone()));
        let pending = Arc::new(BatchFileOrchestrator::new(pending_dir, config));
        let storage = Arc::new(Self {
            feature,
            reader: Arc::new(BatchFileReader::new(granted.clone())),
            pending,
            granted,
            consent: RwLock::new(consent),
            executor,
        });
        storage.schedule_migration(None, consent);
        storage
    }

    pub fn feature(&self) -> Feature {
        self.feature
    }

    pub fn consent(&self) -> TrackingConsent {
        *self.consent.read()
    }

    pub fn granted_dir(&self) -> &Path {
        self.granted.dir()
    }

    pub fn pending_dir(&self) -> &Path {
        self.pending.dir()
    }

    /// Switch consent. Migrations run on the persistence executor, after
    /// every write queued before the switch.
    pub fn set_consent(&self, next: TrackingConsent) {
        let previous = std::mem::replace(&mut *self.consent.write(), next);
        if previous == next {
            return;
        }
        info!(feature = %self.feature, ?previous, ?next, "tracking consent changed");
        self.schedule_migration(Some(previous), next);
    }

    fn schedule_migration(&self, previous: Option<TrackingConsent>, next: TrackingConsent) {
        let Some(migration) = migration_for(previous, next, self.pending.dir(), self.granted.dir())
        else {
            return;
        };
        if !self.executor.submit(move || migration.run()) {
            warn!(feature = %self.feature, "executor shut down, consent migration skipped");
        }
    }

    /// Queue one serialized record. Returns whether it was accepted.
    pub fn write_record(&self, record: Vec<u8>) -> bool {
        let target = match self.consent() {
            TrackingConsent::Granted => self.granted.clone(),
            TrackingConsent::Pending => self.pending.clone(),
            TrackingConsent::NotGranted => {
                debug!(feature = %self.feature, "consent not granted, event dropped");
                return false;
            }
        };
        if let Err(e) = validate_record(&record, target.config().max_item_size) {
            error!(feature = %self.feature, error = %e, "event rejected by storage");
            return false;
        }
        let feature = self.feature;
        let submitted = self.executor.submit(move || {
            if let Err(e) = BatchFileWriter::new(target).append(&record) {
                error!(feature = %feature, error = %e, "failed to persist event");
            }
        });
        if !submitted {
            warn!(feature = %self.feature, "executor shut down, event dropped");
        }
        submitted
    }

    /// Close the files being appended to so the next read can take them.
    /// Used once writes have stopped, before a final upload pass.
    pub fn seal(&self) {
        self.granted.close_writable_file();
        self.pending.close_writable_file();
    }

    pub fn writer<T>(self: &Arc<Self>, serializer: Arc<dyn Serializer<T>>) -> FeatureWriter<T> {
        FeatureWriter {
            storage: self.clone(),
            serializer,
        }
    }

    pub fn reader(&self) -> Arc<dyn DataReader> {
        self.reader.clone()
    }

    pub fn batch_reader(&self) -> Arc<BatchFileReader> {
        self.reader.clone()
    }

    /// Batches on disk in both directories, oldest first within each.
    pub fn list_batches(&self) -> Result<Vec<BatchInfo>, StoreError> {
        let mut out = Vec::new();
        for (orchestrator, consent) in [
            (&self.granted, TrackingConsent::Granted),
            (&self.pending, TrackingConsent::Pending),
        ] {
            for (created_at_ms, path) in orchestrator.batch_files()? {
                out.push(self.describe(&path, created_at_ms, consent)?);
            }
        }
        Ok(out)
    }

    fn describe(
        &self,
        path: &Path,
        created_at_ms: i64,
        consent: TrackingConsent,
    ) -> Result<BatchInfo, StoreError> {
        let bytes = std::fs::read(path)?;
        Ok(BatchInfo {
            feature: self.feature,
            id: path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string(),
            consent,
            size: bytes.len() as u64,
            items: bytes.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count(),
            created_at_ms,
        })
    }
}

/// Serializes events and queues them on a [`FeatureStorage`].
pub struct FeatureWriter<T> {
    storage: Arc<FeatureStorage>,
    serializer: Arc<dyn Serializer<T>>,
}

impl<T> DataWriter<T> for FeatureWriter<T> {
    fn write(&self, event: &T) -> bool {
        match self.serializer.serialize(event) {
            Ok(json) => self.storage.write_record(json.into_bytes()),
            Err(e) => {
                error!(feature = %self.storage.feature, error = %e, "failed to serialize event");
                false
            }
        }
    }
}
