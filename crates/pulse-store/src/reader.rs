use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use pulse_core::{Batch, BatchId, DataReader};
use tracing::{debug, error, warn};

use crate::orchestrator::{batch_created_at, delete_file, BatchFileOrchestrator};

/// Hands out batch files one at a time. Locks live only in memory, so a
/// batch locked when the process died is readable again after restart.
#[derive(Debug)]
pub struct BatchFileReader {
    orchestrator: Arc<BatchFileOrchestrator>,
    locked: Mutex<HashSet<PathBuf>>,
}

impl BatchFileReader {
    pub fn new(orchestrator: Arc<BatchFileOrchestrator>) -> Self {
        Self {
            orchestrator,
            locked: Mutex::new(HashSet::new()),
        }
    }

    pub fn locked_count(&self) -> usize {
        self.locked.lock().len()
    }

    pub fn is_locked(&self, id: &BatchId) -> bool {
        self.locked.lock().contains(&self.path_of(id))
    }

    fn path_of(&self, id: &BatchId) -> PathBuf {
        self.orchestrator.dir().join(id.as_str())
    }
}

fn read_records(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(<[u8]>::to_vec)
        .collect()
}

impl DataReader for BatchFileReader {
    fn lock_and_read_next(&self) -> Option<Batch> {
        let mut locked = self.locked.lock();
        loop {
            let path = match self.orchestrator.readable_file(&locked) {
                Ok(Some(path)) => path,
                Ok(None) => return None,
                Err(e) => {
                    error!(dir = %self.orchestrator.dir().display(), error = %e, "failed to list batch files");
                    return None;
                }
            };
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(BatchId::new) else {
                return None;
            };
            match fs::read(&path) {
                Ok(bytes) => {
                    let batch = Batch {
                        id,
                        size: bytes.len() as u64,
                        records: read_records(&bytes),
                        created_at_ms: batch_created_at(&path).unwrap_or_default(),
                    };
                    locked.insert(path);
                    debug!(batch_id = %batch.id, items = batch.item_count(), "locked batch");
                    return Some(batch);
                }
                // Deleted between listing and reading, look again.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    error!(batch_id = %id, error = %e, "unreadable batch file, discarding");
                    if let Err(e) = delete_file(&path) {
                        error!(batch_id = %id, error = %e, "failed to discard unreadable batch file");
                        return None;
                    }
                }
            }
        }
    }

    fn drop_batch(&self, batch: Batch) {
        let path = self.path_of(&batch.id);
        let mut locked = self.locked.lock();
        if !locked.remove(&path) {
            warn!(batch_id = %batch.id, "drop requested for a batch that is not locked");
            return;
        }
        match delete_file(&path) {
            Ok(()) => debug!(batch_id = %batch.id, "dropped batch"),
            Err(e) => error!(batch_id = %batch.id, error = %e, "failed to delete batch file"),
        }
    }

    fn release_batch(&self, batch: Batch) {
        let path = self.path_of(&batch.id);
        if !self.locked.lock().remove(&path) {
            warn!(batch_id = %batch.id, "release requested for a batch that is not locked");
            return;
        }
        debug!(batch_id = %batch.id, "released batch");
    }
}
