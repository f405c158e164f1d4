use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use crate::error::StoreError;
use crate::orchestrator::BatchFileOrchestrator;

/// Appends newline-terminated records to the orchestrator's writable file.
#[derive(Clone, Debug)]
pub struct BatchFileWriter {
    orchestrator: Arc<BatchFileOrchestrator>,
}

impl BatchFileWriter {
    pub fn new(orchestrator: Arc<BatchFileOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Check a record against the framing and size rules without writing it.
    pub fn validate(&self, record: &[u8]) -> Result<(), StoreError> {
        validate_record(record, self.orchestrator.config().max_item_size)
    }

    pub fn append(&self, record: &[u8]) -> Result<(), StoreError> {
        self.validate(record)?;
        let incoming = record.len() as u64 + 1;
        self.orchestrator.with_writable_file(incoming, |path| {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            let mut line = Vec::with_capacity(record.len() + 1);
            line.extend_from_slice(record);
            line.push(b'\n');
            file.write_all(&line)?;
            Ok(())
        })
    }
}

pub(crate) fn validate_record(record: &[u8], max_item_size: u64) -> Result<(), StoreError> {
    if record.is_empty() {
        return Err(StoreError::InvalidRecord("empty record".into()));
    }
    let size = record.len() as u64;
    if size > max_item_size {
        return Err(StoreError::ItemTooLarge {
            size,
            max: max_item_size,
        });
    }
    if record.contains(&b'\n') {
        return Err(StoreError::InvalidRecord("record contains a newline".into()));
    }
    Ok(())
}
