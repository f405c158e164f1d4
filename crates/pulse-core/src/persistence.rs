use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::CodecError;

/// Identifier of a stored batch (its file name).
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Records read out of one batch file.
///
/// A batch is handed out by [`DataReader::lock_and_read_next`] and must be
/// given back exactly once through [`DataReader::drop_batch`] or
/// [`DataReader::release_batch`]. It is intentionally not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct Batch {
    pub id: BatchId,
    pub records: Vec<Vec<u8>>,
    pub size: u64,
    pub created_at_ms: i64,
}

impl Batch {
    pub fn item_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Appends one event to durable storage. Returns whether the event was
/// accepted; failures are logged by the implementation.
pub trait DataWriter<T>: Send + Sync {
    fn write(&self, event: &T) -> bool;
}

/// Exclusive, oldest-first access to stored batches.
pub trait DataReader: Send + Sync {
    /// Lock the oldest eligible batch that no one else holds.
    fn lock_and_read_next(&self) -> Option<Batch>;

    /// Delete a consumed batch.
    fn drop_batch(&self, batch: Batch);

    /// Unlock a batch so a later call can return it again.
    fn release_batch(&self, batch: Batch);
}

pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, model: &T) -> Result<String, CodecError>;
}

pub trait Deserializer<T>: Send + Sync {
    fn deserialize(&self, raw: &str) -> Result<T, CodecError>;
}

/// User consent governing whether events are stored and uploaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingConsent {
    Granted,
    NotGranted,
    #[default]
    Pending,
}

/// Writer that accepts nothing, used when a feature is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpWriter;

impl<T> DataWriter<T> for NoOpWriter {
    fn write(&self, _event: &T) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_counts_records() {
        let batch = Batch {
            id: BatchId::new("1700000000000"),
            records: vec![b"a".to_vec(), b"bc".to_vec()],
            size: 3,
            created_at_ms: 1_700_000_000_000,
        };
        assert_eq!(batch.item_count(), 2);
        assert!(!batch.is_empty());
        assert_eq!(batch.id.to_string(), "1700000000000");
    }

    #[test]
    fn consent_wire_names() {
        assert_eq!(
            serde_json::to_string(&TrackingConsent::NotGranted).unwrap(),
            r#""not_granted""#
        );
        assert_eq!(TrackingConsent::default(), TrackingConsent::Pending);
    }

    #[test]
    fn noop_writer_rejects() {
        let writer = NoOpWriter;
        assert!(!DataWriter::<u32>::write(&writer, &1));
    }
}
