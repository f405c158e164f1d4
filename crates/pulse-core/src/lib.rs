//! Shared types for the pulse RUM pipeline: identifiers, clocks, context,
//! raw instrumentation events, finalized events and the persistence and
//! upload seams every other crate plugs into.

pub mod attributes;
pub mod context;
pub mod errors;
pub mod events;
pub mod feature;
pub mod ids;
pub mod persistence;
pub mod raw;
pub mod sampling;
pub mod time;
pub mod upload;

pub use attributes::Attributes;
pub use context::{GlobalState, RumContext};
pub use errors::{CodecError, CoreError};
pub use events::RumEvent;
pub use feature::{Feature, PayloadFormat};
pub use persistence::{
    Batch, BatchId, DataReader, DataWriter, Deserializer, Serializer, TrackingConsent,
};
pub use raw::{RawEvent, RawEventKind};
pub use sampling::{RateBasedSampler, Sampler};
pub use time::{Time, TimeProvider};
pub use upload::UploadStatus;
