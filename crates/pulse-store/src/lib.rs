//! File-backed batch storage.
//!
//! Each feature owns a directory of batch files named after their creation
//! time. Records are appended one per line; readers lock a whole file,
//! then either drop it after a successful upload or release it for a later
//! attempt.

pub mod config;
pub mod error;
pub mod executor;
pub mod migration;
pub mod orchestrator;
pub mod reader;
pub mod storage;
pub mod writer;

pub use config::FilePersistenceConfig;
pub use error::StoreError;
pub use executor::PersistenceExecutor;
pub use migration::{DataMigration, MoveDataMigration, WipeDataMigration};
pub use orchestrator::BatchFileOrchestrator;
pub use reader::BatchFileReader;
pub use storage::{BatchInfo, FeatureStorage, FeatureWriter};
pub use writer::BatchFileWriter;
