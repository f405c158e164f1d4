//! Real-user monitoring: the scope tree that turns instrumentation calls
//! into finalized view, action, resource, error and long task events, the
//! SDK self-telemetry handler and the JSON codec for what gets written.

pub mod codec;
pub mod config;
pub mod errors;
pub mod mapper;
pub mod monitor;
pub mod processor;
pub mod scope;
pub mod telemetry;

pub use codec::{RumEventDeserializer, RumEventSerializer};
pub use config::RumConfig;
pub use errors::RumError;
pub use mapper::EventMapper;
pub use monitor::{ErrorReport, ResourceFailure, RumMonitor};
pub use processor::RumProcessor;
pub use scope::ScopeEnv;
pub use telemetry::{TelemetryEventHandler, TelemetryOutcome};
