//! # pulse
//!
//! Client-side RUM SDK. [`Sdk::initialize`] wires settings into per-feature
//! batch storage, the RUM monitor and the upload scheduler; the returned
//! [`SdkHandle`] is the instrumentation surface and owns the shutdown drain.

#![deny(unsafe_code)]

pub mod errors;
pub mod records;
pub mod sdk;

pub use errors::{Result, SdkError};
pub use records::JsonRecordSerializer;
pub use sdk::{
    enabled_features, http_uploader, open_storages, persistence_config, Sdk, SdkBuilder,
    SdkHandle, ShutdownReport,
};

pub use pulse_core as core;
pub use pulse_rum as rum;
pub use pulse_settings as settings;
