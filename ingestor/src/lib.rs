//! Sigfox telemetry ingestion: per-sensor payload decoders, the device
//! routing table, and the pipeline that archives and stores each entry.

pub mod batching;
pub mod config;
pub mod db;
pub mod decode;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod pipeline;
pub mod registry;
pub mod rest;
pub mod validate;

pub use decode::{DecodeError, DecodeErrorKind, DecodeOutcome, DecodeProfile, DecodedReading};
pub use errors::{Error, Result};
pub use model::{Entry, SensorGroup, TelemetryEnvelope};
pub use pipeline::{dispatch, EntryArchive, KindStore, Pipeline};
pub use registry::DeviceRegistry;
