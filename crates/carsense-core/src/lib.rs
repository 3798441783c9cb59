//! carsense-core - shared types for the carsense diagnostic engine
//!
//! This crate holds the data model that flows between the protocol link,
//! the telemetry pipeline, and the anomaly engine, plus the static
//! configuration surface and the outbound sink boundary trait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ carsense-link        carsense-telemetry       carsense-ml    │
//! │ (transport/codec/    (scheduler/buffer/       (scoring/      │
//! │  session)             drain/worker)            retraining)   │
//! │        │                    │                      │         │
//! │        └────────────┬───────┴──────────────────────┘         │
//! │                     │                                        │
//! │              carsense-core                                   │
//! │        (model, config, TelemetrySink)                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod model;
pub mod sink;

pub use config::{
    AnomalyConfig, EngineConfig, PidSpec, PollClass, SessionTuning, TelemetryConfig,
    TransportConfig,
};
pub use model::{
    AnomalyEvent, BufferEntry, DtcStatus, ModelStatus, ModelVersion, ParameterReading,
    ProtocolFamily, Resolution, SessionInfo, SessionState, Severity, TelemetryRecord, TroubleCode,
};
pub use sink::{SinkError, TelemetrySink};
