//! Outbound telemetry sink boundary
//!
//! The gateway that consumes telemetry lives outside this system; the engine
//! only pushes into this trait. Delivery order follows the pipeline's FIFO
//! guarantee, and non-contiguous sequence numbers are reported explicitly.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AnomalyEvent, ParameterReading};

/// Sink-side failure; the pipeline keeps the affected entries buffered
#[derive(Debug, Error, Clone)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

/// Push interface toward the external telemetry consumer
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Deliver one reading; an error leaves the entry in the offline buffer
    async fn publish_reading(&self, reading: &ParameterReading) -> Result<(), SinkError>;

    /// Deliver one anomaly event
    async fn publish_event(&self, event: &AnomalyEvent) -> Result<(), SinkError>;

    /// Report a sequence gap. `from_seq` is the last delivered sequence and
    /// `to_seq` the next one; the readings strictly between them were lost.
    async fn gap_detected(&self, from_seq: u64, to_seq: u64);
}
