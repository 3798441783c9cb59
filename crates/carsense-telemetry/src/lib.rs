//! Telemetry pipeline
//!
//! Readings flow through three cooperating pieces:
//!
//! ```text
//! PollSchedule -> PollWorker -> OfflineBuffer -> DrainTask -> TelemetrySink
//!                     |
//!                     +-> broadcast (anomaly scoring)
//! ```
//!
//! The worker owns the diagnostic session and is the only task that touches
//! it. Every reading is appended to the durable buffer before any forward
//! attempt; the drain task removes entries only after the sink confirms
//! delivery, so a sink outage costs latency, not data.

pub mod buffer;
pub mod drain;
pub mod schedule;
pub mod worker;

pub use buffer::{BufferError, OfflineBuffer};
pub use drain::spawn_drain;
pub use schedule::PollSchedule;
pub use worker::{spawn_worker, WorkerError, WorkerHandle};
