//! Drain task
//!
//! Flushes the offline buffer to the telemetry sink in FIFO order. Entries
//! are acknowledged only after the sink confirms delivery, so a sink outage
//! leaves them buffered for the next tick. Sequence gaps between consecutive
//! delivered readings are reported through `gap_detected`; a sequence lower
//! than the last delivered one marks a new session and resets tracking.

use std::sync::Arc;
use std::time::Duration;

use carsense_core::model::TelemetryRecord;
use carsense_core::sink::TelemetrySink;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::buffer::OfflineBuffer;

pub fn spawn_drain(
    buffer: Arc<OfflineBuffer>,
    sink: Arc<dyn TelemetrySink>,
    batch: usize,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_sequence: Option<u64> = None;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            drain_once(&buffer, sink.as_ref(), batch, &mut last_sequence).await;
        }
    })
}

/// Deliver at most one batch; returns the number of entries acknowledged
pub async fn drain_once(
    buffer: &OfflineBuffer,
    sink: &dyn TelemetrySink,
    batch: usize,
    last_sequence: &mut Option<u64>,
) -> usize {
    let entries = buffer.peek_batch(batch);
    if entries.is_empty() {
        return 0;
    }

    let mut delivered = 0;
    for entry in &entries {
        let result = match &entry.record {
            TelemetryRecord::Reading(reading) => {
                match *last_sequence {
                    Some(last) if reading.sequence > last + 1 => {
                        sink.gap_detected(last, reading.sequence).await;
                    }
                    Some(last) if reading.sequence <= last => {
                        // A restarted session begins a new sequence run
                        debug!(
                            last,
                            sequence = reading.sequence,
                            "sequence restarted, new session"
                        );
                    }
                    _ => {}
                }
                let result = sink.publish_reading(reading).await;
                if result.is_ok() {
                    *last_sequence = Some(reading.sequence);
                }
                result
            }
            TelemetryRecord::Event(event) => sink.publish_event(event).await,
        };

        match result {
            Ok(()) => delivered += 1,
            Err(e) => {
                warn!(%e, delivered, "sink unavailable, keeping remaining entries");
                break;
            }
        }
    }

    if delivered > 0 {
        if let Err(e) = buffer.ack(delivered) {
            warn!(%e, "failed to acknowledge delivered entries");
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use carsense_core::model::{ParameterReading, TelemetryRecord};
    use carsense_core::sink::SinkError;
    use chrono::Utc;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingSink {
        readings: Mutex<Vec<u64>>,
        gaps: Mutex<Vec<(u64, u64)>>,
        fail_after: Mutex<Option<usize>>,
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn publish_reading(&self, reading: &ParameterReading) -> Result<(), SinkError> {
            let mut fail_after = self.fail_after.lock();
            if let Some(left) = fail_after.as_mut() {
                if *left == 0 {
                    return Err(SinkError::Unavailable("down".to_string()));
                }
                *left -= 1;
            }
            self.readings.lock().push(reading.sequence);
            Ok(())
        }

        async fn publish_event(
            &self,
            _event: &carsense_core::model::AnomalyEvent,
        ) -> Result<(), SinkError> {
            Ok(())
        }

        async fn gap_detected(&self, from_seq: u64, to_seq: u64) {
            self.gaps.lock().push((from_seq, to_seq));
        }
    }

    fn reading(sequence: u64) -> TelemetryRecord {
        TelemetryRecord::Reading(ParameterReading {
            parameter_id: "engine_rpm".to_string(),
            value: 0.0,
            unit: "rpm".to_string(),
            sample_time: Utc::now(),
            sequence,
        })
    }

    fn buffer_with(sequences: &[u64]) -> (tempfile::TempDir, OfflineBuffer) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = OfflineBuffer::open(dir.path().join("t.log"), 100).unwrap();
        for &seq in sequences {
            buffer.append(reading(seq)).unwrap();
        }
        (dir, buffer)
    }

    #[tokio::test]
    async fn delivers_in_fifo_order_with_sequences_preserved() {
        let (_dir, buffer) = buffer_with(&[1, 2, 3]);
        let sink = RecordingSink::default();
        let mut last = None;

        let delivered = drain_once(&buffer, &sink, 10, &mut last).await;

        assert_eq!(delivered, 3);
        assert_eq!(*sink.readings.lock(), vec![1, 2, 3]);
        assert!(buffer.is_empty());
        assert!(sink.gaps.lock().is_empty());
    }

    #[tokio::test]
    async fn reports_gap_between_delivered_sequences() {
        let (_dir, buffer) = buffer_with(&[1, 2, 5, 6]);
        let sink = RecordingSink::default();
        let mut last = None;

        drain_once(&buffer, &sink, 10, &mut last).await;

        assert_eq!(*sink.gaps.lock(), vec![(2, 5)]);
    }

    #[tokio::test]
    async fn sequence_restart_is_not_a_gap() {
        let (_dir, buffer) = buffer_with(&[8, 9, 1, 2]);
        let sink = RecordingSink::default();
        let mut last = None;

        drain_once(&buffer, &sink, 10, &mut last).await;

        assert!(sink.gaps.lock().is_empty());
        assert_eq!(*sink.readings.lock(), vec![8, 9, 1, 2]);
    }

    #[tokio::test]
    async fn sink_failure_keeps_undelivered_entries() {
        let (_dir, buffer) = buffer_with(&[1, 2, 3, 4]);
        let sink = RecordingSink::default();
        *sink.fail_after.lock() = Some(2);
        let mut last = None;

        let delivered = drain_once(&buffer, &sink, 10, &mut last).await;

        assert_eq!(delivered, 2);
        assert_eq!(buffer.len(), 2);

        // Recovery resumes where delivery stopped
        *sink.fail_after.lock() = None;
        drain_once(&buffer, &sink, 10, &mut last).await;
        assert_eq!(*sink.readings.lock(), vec![1, 2, 3, 4]);
        assert!(buffer.is_empty());
    }
}
