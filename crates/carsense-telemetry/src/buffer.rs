//! Durable offline buffer
//!
//! Append-only JSON-lines log with an in-memory FIFO index. The log is
//! replayed on open, so buffered telemetry survives a process restart.
//! Capacity is bounded: beyond `capacity` the oldest in-memory entries are
//! evicted and counted, which makes data loss explicit instead of silent.
//! Delivered entries are compacted out of the log on checkpoint.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use carsense_core::model::{BufferEntry, TelemetryRecord};
use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Stale log lines (delivered or evicted) tolerated between compactions;
/// keeps the on-disk log bounded even when the sink never acknowledges
const CHECKPOINT_EVERY: usize = 256;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Buffer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

struct BufferInner {
    entries: VecDeque<BufferEntry>,
    writer: BufWriter<File>,
    /// Log lines whose entry has left memory, by delivery or eviction
    stale_lines: usize,
}

pub struct OfflineBuffer {
    path: PathBuf,
    capacity: usize,
    inner: Mutex<BufferInner>,
    evicted: AtomicU64,
}

impl OfflineBuffer {
    /// Open the buffer, replaying any entries left in the log
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, BufferError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut entries = VecDeque::new();
        let mut evicted = 0u64;
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<BufferEntry>(&line) {
                    Ok(entry) => entries.push_back(entry),
                    Err(e) => {
                        // A torn final write is expected after a crash
                        warn!(line = lineno + 1, %e, "skipping corrupt buffer line");
                    }
                }
            }
            while entries.len() > capacity {
                entries.pop_front();
                evicted += 1;
            }
        }

        let writer = BufWriter::new(OpenOptions::new().create(true).append(true).open(&path)?);
        debug!(path = %path.display(), replayed = entries.len(), "offline buffer open");

        Ok(Self {
            path,
            capacity,
            inner: Mutex::new(BufferInner {
                entries,
                writer,
                stale_lines: 0,
            }),
            evicted: AtomicU64::new(evicted),
        })
    }

    /// Append a record; durable before this returns
    pub fn append(&self, record: TelemetryRecord) -> Result<(), BufferError> {
        let entry = BufferEntry {
            record,
            enqueued_at: Utc::now(),
        };
        let line = serde_json::to_string(&entry)?;

        let mut inner = self.inner.lock();
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        inner.writer.get_ref().sync_data()?;

        inner.entries.push_back(entry);
        while inner.entries.len() > self.capacity {
            inner.entries.pop_front();
            inner.stale_lines += 1;
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.maybe_checkpoint(&mut inner)
    }

    /// Clone up to `n` entries from the front without removing them
    pub fn peek_batch(&self, n: usize) -> Vec<BufferEntry> {
        let inner = self.inner.lock();
        inner.entries.iter().take(n).cloned().collect()
    }

    /// Remove `n` delivered entries from the front
    pub fn ack(&self, n: usize) -> Result<(), BufferError> {
        let mut inner = self.inner.lock();
        for _ in 0..n {
            if inner.entries.pop_front().is_none() {
                break;
            }
            inner.stale_lines += 1;
        }
        self.maybe_checkpoint(&mut inner)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Entries lost to the capacity bound since open
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Compact once enough stale lines accumulate or the buffer drains
    fn maybe_checkpoint(&self, inner: &mut BufferInner) -> Result<(), BufferError> {
        if inner.stale_lines == 0 {
            return Ok(());
        }
        let threshold = CHECKPOINT_EVERY.min(self.capacity).max(1);
        if inner.entries.is_empty() || inner.stale_lines >= threshold {
            self.checkpoint(inner)?;
        }
        Ok(())
    }

    /// Rewrite the log to hold exactly the undelivered entries
    fn checkpoint(&self, inner: &mut BufferInner) -> Result<(), BufferError> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for entry in &inner.entries {
                serde_json::to_writer(&mut writer, entry)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        fs::rename(&tmp, &self.path)?;

        inner.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        inner.stale_lines = 0;
        debug!(remaining = inner.entries.len(), "buffer checkpoint");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carsense_core::model::ParameterReading;
    use pretty_assertions::assert_eq;

    fn reading(sequence: u64) -> TelemetryRecord {
        TelemetryRecord::Reading(ParameterReading {
            parameter_id: "engine_rpm".to_string(),
            value: 800.0 + sequence as f64,
            unit: "rpm".to_string(),
            sample_time: Utc::now(),
            sequence,
        })
    }

    fn sequence_of(entry: &BufferEntry) -> u64 {
        match &entry.record {
            TelemetryRecord::Reading(r) => r.sequence,
            TelemetryRecord::Event(_) => panic!("expected reading"),
        }
    }

    #[test]
    fn survives_reopen_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.log");

        {
            let buffer = OfflineBuffer::open(&path, 100).unwrap();
            for seq in 1..=5 {
                buffer.append(reading(seq)).unwrap();
            }
        }

        let buffer = OfflineBuffer::open(&path, 100).unwrap();
        assert_eq!(buffer.len(), 5);
        let replayed: Vec<u64> = buffer.peek_batch(10).iter().map(sequence_of).collect();
        assert_eq!(replayed, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn eviction_count_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = OfflineBuffer::open(dir.path().join("t.log"), 10).unwrap();

        for seq in 1..=17 {
            buffer.append(reading(seq)).unwrap();
        }

        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.evicted_total(), 7);
        // Oldest went first
        assert_eq!(sequence_of(&buffer.peek_batch(1)[0]), 8);
    }

    #[test]
    fn ack_removes_from_the_front_only() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = OfflineBuffer::open(dir.path().join("t.log"), 100).unwrap();

        for seq in 1..=4 {
            buffer.append(reading(seq)).unwrap();
        }
        buffer.ack(2).unwrap();

        assert_eq!(buffer.len(), 2);
        let left: Vec<u64> = buffer.peek_batch(10).iter().map(sequence_of).collect();
        assert_eq!(left, vec![3, 4]);
    }

    #[test]
    fn checkpoint_compacts_delivered_entries_out_of_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");

        {
            let buffer = OfflineBuffer::open(&path, 100).unwrap();
            for seq in 1..=6 {
                buffer.append(reading(seq)).unwrap();
            }
            // Draining to empty forces a checkpoint
            buffer.ack(6).unwrap();
            buffer.append(reading(7)).unwrap();
        }

        let buffer = OfflineBuffer::open(&path, 100).unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(sequence_of(&buffer.peek_batch(1)[0]), 7);
    }

    #[test]
    fn log_stays_bounded_without_acks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let buffer = OfflineBuffer::open(&path, 4).unwrap();

        // A dead sink never acknowledges; only eviction removes entries
        for seq in 1..=40 {
            buffer.append(reading(seq)).unwrap();
        }
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.evicted_total(), 36);

        // Evictions compact the log too, so it cannot outgrow the buffer
        let lines = fs::read_to_string(&path).unwrap().lines().count();
        assert!(lines <= 8, "log held {lines} lines for a capacity of 4");

        drop(buffer);
        let reopened = OfflineBuffer::open(&path, 4).unwrap();
        let kept: Vec<u64> = reopened.peek_batch(10).iter().map(sequence_of).collect();
        assert_eq!(kept, vec![37, 38, 39, 40]);
    }

    #[test]
    fn corrupt_tail_line_is_skipped_on_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");

        {
            let buffer = OfflineBuffer::open(&path, 100).unwrap();
            buffer.append(reading(1)).unwrap();
            buffer.append(reading(2)).unwrap();
        }
        // Simulate a torn write
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"kind\":\"reading\",\"parameter").unwrap();

        let buffer = OfflineBuffer::open(&path, 100).unwrap();
        assert_eq!(buffer.len(), 2);
    }
}
