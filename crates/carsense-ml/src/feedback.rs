//! Feedback store
//!
//! Append-only JSON-lines log of user verdicts on anomaly events. Nothing
//! is ever rewritten or compacted; derived statistics are computed from the
//! in-memory replica on read.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use carsense_core::model::Resolution;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::MlError;
use crate::features::FeatureVector;

/// One labeled verdict, durable at append time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub event_id: Uuid,
    pub resolution: Resolution,
    /// Feature vector the event was scored on
    pub features: FeatureVector,
    pub recorded_at: DateTime<Utc>,
}

pub struct FeedbackStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    records: RwLock<Vec<FeedbackRecord>>,
}

impl FeedbackStore {
    /// Open the store, replaying the existing log
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MlError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<FeedbackRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(line = lineno + 1, %e, "skipping corrupt feedback line"),
                }
            }
        }

        let writer = BufWriter::new(OpenOptions::new().create(true).append(true).open(&path)?);
        debug!(path = %path.display(), replayed = records.len(), "feedback store open");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one verdict; durable before this returns
    pub fn append(&self, record: FeedbackRecord) -> Result<(), MlError> {
        let line = serde_json::to_string(&record)?;
        {
            let mut writer = self.writer.lock();
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        self.records.write().push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records appended after index `from`
    pub fn records_since(&self, from: usize) -> Vec<FeedbackRecord> {
        self.records.read().iter().skip(from).cloned().collect()
    }

    /// Dismissed share of all resolved events; derived on read
    pub fn false_positive_rate(&self) -> f64 {
        let records = self.records.read();
        let confirmed = records
            .iter()
            .filter(|r| r.resolution == Resolution::Confirmed)
            .count();
        let dismissed = records
            .iter()
            .filter(|r| r.resolution == Resolution::Dismissed)
            .count();
        let resolved = confirmed + dismissed;
        if resolved == 0 {
            0.0
        } else {
            dismissed as f64 / resolved as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(resolution: Resolution) -> FeedbackRecord {
        let mut features = FeatureVector::new();
        features.insert("rpm.mean".to_string(), 180.0);
        FeedbackRecord {
            event_id: Uuid::new_v4(),
            resolution,
            features,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.log");
        let first = record(Resolution::Confirmed);

        {
            let store = FeedbackStore::open(&path).unwrap();
            store.append(first.clone()).unwrap();
            store.append(record(Resolution::Dismissed)).unwrap();
        }

        let store = FeedbackStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.records_since(0)[0], first);
    }

    #[test]
    fn false_positive_rate_counts_dismissals() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.log")).unwrap();
        assert_eq!(store.false_positive_rate(), 0.0);

        store.append(record(Resolution::Confirmed)).unwrap();
        store.append(record(Resolution::Confirmed)).unwrap();
        store.append(record(Resolution::Dismissed)).unwrap();

        assert_eq!(store.false_positive_rate(), 1.0 / 3.0);
    }

    #[test]
    fn records_since_skips_consumed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FeedbackStore::open(dir.path().join("feedback.log")).unwrap();
        store.append(record(Resolution::Confirmed)).unwrap();
        store.append(record(Resolution::Dismissed)).unwrap();
        store.append(record(Resolution::Dismissed)).unwrap();

        let fresh = store.records_since(1);
        assert_eq!(fresh.len(), 2);
        assert!(fresh.iter().all(|r| r.resolution == Resolution::Dismissed));
    }
}
