//! Data model shared across the engine
//!
//! Readings, trouble codes, sessions, buffered records, anomaly events and
//! model versions. All types are plain serde values; behaviour lives in the
//! crates that produce them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Diagnostic protocol family spoken over the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// Legacy parameter-ID protocol (mode 01/03/04, checksummed frames)
    Obd2,
    /// Diagnostic-services protocol (ISO 14229 subset over ISO-TP)
    Uds,
}

impl std::fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolFamily::Obd2 => f.write_str("obd2"),
            ProtocolFamily::Uds => f.write_str("uds"),
        }
    }
}

/// One timestamped parameter sample
///
/// Immutable once created. `sequence` is monotonic within a session and is
/// used downstream to detect gaps after a reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterReading {
    pub parameter_id: String,
    pub value: f64,
    pub unit: String,
    pub sample_time: DateTime<Utc>,
    pub sequence: u64,
}

/// Lifecycle status of a diagnostic trouble code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtcStatus {
    Pending,
    Confirmed,
    Cleared,
}

/// A diagnostic trouble code as tracked by the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TroubleCode {
    /// Formatted code, e.g. "P0300"
    pub code: String,
    /// Human-readable meaning for codes in the known-code table
    #[serde(default)]
    pub description: Option<String>,
    pub status: DtcStatus,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Active,
    Degraded,
    Disconnecting,
    /// Terminal: unrecoverable transport error
    Faulted,
}

/// Descriptive record for one physical connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub descriptor: String,
    pub protocol: ProtocolFamily,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Payload of an offline buffer entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TelemetryRecord {
    Reading(ParameterReading),
    Event(AnomalyEvent),
}

/// One durable offline-buffer entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferEntry {
    pub record: TelemetryRecord,
    pub enqueued_at: DateTime<Utc>,
}

/// Severity bucket derived from the anomaly score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Bucket a score against the configured event threshold.
    ///
    /// The band above the threshold is split in thirds so the bucketing
    /// follows the score directly rather than a separate classifier.
    pub fn from_score(score: f64, threshold: f64) -> Self {
        let span = (1.0 - threshold).max(f64::EPSILON);
        let pos = (score - threshold) / span;
        if pos >= 2.0 / 3.0 {
            Severity::High
        } else if pos >= 1.0 / 3.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// User resolution of an anomaly event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Unconfirmed,
    Confirmed,
    Dismissed,
}

/// An anomaly raised by the scoring engine
///
/// `resolution` is mutated only through the feedback ingestion boundary,
/// never by the engine itself. `contributing_features` is exactly the set of
/// features that exceeded their baseline gate during the scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub event_id: Uuid,
    /// Score in [0, 1]
    pub score: f64,
    pub severity: Severity,
    pub contributing_features: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub resolution: Resolution,
}

/// Lifecycle status of a trained model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Candidate,
    Active,
    Retired,
}

/// Metadata for one trained model
///
/// Exactly one version is `Active` at a time; a candidate becomes active
/// only through the drift-gated promotion in the model registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version_id: Uuid,
    pub trained_at: DateTime<Utc>,
    pub training_samples: usize,
    pub validation_score: f64,
    pub status: ModelStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_buckets_follow_score() {
        let threshold = 0.7;
        assert_eq!(Severity::from_score(0.71, threshold), Severity::Low);
        assert_eq!(Severity::from_score(0.85, threshold), Severity::Medium);
        assert_eq!(Severity::from_score(0.95, threshold), Severity::High);
        assert_eq!(Severity::from_score(1.0, threshold), Severity::High);
    }

    #[test]
    fn telemetry_record_round_trips_as_json() {
        let reading = ParameterReading {
            parameter_id: "engine_rpm".to_string(),
            value: 3000.0,
            unit: "rpm".to_string(),
            sample_time: Utc::now(),
            sequence: 42,
        };
        let entry = BufferEntry {
            record: TelemetryRecord::Reading(reading),
            enqueued_at: Utc::now(),
        };
        let line = serde_json::to_string(&entry).unwrap();
        let back: BufferEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(back, entry);
    }
}
