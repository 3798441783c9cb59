//! Engine configuration
//!
//! The whole configuration surface is a static object handed to the engine
//! at startup: polled parameters and cadence, session retry policy, buffer
//! bounds, anomaly thresholds and retrain triggers. Tunables that the
//! behaviour depends on live here, not in code paths.

use serde::{Deserialize, Serialize};

use crate::model::ProtocolFamily;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Transport to open for the session
    pub transport: TransportConfig,
    /// Protocol family spoken over that transport
    pub protocol: ProtocolFamily,
    /// Session retry/backoff policy
    #[serde(default)]
    pub session: SessionTuning,
    /// Polled parameters
    pub parameters: Vec<PidSpec>,
    /// Polling cadence and offline buffer settings
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Anomaly scoring and retraining settings
    #[serde(default)]
    pub anomaly: AnomalyConfig,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// WiFi adapter exposing a raw TCP socket
    Tcp(TcpTransportConfig),
    /// USB or Bluetooth RFCOMM tty (requires the `serial` feature)
    Serial(SerialTransportConfig),
    /// Scriptable in-process transport for testing
    Mock(MockTransportConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockTransportConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Adapter IP address or hostname
    pub host: String,
    /// Adapter TCP port (ELM327 WiFi adapters default to 35000)
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_tcp_port() -> u16 {
    35000
}

fn default_connect_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialTransportConfig {
    /// Device path, e.g. "/dev/rfcomm0" or "/dev/ttyUSB0"
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    38400
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockTransportConfig {
    /// Simulated exchange latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
}

impl TransportConfig {
    /// Human-readable descriptor for session records and logs
    pub fn descriptor(&self) -> String {
        match self {
            TransportConfig::Tcp(cfg) => format!("tcp://{}:{}", cfg.host, cfg.port),
            TransportConfig::Serial(cfg) => format!("serial://{}", cfg.port),
            TransportConfig::Mock(_) => "mock://".to_string(),
        }
    }
}

/// Session retry and backoff policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTuning {
    /// Per-exchange response timeout in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
    /// Handshake attempts before the session faults
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,
    /// Initial handshake backoff in milliseconds, doubled per attempt
    #[serde(default = "default_handshake_backoff")]
    pub handshake_backoff_ms: u64,
    /// Local retries for a timed-out exchange before the poll fails
    #[serde(default = "default_op_retries")]
    pub op_retries: u32,
    /// Consecutive failed polls before Active degrades
    #[serde(default = "default_degrade_after")]
    pub degrade_after: u32,
    /// Consecutive failed polls before Degraded gives up and disconnects
    #[serde(default = "default_disconnect_after")]
    pub disconnect_after: u32,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout(),
            handshake_attempts: default_handshake_attempts(),
            handshake_backoff_ms: default_handshake_backoff(),
            op_retries: default_op_retries(),
            degrade_after: default_degrade_after(),
            disconnect_after: default_disconnect_after(),
        }
    }
}

fn default_response_timeout() -> u64 {
    1000
}

fn default_handshake_attempts() -> u32 {
    3
}

fn default_handshake_backoff() -> u64 {
    200
}

fn default_op_retries() -> u32 {
    2
}

fn default_degrade_after() -> u32 {
    3
}

fn default_disconnect_after() -> u32 {
    5
}

/// Polling weight class for a parameter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollClass {
    /// Temperatures, pressures - polled every cycle slot
    Safety,
    /// Everything else
    #[default]
    Comfort,
}

/// One polled parameter definition
///
/// `pid` values at or below 0xFF address the legacy mode-01 space;
/// larger values are extended identifiers (legacy mode 22 / UDS DID).
/// Physical value = raw * scale + offset, clamped to [min, max].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidSpec {
    /// Internal identifier, e.g. "engine_rpm"
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Parameter/data identifier
    pub pid: u16,
    #[serde(default)]
    pub unit: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default = "default_min")]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default)]
    pub class: PollClass,
}

fn default_scale() -> f64 {
    1.0
}

fn default_min() -> f64 {
    f64::NEG_INFINITY
}

fn default_max() -> f64 {
    f64::INFINITY
}

/// Polling cadence and offline buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Pacing between consecutive polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How many times a safety-class parameter is visited per cycle
    /// relative to a comfort-class one
    #[serde(default = "default_safety_weight")]
    pub safety_weight: u32,
    /// Offline buffer log path
    #[serde(default = "default_buffer_path")]
    pub buffer_path: String,
    /// Offline buffer capacity; oldest entries are evicted beyond this
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Entries flushed to the sink per drain pass
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,
    /// Pause between drain passes in milliseconds
    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            safety_weight: default_safety_weight(),
            buffer_path: default_buffer_path(),
            buffer_capacity: default_buffer_capacity(),
            drain_batch: default_drain_batch(),
            drain_interval_ms: default_drain_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    250
}

fn default_safety_weight() -> u32 {
    3
}

fn default_buffer_path() -> String {
    "data/telemetry.log".to_string()
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_drain_batch() -> usize {
    64
}

fn default_drain_interval() -> u64 {
    500
}

/// Anomaly scoring and retraining settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Rolling window length per parameter
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Score above which an event is raised
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// Maximum validation-score regression a candidate may show and
    /// still be promoted
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: f64,
    /// Scheduled retrain interval in seconds
    #[serde(default = "default_retrain_interval")]
    pub retrain_interval_secs: u64,
    /// Accumulated feedback entries that trigger an early retrain
    #[serde(default = "default_feedback_threshold")]
    pub feedback_threshold: usize,
    /// Minimum feature vectors required for a training pass
    #[serde(default = "default_min_training_samples")]
    pub min_training_samples: usize,
    /// Active model snapshot path
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// Feedback store log path
    #[serde(default = "default_feedback_path")]
    pub feedback_path: String,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            score_threshold: default_score_threshold(),
            drift_tolerance: default_drift_tolerance(),
            retrain_interval_secs: default_retrain_interval(),
            feedback_threshold: default_feedback_threshold(),
            min_training_samples: default_min_training_samples(),
            model_path: default_model_path(),
            feedback_path: default_feedback_path(),
        }
    }
}

fn default_window_size() -> usize {
    16
}

fn default_score_threshold() -> f64 {
    0.7
}

fn default_drift_tolerance() -> f64 {
    0.05
}

fn default_retrain_interval() -> u64 {
    3600
}

fn default_feedback_threshold() -> usize {
    25
}

fn default_min_training_samples() -> usize {
    100
}

fn default_model_path() -> String {
    "data/model.json".to_string()
}

fn default_feedback_path() -> String {
    "data/feedback.log".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_spec_defaults_apply() {
        let spec: PidSpec = serde_json::from_str(
            r#"{"id": "coolant_temp", "name": "Coolant Temperature", "pid": 5}"#,
        )
        .unwrap();
        assert_eq!(spec.scale, 1.0);
        assert_eq!(spec.offset, 0.0);
        assert_eq!(spec.class, PollClass::Comfort);
        assert!(spec.min.is_infinite() && spec.min < 0.0);
    }

    #[test]
    fn transport_descriptor_formats() {
        let tcp = TransportConfig::Tcp(TcpTransportConfig {
            host: "192.168.0.10".to_string(),
            port: 35000,
            connect_timeout_ms: 5000,
        });
        assert_eq!(tcp.descriptor(), "tcp://192.168.0.10:35000");
    }
}
