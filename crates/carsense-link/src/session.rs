//! Diagnostic session state machine
//!
//! One `DiagSession` owns one transport for its whole life. It sequences
//! handshake, polling, fault reads and teardown:
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Active <-> Degraded
//!                                                |           |
//!                                                v           v
//!                                         Disconnecting -> Disconnected
//!
//! Faulted: terminal, reached from any state on an unrecoverable
//! transport error.
//! ```
//!
//! Retry policy: a timed-out exchange is retried locally up to
//! `op_retries` times; each operation that still fails counts one
//! consecutive failure. `degrade_after` failures move Active to Degraded,
//! `disconnect_after` failures give up and disconnect - a deliberate
//! fail-fast instead of infinite retry. A codec error discards the single
//! exchange and is only counted; it never feeds the failure counter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use carsense_core::config::{PidSpec, SessionTuning, TransportConfig};
use carsense_core::model::{
    DtcStatus, ParameterReading, ProtocolFamily, SessionInfo, SessionState, TroubleCode,
};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::{self, CodecError, Command, Frame};
use crate::transport::{open_transport, Transport, TransportError};

/// Session-level errors surfaced at the connection-control boundary
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Exchange timed out after retries")]
    Timeout,

    #[error("Link lost")]
    LinkLost,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Session not active (state: {0:?})")]
    NotActive(SessionState),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Counters for transient errors absorbed by the session
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStats {
    pub timeouts: u64,
    pub retries: u64,
    pub codec_errors: u64,
    pub exchanges: u64,
}

/// One live connection to the vehicle's diagnostic bus
pub struct DiagSession {
    transport: Arc<dyn Transport>,
    protocol: ProtocolFamily,
    tuning: SessionTuning,
    info: SessionInfo,
    sequence: u64,
    consecutive_failures: u32,
    stats: SessionStats,
    dtcs: HashMap<String, TroubleCode>,
}

impl std::fmt::Debug for DiagSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagSession")
            .field("protocol", &self.protocol)
            .field("tuning", &self.tuning)
            .field("info", &self.info)
            .field("sequence", &self.sequence)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("stats", &self.stats)
            .field("dtcs", &self.dtcs)
            .finish_non_exhaustive()
    }
}

impl DiagSession {
    /// Open the configured transport and bring the session to `Active`
    pub async fn connect(
        transport_config: &TransportConfig,
        protocol: ProtocolFamily,
        tuning: SessionTuning,
    ) -> Result<Self, SessionError> {
        let transport = open_transport(transport_config)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;
        Self::connect_with(transport, protocol, tuning).await
    }

    /// Bring a session up over an already-open transport
    pub async fn connect_with(
        transport: Arc<dyn Transport>,
        protocol: ProtocolFamily,
        tuning: SessionTuning,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            info: SessionInfo {
                session_id: Uuid::new_v4(),
                descriptor: transport.descriptor(),
                protocol,
                state: SessionState::Connecting,
                started_at: Utc::now(),
                ended_at: None,
            },
            transport,
            protocol,
            tuning,
            sequence: 0,
            consecutive_failures: 0,
            stats: SessionStats::default(),
            dtcs: HashMap::new(),
        };

        session.handshake().await?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.info.state
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Highest sequence number assigned so far
    pub fn last_sequence(&self) -> u64 {
        self.sequence
    }

    /// Send the identification probe with bounded attempts and backoff
    async fn handshake(&mut self) -> Result<(), SessionError> {
        self.info.state = SessionState::Handshaking;
        let mut backoff = Duration::from_millis(self.tuning.handshake_backoff_ms);

        for attempt in 1..=self.tuning.handshake_attempts {
            match self.exchange(&Command::Identify).await {
                Ok(Frame::Identified) => {
                    self.info.state = SessionState::Active;
                    info!(
                        session_id = %self.info.session_id,
                        protocol = %self.protocol,
                        descriptor = %self.info.descriptor,
                        "session active"
                    );
                    return Ok(());
                }
                Ok(frame) => {
                    warn!(attempt, ?frame, "unexpected handshake response");
                }
                Err(SessionError::LinkLost) => break,
                Err(e) => {
                    debug!(attempt, %e, "handshake attempt failed");
                }
            }

            if attempt < self.tuning.handshake_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        self.fault().await;
        Err(SessionError::Connection(format!(
            "handshake failed after {} attempts",
            self.tuning.handshake_attempts
        )))
    }

    /// Poll one parameter and assign the next sequence number
    pub async fn poll(&mut self, spec: &PidSpec) -> Result<ParameterReading, SessionError> {
        self.ensure_usable()?;

        let command = Command::ReadParameter(spec.pid);
        let mut attempts_left = self.tuning.op_retries + 1;

        loop {
            attempts_left -= 1;
            match self.exchange(&command).await {
                Ok(Frame::Parameter { pid, data }) if pid == spec.pid => {
                    self.on_success();
                    self.sequence += 1;
                    return Ok(ParameterReading {
                        parameter_id: spec.id.clone(),
                        value: codec::decode_value(spec, &data),
                        unit: spec.unit.clone(),
                        sample_time: Utc::now(),
                        sequence: self.sequence,
                    });
                }
                Ok(frame) => {
                    // Valid frame for the wrong request: discard and count,
                    // the session itself stays healthy
                    self.stats.codec_errors += 1;
                    return Err(SessionError::Codec(CodecError::Malformed(format!(
                        "response does not match request: {frame:?}"
                    ))));
                }
                Err(SessionError::Timeout) => {
                    self.stats.timeouts += 1;
                    if attempts_left > 0 {
                        self.stats.retries += 1;
                        debug!(pid = spec.pid, attempts_left, "retrying timed-out poll");
                        continue;
                    }
                    self.on_failure().await;
                    return Err(SessionError::Timeout);
                }
                Err(SessionError::Codec(e)) => {
                    self.stats.codec_errors += 1;
                    return Err(SessionError::Codec(e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read stored fault codes, merging into the per-session DTC table
    pub async fn read_fault_codes(&mut self) -> Result<Vec<TroubleCode>, SessionError> {
        self.ensure_usable()?;

        match self.exchange(&Command::ReadFaultCodes).await {
            Ok(Frame::FaultCodes(raw)) => {
                self.on_success();
                let now = Utc::now();
                for dtc in raw {
                    let description = codec::dtc::describe(&dtc.code).map(String::from);
                    self.dtcs
                        .entry(dtc.code.clone())
                        .and_modify(|existing| {
                            existing.last_seen = now;
                            existing.status = dtc.status;
                        })
                        .or_insert(TroubleCode {
                            code: dtc.code,
                            description,
                            status: dtc.status,
                            first_seen: now,
                            last_seen: now,
                        });
                }
                let mut codes: Vec<TroubleCode> = self.dtcs.values().cloned().collect();
                codes.sort_by(|a, b| a.code.cmp(&b.code));
                Ok(codes)
            }
            Ok(frame) => {
                self.stats.codec_errors += 1;
                Err(SessionError::Codec(CodecError::Malformed(format!(
                    "expected fault codes, got {frame:?}"
                ))))
            }
            Err(SessionError::Timeout) => {
                self.stats.timeouts += 1;
                self.on_failure().await;
                Err(SessionError::Timeout)
            }
            Err(SessionError::Codec(e)) => {
                self.stats.codec_errors += 1;
                Err(SessionError::Codec(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Clear stored fault codes on the vehicle and in the session table
    pub async fn clear_fault_codes(&mut self) -> Result<(), SessionError> {
        self.ensure_usable()?;

        match self.exchange(&Command::ClearFaultCodes).await {
            Ok(Frame::Cleared) => {
                self.on_success();
                for dtc in self.dtcs.values_mut() {
                    dtc.status = DtcStatus::Cleared;
                }
                info!(session_id = %self.info.session_id, "fault codes cleared");
                Ok(())
            }
            Ok(frame) => {
                self.stats.codec_errors += 1;
                Err(SessionError::Codec(CodecError::Malformed(format!(
                    "expected clear confirmation, got {frame:?}"
                ))))
            }
            Err(SessionError::Timeout) => {
                self.stats.timeouts += 1;
                self.on_failure().await;
                Err(SessionError::Timeout)
            }
            Err(SessionError::Codec(e)) => {
                self.stats.codec_errors += 1;
                Err(SessionError::Codec(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Tear down the session; the transport is closed on every path
    pub async fn disconnect(&mut self) {
        match self.info.state {
            SessionState::Disconnected | SessionState::Faulted => {}
            _ => {
                self.info.state = SessionState::Disconnecting;
                debug!(session_id = %self.info.session_id, "disconnecting");
            }
        }
        self.transport.close().await;
        if self.info.state != SessionState::Faulted {
            self.info.state = SessionState::Disconnected;
        }
        if self.info.ended_at.is_none() {
            self.info.ended_at = Some(Utc::now());
        }
    }

    /// One write/read/decode round-trip; no retry logic here
    async fn exchange(&mut self, command: &Command) -> Result<Frame, SessionError> {
        let request = codec::encode_request(command, self.protocol);
        self.stats.exchanges += 1;

        if let Err(e) = self.transport.write(&request).await {
            return Err(self.map_transport_error(e).await);
        }

        let timeout = Duration::from_millis(self.tuning.response_timeout_ms);
        let response = match self.transport.read(timeout).await {
            Ok(bytes) => bytes,
            Err(e) => return Err(self.map_transport_error(e).await),
        };

        Ok(codec::decode_response(&response, self.protocol)?)
    }

    async fn map_transport_error(&mut self, e: TransportError) -> SessionError {
        match e {
            TransportError::Timeout => SessionError::Timeout,
            TransportError::LinkLost(reason) => {
                warn!(session_id = %self.info.session_id, %reason, "link lost");
                self.fault().await;
                SessionError::LinkLost
            }
            other => SessionError::Transport(other),
        }
    }

    fn ensure_usable(&self) -> Result<(), SessionError> {
        match self.info.state {
            SessionState::Active | SessionState::Degraded | SessionState::Handshaking => Ok(()),
            state => Err(SessionError::NotActive(state)),
        }
    }

    fn on_success(&mut self) {
        self.consecutive_failures = 0;
        if self.info.state == SessionState::Degraded {
            self.info.state = SessionState::Active;
            info!(session_id = %self.info.session_id, "recovered from degraded state");
        }
    }

    async fn on_failure(&mut self) {
        if !matches!(
            self.info.state,
            SessionState::Active | SessionState::Degraded
        ) {
            return;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.tuning.disconnect_after {
            warn!(
                session_id = %self.info.session_id,
                failures = self.consecutive_failures,
                "consecutive failures exceeded threshold, disconnecting"
            );
            self.disconnect().await;
        } else if self.consecutive_failures >= self.tuning.degrade_after
            && self.info.state == SessionState::Active
        {
            warn!(
                session_id = %self.info.session_id,
                failures = self.consecutive_failures,
                "session degraded"
            );
            self.info.state = SessionState::Degraded;
        }
    }

    /// Unrecoverable transport failure: close and mark terminal
    async fn fault(&mut self) {
        self.transport.close().await;
        self.info.state = SessionState::Faulted;
        self.info.ended_at = Some(Utc::now());
    }
}
