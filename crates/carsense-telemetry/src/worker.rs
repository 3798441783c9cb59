//! Polling worker
//!
//! One dedicated task owns the diagnostic session for its whole life.
//! Connection control arrives as commands over an mpsc channel and is
//! answered over oneshot replies, so callers never touch the session
//! directly. Between commands the worker polls the schedule one parameter
//! at a time; a disconnect lands at the next checkpoint, it never interrupts
//! an in-flight exchange.

use std::sync::Arc;
use std::time::Duration;

use carsense_core::config::EngineConfig;
use carsense_core::model::{ParameterReading, SessionInfo, SessionState, TelemetryRecord, TroubleCode};
use carsense_link::session::{DiagSession, SessionError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::OfflineBuffer;
use crate::schedule::PollSchedule;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker is not running")]
    Unavailable,

    #[error(transparent)]
    Session(#[from] SessionError),
}

enum Command {
    Connect(oneshot::Sender<Result<SessionInfo, SessionError>>),
    Disconnect(oneshot::Sender<()>),
    ReadFaults(oneshot::Sender<Result<Vec<TroubleCode>, SessionError>>),
    ClearFaults(oneshot::Sender<Result<(), SessionError>>),
}

/// Connection control boundary for the polling worker
pub struct WorkerHandle {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub async fn connect(&self) -> Result<SessionInfo, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Connect(reply_tx))
            .await
            .map_err(|_| WorkerError::Unavailable)?;
        let info = reply_rx.await.map_err(|_| WorkerError::Unavailable)??;
        Ok(info)
    }

    pub async fn disconnect(&self) -> Result<(), WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Disconnect(reply_tx))
            .await
            .map_err(|_| WorkerError::Unavailable)?;
        reply_rx.await.map_err(|_| WorkerError::Unavailable)
    }

    pub async fn read_fault_codes(&self) -> Result<Vec<TroubleCode>, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::ReadFaults(reply_tx))
            .await
            .map_err(|_| WorkerError::Unavailable)?;
        let codes = reply_rx.await.map_err(|_| WorkerError::Unavailable)??;
        Ok(codes)
    }

    pub async fn clear_fault_codes(&self) -> Result<(), WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::ClearFaults(reply_tx))
            .await
            .map_err(|_| WorkerError::Unavailable)?;
        reply_rx.await.map_err(|_| WorkerError::Unavailable)??;
        Ok(())
    }

    /// Tear the worker down, disconnecting first if connected
    pub async fn shutdown(self) {
        let _ = self.disconnect().await;
        drop(self.tx);
        let _ = self.task.await;
    }
}

pub fn spawn_worker(
    config: EngineConfig,
    buffer: Arc<OfflineBuffer>,
    readings: broadcast::Sender<ParameterReading>,
) -> WorkerHandle {
    let (tx, rx) = mpsc::channel(16);
    let worker = PollWorker {
        config,
        buffer,
        readings,
        session: None,
        schedule: None,
    };
    let task = tokio::spawn(worker.run(rx));
    WorkerHandle { tx, task }
}

struct PollWorker {
    config: EngineConfig,
    buffer: Arc<OfflineBuffer>,
    readings: broadcast::Sender<ParameterReading>,
    session: Option<DiagSession>,
    schedule: Option<PollSchedule>,
}

impl PollWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let poll_interval = Duration::from_millis(self.config.telemetry.poll_interval_ms);
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if self.session.is_some() {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    },
                    _ = ticker.tick() => self.poll_next().await,
                }
            } else {
                match rx.recv().await {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                }
            }
        }

        if let Some(mut session) = self.session.take() {
            session.disconnect().await;
        }
        debug!("poll worker stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => {
                let result = self.connect().await;
                let _ = reply.send(result);
            }
            Command::Disconnect(reply) => {
                if let Some(mut session) = self.session.take() {
                    session.disconnect().await;
                    info!("session disconnected");
                }
                self.schedule = None;
                let _ = reply.send(());
            }
            Command::ReadFaults(reply) => {
                let result = match self.session.as_mut() {
                    Some(session) => session.read_fault_codes().await,
                    None => Err(SessionError::NotActive(SessionState::Disconnected)),
                };
                self.reap_dead_session();
                let _ = reply.send(result);
            }
            Command::ClearFaults(reply) => {
                let result = match self.session.as_mut() {
                    Some(session) => session.clear_fault_codes().await,
                    None => Err(SessionError::NotActive(SessionState::Disconnected)),
                };
                self.reap_dead_session();
                let _ = reply.send(result);
            }
        }
    }

    async fn connect(&mut self) -> Result<SessionInfo, SessionError> {
        if let Some(session) = &self.session {
            return Ok(session.info().clone());
        }
        let session = DiagSession::connect(
            &self.config.transport,
            self.config.protocol,
            self.config.session.clone(),
        )
        .await?;
        let info = session.info().clone();
        self.session = Some(session);
        self.schedule = Some(PollSchedule::new(
            self.config.parameters.clone(),
            self.config.telemetry.safety_weight,
        ));
        Ok(info)
    }

    async fn poll_next(&mut self) {
        let (Some(session), Some(schedule)) = (self.session.as_mut(), self.schedule.as_mut())
        else {
            return;
        };
        let Some(spec) = schedule.next() else {
            return;
        };

        match session.poll(spec).await {
            Ok(reading) => {
                // Durable before any forward attempt
                if let Err(e) = self.buffer.append(TelemetryRecord::Reading(reading.clone())) {
                    warn!(%e, parameter = %reading.parameter_id, "failed to buffer reading");
                }
                // No receivers is fine; scoring may not be up yet
                let _ = self.readings.send(reading);
            }
            Err(SessionError::Codec(e)) => {
                debug!(%e, parameter = %spec.id, "discarded malformed exchange");
            }
            Err(e) => {
                warn!(%e, parameter = %spec.id, "poll failed");
            }
        }

        self.reap_dead_session();
    }

    /// Drop a session the state machine has already terminated
    fn reap_dead_session(&mut self) {
        let dead = matches!(
            self.session.as_ref().map(DiagSession::state),
            Some(SessionState::Disconnected) | Some(SessionState::Faulted)
        );
        if dead {
            warn!("session terminated, polling suspended");
            self.session = None;
            self.schedule = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carsense_core::config::{
        AnomalyConfig, MockTransportConfig, PidSpec, PollClass, SessionTuning, TelemetryConfig,
        TransportConfig,
    };
    use carsense_core::model::ProtocolFamily;

    fn test_config(dir: &std::path::Path) -> EngineConfig {
        EngineConfig {
            transport: TransportConfig::Mock(MockTransportConfig::default()),
            protocol: ProtocolFamily::Obd2,
            session: SessionTuning {
                response_timeout_ms: 50,
                handshake_attempts: 3,
                handshake_backoff_ms: 1,
                op_retries: 0,
                degrade_after: 3,
                disconnect_after: 5,
            },
            parameters: vec![PidSpec {
                id: "engine_rpm".to_string(),
                name: "Engine RPM".to_string(),
                pid: 0x0C,
                unit: "rpm".to_string(),
                scale: 0.25,
                offset: 0.0,
                min: 0.0,
                max: 8000.0,
                class: PollClass::Safety,
            }],
            telemetry: TelemetryConfig {
                poll_interval_ms: 5,
                safety_weight: 3,
                buffer_path: dir.join("telemetry.log").display().to_string(),
                buffer_capacity: 100,
                drain_batch: 16,
                drain_interval_ms: 50,
                ..TelemetryConfig::default()
            },
            anomaly: AnomalyConfig::default(),
        }
    }

    #[tokio::test]
    async fn worker_polls_and_buffers_after_connect() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let buffer = Arc::new(OfflineBuffer::open(dir.path().join("telemetry.log"), 100).unwrap());
        let (readings_tx, mut readings_rx) = broadcast::channel(64);

        let handle = spawn_worker(config, buffer.clone(), readings_tx);
        let info = handle.connect().await.unwrap();
        assert_eq!(info.state, SessionState::Active);

        // First broadcast reading implies the buffer append already happened
        let reading = readings_rx.recv().await.unwrap();
        assert_eq!(reading.parameter_id, "engine_rpm");
        assert_eq!(reading.value, 3000.0);
        assert!(buffer.len() >= 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn fault_commands_round_trip_through_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let buffer = Arc::new(OfflineBuffer::open(dir.path().join("telemetry.log"), 100).unwrap());
        let (readings_tx, _readings_rx) = broadcast::channel(64);

        let handle = spawn_worker(config, buffer, readings_tx);
        handle.connect().await.unwrap();

        let codes = handle.read_fault_codes().await.unwrap();
        assert_eq!(codes.len(), 2);
        handle.clear_fault_codes().await.unwrap();

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn commands_without_a_session_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let buffer = Arc::new(OfflineBuffer::open(dir.path().join("telemetry.log"), 100).unwrap());
        let (readings_tx, _readings_rx) = broadcast::channel(64);

        let handle = spawn_worker(config, buffer, readings_tx);
        let err = handle.read_fault_codes().await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Session(SessionError::NotActive(SessionState::Disconnected))
        ));

        handle.shutdown().await;
    }
}
