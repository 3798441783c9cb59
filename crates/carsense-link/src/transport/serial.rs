//! Serial transport for USB and Bluetooth RFCOMM ttys
//!
//! Bluetooth adapters bound via rfcomm(1) appear as ordinary ttys, so one
//! adapter covers both. The serialport crate is blocking; every operation
//! runs on the blocking pool.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carsense_core::config::SerialTransportConfig;
use parking_lot::Mutex;
use tracing::debug;

use super::{Transport, TransportError};

type SharedPort = Arc<Mutex<Option<Box<dyn serialport::SerialPort>>>>;

pub struct SerialTransport {
    port: SharedPort,
    descriptor: String,
}

impl SerialTransport {
    pub async fn open(config: &SerialTransportConfig) -> Result<Self, TransportError> {
        let path = config.port.clone();
        let baud = config.baud_rate;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&path, baud)
                .timeout(Duration::from_millis(100))
                .open()
        })
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!(port = %config.port, baud, "serial transport opened");
        Ok(Self {
            port: Arc::new(Mutex::new(Some(port))),
            descriptor: format!("serial://{}", config.port),
        })
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn read(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let shared = self.port.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = shared.lock();
            let port = guard.as_mut().ok_or(TransportError::Closed)?;
            port.set_timeout(timeout)
                .map_err(|e| TransportError::LinkLost(e.to_string()))?;

            let mut buf = vec![0u8; 512];
            match port.read(&mut buf) {
                Ok(0) => Err(TransportError::LinkLost("port closed".to_string())),
                Ok(n) => {
                    buf.truncate(n);
                    Ok(buf)
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(TransportError::Timeout),
                Err(e) => Err(TransportError::LinkLost(e.to_string())),
            }
        })
        .await
        .map_err(|e| TransportError::LinkLost(e.to_string()))?
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let shared = self.port.clone();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = shared.lock();
            let port = guard.as_mut().ok_or(TransportError::Closed)?;
            port.write_all(&bytes)
                .and_then(|_| port.flush())
                .map_err(|e| TransportError::LinkLost(e.to_string()))
        })
        .await
        .map_err(|e| TransportError::LinkLost(e.to_string()))?
    }

    async fn close(&self) {
        let shared = self.port.clone();
        let descriptor = self.descriptor.clone();
        let _ = tokio::task::spawn_blocking(move || {
            let mut guard = shared.lock();
            if guard.take().is_some() {
                debug!(%descriptor, "serial transport closed");
            }
        })
        .await;
    }

    fn descriptor(&self) -> String {
        self.descriptor.clone()
    }
}
