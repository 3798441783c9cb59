//! TCP transport for WiFi adapters
//!
//! ELM-style WiFi adapters expose a raw TCP socket (usually port 35000) and
//! answer each request with a single burst of bytes, so one timed read per
//! exchange is enough; frame validation happens in the codec.

use std::time::Duration;

use async_trait::async_trait;
use carsense_core::config::TcpTransportConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Transport, TransportError};

pub struct TcpTransport {
    stream: Mutex<Option<TcpStream>>,
    descriptor: String,
}

impl TcpTransport {
    pub async fn open(config: &TcpTransportConfig) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", config.host, config.port);
        let connect = TcpStream::connect(&addr);
        let stream = tokio::time::timeout(Duration::from_millis(config.connect_timeout_ms), connect)
            .await
            .map_err(|_| TransportError::ConnectionFailed(format!("{addr}: connect timed out")))?
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!(%addr, "TCP transport connected");
        Ok(Self {
            stream: Mutex::new(Some(stream)),
            descriptor: format!("tcp://{addr}"),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::Closed)?;

        let mut buf = vec![0u8; 512];
        let n = tokio::time::timeout(timeout, stream.read(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::LinkLost(e.to_string()))?;

        if n == 0 {
            *guard = None;
            return Err(TransportError::LinkLost("peer closed".to_string()));
        }

        buf.truncate(n);
        Ok(buf)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::Closed)?;

        if let Err(e) = stream.write_all(bytes).await {
            *guard = None;
            return Err(TransportError::LinkLost(e.to_string()));
        }
        Ok(())
    }

    async fn close(&self) {
        let mut guard = self.stream.lock().await;
        if let Some(stream) = guard.take() {
            drop(stream);
            debug!(descriptor = %self.descriptor, "TCP transport closed");
        }
    }

    fn descriptor(&self) -> String {
        self.descriptor.clone()
    }
}
