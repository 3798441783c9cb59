//! Transport layer for the diagnostic link
//!
//! Adapters for talking to the physical adapter hardware:
//! - TCP for WiFi adapters exposing a raw socket
//! - Serial for USB and Bluetooth RFCOMM ttys (feature `serial`)
//! - Mock for testing
//!
//! Transports move bytes and report link health; they carry no protocol
//! knowledge and no retry logic - that belongs to the session.

mod error;
pub mod mock;
pub mod tcp;

#[cfg(feature = "serial")]
pub mod serial;

pub use error::TransportError;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carsense_core::config::TransportConfig;

/// Byte-level duplex channel to the adapter
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read one response's worth of bytes, waiting up to `timeout`
    async fn read(&self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write a request frame
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Release the underlying channel; safe to call more than once
    async fn close(&self);

    /// Human-readable descriptor, e.g. "tcp://192.168.0.10:35000"
    fn descriptor(&self) -> String;
}

/// Open a transport based on configuration
pub async fn open_transport(
    config: &TransportConfig,
) -> Result<Arc<dyn Transport>, TransportError> {
    match config {
        TransportConfig::Tcp(cfg) => {
            let adapter = tcp::TcpTransport::open(cfg).await?;
            Ok(Arc::new(adapter))
        }
        #[cfg(feature = "serial")]
        TransportConfig::Serial(cfg) => {
            let adapter = serial::SerialTransport::open(cfg).await?;
            Ok(Arc::new(adapter))
        }
        #[cfg(not(feature = "serial"))]
        TransportConfig::Serial(_) => Err(TransportError::Unsupported(
            "serial transport requires the 'serial' feature".to_string(),
        )),
        TransportConfig::Mock(cfg) => {
            let adapter = mock::MockTransport::with_defaults(cfg);
            Ok(Arc::new(adapter))
        }
    }
}
