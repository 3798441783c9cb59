//! Mock transport for testing
//!
//! Plays the adapter side of an exchange: requests are matched against a
//! response table, and a script of one-shot actions can inject timeouts,
//! link drops and malformed frames ahead of the table lookup.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use carsense_core::config::MockTransportConfig;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{Transport, TransportError};
use crate::codec::obd2;

/// One-shot behaviour for the next read
#[derive(Debug, Clone)]
pub enum MockAction {
    /// Return these bytes as the response
    Reply(Vec<u8>),
    /// Time out the read
    Timeout,
    /// Drop the link
    LinkLost,
}

pub struct MockTransport {
    latency: Duration,
    closed: AtomicBool,
    link_up: AtomicBool,
    /// request -> response table, matched exact-first then by prefix
    responses: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
    /// One-shot actions consumed before the table is consulted
    script: Mutex<VecDeque<MockAction>>,
    last_request: Mutex<Option<Vec<u8>>>,
}

impl MockTransport {
    pub fn new(config: &MockTransportConfig) -> Self {
        Self {
            latency: Duration::from_millis(config.latency_ms),
            closed: AtomicBool::new(false),
            link_up: AtomicBool::new(true),
            responses: RwLock::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            last_request: Mutex::new(None),
        }
    }

    /// Mock with canned responses for both protocol families: identify
    /// probes, a couple of parameters, fault read and fault clear.
    pub fn with_defaults(config: &MockTransportConfig) -> Self {
        let mock = Self::new(config);
        {
            let mut table = mock.responses.write();
            // Legacy family, checksummed frames
            // Identify probe (mode 01 PID 00 -> supported-PID bitmask)
            table.push((
                obd2::frame(&[0x01, 0x00]),
                obd2::frame(&[0x41, 0x00, 0xBE, 0x3E, 0xB8, 0x11]),
            ));
            // Coolant temperature (PID 05 -> 90 raw)
            table.push((
                obd2::frame(&[0x01, 0x05]),
                obd2::frame(&[0x41, 0x05, 0x5A]),
            ));
            // Engine RPM (PID 0C -> 3000 rpm at scale 0.25)
            table.push((
                obd2::frame(&[0x01, 0x0C]),
                obd2::frame(&[0x41, 0x0C, 0x2E, 0xE0]),
            ));
            // Stored DTCs (mode 03 -> P0171, P0300)
            table.push((
                obd2::frame(&[0x03]),
                obd2::frame(&[0x43, 0x01, 0x71, 0x03, 0x00]),
            ));
            // Clear DTCs (mode 04)
            table.push((obd2::frame(&[0x04]), obd2::frame(&[0x44])));

            // Diagnostic-services family
            // Session control (identify)
            table.push((vec![0x10, 0x01], vec![0x50, 0x01, 0x00, 0x19, 0x01, 0xF4]));
            // ReadDataByIdentifier - coolant temp DID
            table.push((vec![0x22, 0xF4, 0x05], vec![0x62, 0xF4, 0x05, 0x5A]));
            // ReadDataByIdentifier - engine RPM DID
            table.push((
                vec![0x22, 0xF4, 0x0C],
                vec![0x62, 0xF4, 0x0C, 0x2E, 0xE0],
            ));
            // ReadDTCInformation, report by status mask
            table.push((
                vec![0x19, 0x02],
                vec![
                    0x59, 0x02, 0xFF, // response + sub-function + availability mask
                    0x01, 0x71, 0x00, 0x08, // P0171, confirmed
                    0x03, 0x00, 0x00, 0x04, // P0300, pending
                ],
            ));
            // ClearDiagnosticInformation
            table.push((vec![0x14, 0xFF, 0xFF, 0xFF], vec![0x54]));
        }
        mock
    }

    /// Add a request -> response mapping
    pub fn add_response(&self, request: Vec<u8>, response: Vec<u8>) {
        self.responses.write().push((request, response));
    }

    /// Queue a one-shot action for an upcoming read
    pub fn push_script(&self, action: MockAction) {
        self.script.lock().push_back(action);
    }

    /// Restore a previously dropped link
    pub fn restore_link(&self) {
        self.link_up.store(true, Ordering::SeqCst);
    }

    /// Latest entries win, so tests can override the default table
    fn find_response(&self, request: &[u8]) -> Option<Vec<u8>> {
        let responses = self.responses.read();
        for (req, resp) in responses.iter().rev() {
            if req == request {
                return Some(resp.clone());
            }
        }
        for (req, resp) in responses.iter().rev() {
            if request.starts_with(req) {
                return Some(resp.clone());
            }
        }
        None
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(TransportError::LinkLost("mock link down".to_string()));
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(action) = self.script.lock().pop_front() {
            return match action {
                MockAction::Reply(bytes) => Ok(bytes),
                MockAction::Timeout => Err(TransportError::Timeout),
                MockAction::LinkLost => {
                    self.link_up.store(false, Ordering::SeqCst);
                    Err(TransportError::LinkLost("mock link down".to_string()))
                }
            };
        }

        let request = self.last_request.lock().clone();
        match request.and_then(|req| self.find_response(&req)) {
            Some(resp) => Ok(resp),
            None => Err(TransportError::Timeout),
        }
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.link_up.load(Ordering::SeqCst) {
            return Err(TransportError::LinkLost("mock link down".to_string()));
        }
        debug!(request = %hex::encode(bytes), "mock transport write");
        *self.last_request.lock() = Some(bytes.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn descriptor(&self) -> String {
        "mock://".to_string()
    }
}
