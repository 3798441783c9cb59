//! Request/response codec for the diagnostic link
//!
//! Pure, stateless transforms between typed commands and wire frames.
//! Dispatch is keyed by [`ProtocolFamily`]: the legacy parameter-ID family
//! uses checksummed mode frames, the diagnostic-services family uses
//! SID-echo framing with negative response codes. Adding a family means
//! adding a variant and its encode/decode pair.
//!
//! Decoding is deterministic: the same bytes and family always produce the
//! same result. Malformed frames are rejected as [`CodecError`], never
//! returned as zeroed data.

pub mod dtc;
pub mod obd2;
pub mod uds;

use carsense_core::config::PidSpec;
use carsense_core::model::{DtcStatus, ProtocolFamily};
use thiserror::Error;

/// A diagnostic request, independent of wire format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Protocol-identification probe sent during handshake
    Identify,
    /// Read one parameter by identifier
    ReadParameter(u16),
    /// Read stored fault codes
    ReadFaultCodes,
    /// Clear stored fault codes
    ClearFaultCodes,
}

/// A fault code as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDtc {
    /// Formatted code, e.g. "P0300"
    pub code: String,
    pub status: DtcStatus,
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Valid identification response
    Identified,
    /// Parameter data for `pid`
    Parameter { pid: u16, data: Vec<u8> },
    /// Stored fault codes
    FaultCodes(Vec<RawDtc>),
    /// Fault codes cleared
    Cleared,
}

/// Negative response codes of the diagnostic-services family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nrc {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLength,
    ConditionsNotCorrect,
    RequestOutOfRange,
    SecurityAccessDenied,
    ResponsePending,
    Other(u8),
}

impl From<u8> for Nrc {
    fn from(code: u8) -> Self {
        match code {
            0x10 => Nrc::GeneralReject,
            0x11 => Nrc::ServiceNotSupported,
            0x12 => Nrc::SubFunctionNotSupported,
            0x13 => Nrc::IncorrectMessageLength,
            0x22 => Nrc::ConditionsNotCorrect,
            0x31 => Nrc::RequestOutOfRange,
            0x33 => Nrc::SecurityAccessDenied,
            0x78 => Nrc::ResponsePending,
            other => Nrc::Other(other),
        }
    }
}

/// Codec errors; the offending exchange is discarded and counted by the
/// session, it never kills the connection on its own
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Frame too short: {0} bytes")]
    ShortFrame(usize),

    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Negative response to service {service:#04x}: {nrc:?}")]
    Negative { service: u8, nrc: Nrc },
}

/// Encode a request for the given protocol family
pub fn encode_request(command: &Command, family: ProtocolFamily) -> Vec<u8> {
    match family {
        ProtocolFamily::Obd2 => obd2::encode(command),
        ProtocolFamily::Uds => uds::encode(command),
    }
}

/// Decode a response frame for the given protocol family
pub fn decode_response(bytes: &[u8], family: ProtocolFamily) -> Result<Frame, CodecError> {
    match family {
        ProtocolFamily::Obd2 => obd2::decode(bytes),
        ProtocolFamily::Uds => uds::decode(bytes),
    }
}

/// Convert raw parameter bytes to a physical value
///
/// Raw bytes are read as a big-endian unsigned integer (up to four bytes),
/// then `physical = raw * scale + offset`, clamped to the spec's range.
pub fn decode_value(spec: &PidSpec, data: &[u8]) -> f64 {
    let mut raw: u32 = 0;
    for &b in data.iter().take(4) {
        raw = (raw << 8) | b as u32;
    }
    let physical = raw as f64 * spec.scale + spec.offset;
    physical.clamp(spec.min, spec.max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use carsense_core::config::PollClass;
    use pretty_assertions::assert_eq;

    fn spec(scale: f64, offset: f64, min: f64, max: f64) -> PidSpec {
        PidSpec {
            id: "test".to_string(),
            name: "Test".to_string(),
            pid: 0x0C,
            unit: "u".to_string(),
            scale,
            offset,
            min,
            max,
            class: PollClass::Comfort,
        }
    }

    #[test]
    fn value_decoding_applies_scale_offset_and_clamp() {
        // Engine RPM: ((A*256)+B)/4
        let rpm = spec(0.25, 0.0, 0.0, 8000.0);
        assert_eq!(decode_value(&rpm, &[0x2E, 0xE0]), 3000.0);

        // Coolant temp: A-40
        let temp = spec(1.0, -40.0, -40.0, 215.0);
        assert_eq!(decode_value(&temp, &[0x5A]), 50.0);

        // Clamped at the top of the range
        assert_eq!(decode_value(&rpm, &[0xFF, 0xFF]), 8000.0);
    }

    #[test]
    fn round_trip_both_families() {
        for family in [ProtocolFamily::Obd2, ProtocolFamily::Uds] {
            let encoded = encode_request(&Command::ClearFaultCodes, family);
            // A cleared response echoes the request semantics back
            let response = match family {
                ProtocolFamily::Obd2 => obd2::frame(&[0x44]),
                ProtocolFamily::Uds => vec![0x54],
            };
            assert_eq!(decode_response(&response, family), Ok(Frame::Cleared));
            assert!(!encoded.is_empty());
        }
    }

    #[test]
    fn decoding_is_deterministic() {
        let bytes = obd2::frame(&[0x41, 0x05, 0x5A]);
        let first = decode_response(&bytes, ProtocolFamily::Obd2);
        let second = decode_response(&bytes, ProtocolFamily::Obd2);
        assert_eq!(first, second);
    }
}
