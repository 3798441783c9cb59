//! Legacy parameter-ID protocol framing
//!
//! Frames are `[payload..., checksum]` with a trailing CRC-8 over the
//! payload. Requests use the classic mode bytes: mode 01 for the standard
//! PID space, mode 22 with a two-byte identifier for the extended space,
//! mode 03/04 for reading and clearing fault codes. Responses echo the mode
//! with 0x40 added.

use carsense_core::model::DtcStatus;
use crc::{Crc, CRC_8_SMBUS};

use super::{CodecError, Command, Frame, RawDtc};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Request/response mode bytes
pub mod mode {
    pub const SHOW_CURRENT_DATA: u8 = 0x01;
    pub const SHOW_STORED_DTCS: u8 = 0x03;
    pub const CLEAR_DTCS: u8 = 0x04;
    pub const READ_EXTENDED_DATA: u8 = 0x22;
    /// Added to the request mode in a positive response
    pub const RESPONSE_OFFSET: u8 = 0x40;
}

/// Identification probe: request the supported-PID bitmask
const IDENTIFY_PID: u8 = 0x00;

/// Seal a payload into a wire frame by appending the checksum
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = payload.to_vec();
    out.push(CRC8.checksum(payload));
    out
}

pub(super) fn encode(command: &Command) -> Vec<u8> {
    match command {
        Command::Identify => frame(&[mode::SHOW_CURRENT_DATA, IDENTIFY_PID]),
        Command::ReadParameter(pid) if *pid <= 0xFF => {
            frame(&[mode::SHOW_CURRENT_DATA, *pid as u8])
        }
        Command::ReadParameter(pid) => {
            let bytes = pid.to_be_bytes();
            frame(&[mode::READ_EXTENDED_DATA, bytes[0], bytes[1]])
        }
        Command::ReadFaultCodes => frame(&[mode::SHOW_STORED_DTCS]),
        Command::ClearFaultCodes => frame(&[mode::CLEAR_DTCS]),
    }
}

pub(super) fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.len() < 2 {
        return Err(CodecError::ShortFrame(bytes.len()));
    }

    let (payload, checksum) = bytes.split_at(bytes.len() - 1);
    let expected = CRC8.checksum(payload);
    if expected != checksum[0] {
        return Err(CodecError::Checksum {
            expected,
            actual: checksum[0],
        });
    }

    match payload[0] {
        b if b == mode::SHOW_CURRENT_DATA + mode::RESPONSE_OFFSET => {
            if payload.len() < 2 {
                return Err(CodecError::ShortFrame(bytes.len()));
            }
            let pid = payload[1];
            if pid == IDENTIFY_PID {
                return Ok(Frame::Identified);
            }
            Ok(Frame::Parameter {
                pid: pid as u16,
                data: payload[2..].to_vec(),
            })
        }
        b if b == mode::READ_EXTENDED_DATA + mode::RESPONSE_OFFSET => {
            if payload.len() < 3 {
                return Err(CodecError::ShortFrame(bytes.len()));
            }
            let pid = u16::from_be_bytes([payload[1], payload[2]]);
            Ok(Frame::Parameter {
                pid,
                data: payload[3..].to_vec(),
            })
        }
        b if b == mode::SHOW_STORED_DTCS + mode::RESPONSE_OFFSET => {
            Ok(Frame::FaultCodes(decode_dtc_pairs(&payload[1..])))
        }
        b if b == mode::CLEAR_DTCS + mode::RESPONSE_OFFSET => Ok(Frame::Cleared),
        other => Err(CodecError::Malformed(format!(
            "unexpected mode byte {other:#04x}"
        ))),
    }
}

/// Decode two-byte DTC pairs from a mode 03 response; zero pairs are padding
fn decode_dtc_pairs(data: &[u8]) -> Vec<RawDtc> {
    data.chunks_exact(2)
        .filter(|pair| !(pair[0] == 0x00 && pair[1] == 0x00))
        .map(|pair| RawDtc {
            code: format_dtc(pair[0], pair[1]),
            // Mode 03 reports stored (confirmed) codes only
            status: DtcStatus::Confirmed,
        })
        .collect()
}

/// Format a two-byte DTC: prefix letter from the top two bits, then the
/// remaining 14 bits as four hex digits
pub(super) fn format_dtc(high: u8, low: u8) -> String {
    let prefix = match (high >> 6) & 0x03 {
        0 => 'P',
        1 => 'C',
        2 => 'B',
        _ => 'U',
    };
    let number = (((high & 0x3F) as u16) << 8) | low as u16;
    format!("{prefix}{number:04X}")
}
