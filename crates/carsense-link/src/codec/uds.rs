//! Diagnostic-services protocol framing
//!
//! An ISO 14229 subset carried over a segmented transport, so frames have
//! no checksum of their own; framing validation is the SID echo. Positive
//! responses carry the request SID plus 0x40, negative responses are
//! `[0x7F, sid, nrc]`.

use carsense_core::model::DtcStatus;

use super::{obd2::format_dtc, CodecError, Command, Frame, Nrc, RawDtc};

/// Service ID constants
pub mod service_id {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    pub const READ_DTC_INFO: u8 = 0x19;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const NEGATIVE_RESPONSE: u8 = 0x7F;
    /// Added to the request SID in a positive response
    pub const RESPONSE_OFFSET: u8 = 0x40;
}

/// ReadDTCInformation sub-function: report DTCs by status mask
const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;
/// Default diagnostic session sub-function, used as the identify probe
const DEFAULT_SESSION: u8 = 0x01;
/// Match-all DTC status mask
const ALL_DTCS_MASK: u8 = 0xFF;

/// DTC status byte bits (ISO 14229 DTCStatusMask)
mod status_bit {
    pub const PENDING: u8 = 0x04;
    pub const CONFIRMED: u8 = 0x08;
}

pub(super) fn encode(command: &Command) -> Vec<u8> {
    match command {
        Command::Identify => vec![service_id::DIAGNOSTIC_SESSION_CONTROL, DEFAULT_SESSION],
        Command::ReadParameter(pid) => {
            let bytes = pid.to_be_bytes();
            vec![service_id::READ_DATA_BY_ID, bytes[0], bytes[1]]
        }
        Command::ReadFaultCodes => vec![
            service_id::READ_DTC_INFO,
            REPORT_DTC_BY_STATUS_MASK,
            ALL_DTCS_MASK,
        ],
        Command::ClearFaultCodes => {
            // Group 0xFFFFFF = all groups
            vec![service_id::CLEAR_DIAGNOSTIC_INFO, 0xFF, 0xFF, 0xFF]
        }
    }
}

pub(super) fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::ShortFrame(0));
    }

    if bytes[0] == service_id::NEGATIVE_RESPONSE {
        if bytes.len() < 3 {
            return Err(CodecError::ShortFrame(bytes.len()));
        }
        return Err(CodecError::Negative {
            service: bytes[1],
            nrc: Nrc::from(bytes[2]),
        });
    }

    match bytes[0] {
        b if b == service_id::DIAGNOSTIC_SESSION_CONTROL + service_id::RESPONSE_OFFSET => {
            if bytes.len() < 2 || bytes[1] != DEFAULT_SESSION {
                return Err(CodecError::Malformed(
                    "session control response for wrong session".to_string(),
                ));
            }
            Ok(Frame::Identified)
        }
        b if b == service_id::READ_DATA_BY_ID + service_id::RESPONSE_OFFSET => {
            if bytes.len() < 3 {
                return Err(CodecError::ShortFrame(bytes.len()));
            }
            let pid = u16::from_be_bytes([bytes[1], bytes[2]]);
            Ok(Frame::Parameter {
                pid,
                data: bytes[3..].to_vec(),
            })
        }
        b if b == service_id::READ_DTC_INFO + service_id::RESPONSE_OFFSET => {
            if bytes.len() < 3 || bytes[1] != REPORT_DTC_BY_STATUS_MASK {
                return Err(CodecError::Malformed(
                    "unexpected DTC report sub-function".to_string(),
                ));
            }
            // [0x59, 0x02, availability mask, (dtc_hi, dtc_mid, dtc_lo, status)*]
            Ok(Frame::FaultCodes(decode_dtc_records(&bytes[3..])?))
        }
        b if b == service_id::CLEAR_DIAGNOSTIC_INFO + service_id::RESPONSE_OFFSET => {
            Ok(Frame::Cleared)
        }
        other => Err(CodecError::Malformed(format!(
            "unexpected service id {other:#04x}"
        ))),
    }
}

/// Decode four-byte DTC records: three DTC bytes plus a status byte
fn decode_dtc_records(data: &[u8]) -> Result<Vec<RawDtc>, CodecError> {
    if data.len() % 4 != 0 {
        return Err(CodecError::Malformed(format!(
            "DTC record block of {} bytes is not a multiple of 4",
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(4)
        .map(|rec| {
            let status = if rec[3] & status_bit::CONFIRMED != 0 {
                DtcStatus::Confirmed
            } else if rec[3] & status_bit::PENDING != 0 {
                DtcStatus::Pending
            } else {
                DtcStatus::Cleared
            };
            RawDtc {
                // The first two DTC bytes carry the displayable code; the
                // third is the failure type and stays out of the display form
                code: format_dtc(rec[0], rec[1]),
                status,
            }
        })
        .collect())
}
