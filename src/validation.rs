//! Request validation for text written to the modem.
//!
//! A request is written as-is followed by `\r`, so anything that the modem
//! would read as a line break, a data-mode terminator or an escape would
//! split or corrupt the exchange. Payloads for data-entry commands are raw
//! bytes but must not contain the terminator that ends them.

use crate::modem::DATA_TERMINATOR;

/// Longest request line accepted (3GPP TS 27.007 command line limit).
pub const MAX_REQUEST_LEN: usize = 556;

/// Request validation errors with helpful messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("request is empty")]
    Empty,

    #[error("request is too long (maximum {max} bytes)")]
    TooLong { max: usize },

    #[error("request must start with AT")]
    MissingPrefix,

    #[error("request contains control byte 0x{byte:02X} at offset {offset}")]
    ControlByte { byte: u8, offset: usize },

    #[error("request contains non-ASCII characters")]
    NonAscii,

    #[error("payload contains the data terminator at offset {offset}")]
    TerminatorInPayload { offset: usize },
}

/// Check a request line before it is written to the transport.
pub fn validate_request(request: &str) -> Result<(), RequestError> {
    if request.is_empty() {
        return Err(RequestError::Empty);
    }
    if request.len() > MAX_REQUEST_LEN {
        return Err(RequestError::TooLong {
            max: MAX_REQUEST_LEN,
        });
    }
    if !request.is_ascii() {
        return Err(RequestError::NonAscii);
    }
    if let Some((offset, &byte)) = request
        .as_bytes()
        .iter()
        .enumerate()
        .find(|(_, b)| b.is_ascii_control())
    {
        return Err(RequestError::ControlByte { byte, offset });
    }
    // The reader only recognizes a transcript by its echoed "AT" prefix.
    if !request.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("AT")) {
        return Err(RequestError::MissingPrefix);
    }
    Ok(())
}

pub fn validate_payload(payload: &[u8]) -> Result<(), RequestError> {
    match payload.iter().position(|&b| b == DATA_TERMINATOR) {
        Some(offset) => Err(RequestError::TerminatorInPayload { offset }),
        None => Ok(()),
    }
}
