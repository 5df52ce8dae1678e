//! Final result code vocabulary.
//!
//! Only a line that matches one of these codes exactly (case-sensitive) may
//! terminate a command transcript. The data-entry prompt `"> "` is not a line
//! of its own: it is recognized positionally as the last two characters of
//! the whole response because the modem never follows it with CRLF.

use std::fmt;

use serde::Serialize;

/// The prompt a modem emits when it expects raw payload bytes.
pub const DATA_PROMPT: &str = "> ";

/// Terminator that ends a raw payload and returns the modem to command mode.
pub const DATA_TERMINATOR: u8 = 0x1A;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Ok,
    Error,
    Connect,
    SendOk,
    SendFail,
    Ring,
    NoCarrier,
    NoDialtone,
    Busy,
    NoAnswer,
    Proceeding,
    WaitingForInput,
    /// No vocabulary match, or the transcript was malformed.
    Invalid,
    /// No terminating status line before the deadline. Engine-only.
    Timeout,
}

const VOCABULARY: &[(&str, Status)] = &[
    ("OK", Status::Ok),
    ("ERROR", Status::Error),
    ("CONNECT", Status::Connect),
    ("SEND OK", Status::SendOk),
    ("SEND FAIL", Status::SendFail),
    ("RING", Status::Ring),
    ("NO CARRIER", Status::NoCarrier),
    ("NO DIALTONE", Status::NoDialtone),
    ("BUSY", Status::Busy),
    ("NO ANSWER", Status::NoAnswer),
    ("PROCEEDING", Status::Proceeding),
];

impl Status {
    /// Map a single status line (without CRLF) to a code.
    pub fn classify(line: &str) -> Status {
        VOCABULARY
            .iter()
            .find(|(text, _)| *text == line)
            .map(|(_, status)| *status)
            .unwrap_or(Status::Invalid)
    }

    /// Byte-slice flavour of [`Status::classify`] used by the classifier,
    /// which works on raw buffer contents.
    pub fn classify_bytes(line: &[u8]) -> Status {
        match std::str::from_utf8(line) {
            Ok(text) => Status::classify(text),
            Err(_) => Status::Invalid,
        }
    }

    /// Derive the status of a whole captured response: a trailing prompt wins,
    /// otherwise the resolved status line is looked up in the vocabulary.
    pub fn from_response(response: &str, status_line: &str) -> Status {
        if response.ends_with(DATA_PROMPT) {
            return Status::WaitingForInput;
        }
        Status::classify(status_line)
    }

    /// Text as the modem prints it; engine-only codes get a descriptive name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::WaitingForInput => DATA_PROMPT,
            Status::Invalid => "INVALID",
            Status::Timeout => "TIMEOUT",
            other => VOCABULARY
                .iter()
                .find(|(_, status)| status == other)
                .map(|(text, _)| *text)
                .unwrap_or("INVALID"),
        }
    }

    /// Whether the status reports the command as accepted by the modem.
    pub fn is_success(&self) -> bool {
        matches!(self, Status::Ok | Status::SendOk | Status::Connect)
    }

    /// Whether a line with this status may terminate a transcript.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Invalid | Status::Timeout)
    }

    /// Convert a final status into a `Result` for callers that only care about
    /// success vs. failure.
    pub fn into_result(self) -> Result<Status, super::EngineError> {
        use super::EngineError;
        match self {
            s if s.is_success() || s == Status::WaitingForInput => Ok(s),
            Status::Timeout => Err(EngineError::Timeout),
            Status::Invalid => Err(EngineError::InvalidStatus),
            other => Err(EngineError::Rejected(other)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::WaitingForInput => write!(f, "WAITING_FOR_INPUT"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}
