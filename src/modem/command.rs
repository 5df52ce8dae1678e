//! Command values handed to the executor.
//!
//! [`Command`] is the plain request/response record the executor fills in.
//! [`AtCommand`] is the contract per-command encoders and decoders implement
//! to plug into [`Engine::send`](super::Engine::send); the engine never looks
//! at command semantics, it only moves bytes and resolves a [`Status`].

use std::time::Duration;

use super::buffer::copy_truncated;
use super::settings::DEFAULT_COMMAND_TIMEOUT;
use super::status::Status;

/// One request and the transcript it produced.
///
/// Created by the caller, populated only by the executor during a single
/// `execute` call and read by the caller afterwards.
#[derive(Debug, Clone)]
pub struct Command {
    request: String,
    payload: Option<Vec<u8>>,
    response: String,
    response_capacity: Option<usize>,
    status: Status,
    /// Transcript bytes already copied, measured from the start of the block.
    copied: usize,
    truncated: bool,
}

impl Command {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            payload: None,
            response: String::new(),
            response_capacity: None,
            status: Status::Invalid,
            copied: 0,
            truncated: false,
        }
    }

    /// Raw bytes to write after the modem prompts with `"> "`.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Bound the captured response. Without this the engine default applies.
    pub fn with_response_capacity(mut self, capacity: usize) -> Self {
        self.response_capacity = Some(capacity);
        self
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// True when the transcript did not fit and was cut.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Response lines between the echo and the status line, without blanks.
    pub fn info_lines(&self) -> Vec<&str> {
        let mut lines: Vec<&str> = self
            .response
            .split("\r\n")
            .skip(1)
            .map(|l| l.trim_matches('\r'))
            .filter(|l| !l.is_empty())
            .collect();
        if lines
            .last()
            .is_some_and(|l| Status::classify(l).is_terminal())
        {
            lines.pop();
        }
        lines
    }

    pub(crate) fn reset(&mut self, default_capacity: usize) {
        self.response.clear();
        self.response_capacity.get_or_insert(default_capacity);
        self.status = Status::Invalid;
        self.copied = 0;
        self.truncated = false;
    }

    pub(crate) fn copied(&self) -> usize {
        self.copied
    }

    /// Append the next transcript fragment, truncating at the capacity.
    pub(crate) fn append_transcript(&mut self, fragment: &[u8]) {
        let capacity = self.response_capacity.unwrap_or(usize::MAX);
        if copy_truncated(&mut self.response, fragment, capacity) {
            self.truncated = true;
        }
        self.copied += fragment.len();
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }
}

/// Contract for a typed AT command.
pub trait AtCommand: Send {
    /// Write the request line (without the trailing CR) into `into`; return
    /// the number of bytes used.
    fn serialize(&self, into: &mut [u8]) -> usize;

    /// Decode the response transcript. Returns bytes consumed, `0` when the
    /// input is incomplete or not understood.
    fn parse(&mut self, from: &[u8]) -> usize;

    fn timeout(&self) -> Duration {
        DEFAULT_COMMAND_TIMEOUT
    }

    /// Called once when the command ends in [`Status::Timeout`].
    fn on_timeout(&mut self) {}

    /// Payload for commands that enter data mode.
    fn payload(&self) -> Option<&[u8]> {
        None
    }
}

/// An [`AtCommand`] built from literal request text. Keeps the raw response
/// so callers without a dedicated decoder can still inspect it.
#[derive(Debug, Clone, Default)]
pub struct RawCommand {
    pub request: String,
    pub payload: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub response: String,
    pub timed_out: bool,
}

impl RawCommand {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Default::default()
        }
    }
}

impl AtCommand for RawCommand {
    fn serialize(&self, into: &mut [u8]) -> usize {
        let n = self.request.len().min(into.len());
        into[..n].copy_from_slice(&self.request.as_bytes()[..n]);
        n
    }

    fn parse(&mut self, from: &[u8]) -> usize {
        self.response = String::from_utf8_lossy(from).into_owned();
        from.len()
    }

    fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT)
    }

    fn on_timeout(&mut self) {
        self.timed_out = true;
    }

    fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}
