//! Byte classifier for the shared modem stream.
//!
//! The modem interleaves command transcripts and unsolicited result codes on a
//! single line with nothing but CR/LF conventions to tell them apart:
//!
//! ```text
//!   command transcript   AT<cmd>\r\r\n[<info>\r\n ...]<STATUS>\r\n
//!   data-entry prompt    AT<cmd>\r>
//!   unsolicited code     \r\n<notification>\r\n
//! ```
//!
//! [`classify`] runs a small state machine over the whole buffer and reports
//! where (if anywhere) a complete transcript and a complete notification sit.
//! It is a pure function: the caller re-runs it from the start every time new
//! bytes are appended, and an unfinished block simply yields an empty range.
//!
//! A transcript only ends on a line found in the status vocabulary. Info
//! lines that merely look like a terminator are skipped and the scan keeps
//! looking for a later, genuine one.

use std::ops::Range;

use super::status::{Status, DATA_PROMPT};

/// Ranges resolved by one classification pass. Each range is half-open and is
/// either empty (`start >= end`) or points at a complete block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub at: Range<usize>,
    pub status: Range<usize>,
    pub urc: Range<usize>,
}

impl Classification {
    pub fn incomplete() -> Self {
        Self {
            at: 0..0,
            status: 0..0,
            urc: 0..0,
        }
    }

    pub fn has_at(&self) -> bool {
        !self.at.is_empty()
    }

    pub fn has_urc(&self) -> bool {
        !self.urc.is_empty()
    }

    /// End of everything this pass resolved; bytes before it may be dropped
    /// once both blocks have been handed off.
    pub fn consumed(&self) -> usize {
        let at_end = if self.has_at() { self.at.end } else { 0 };
        let urc_end = if self.has_urc() { self.urc.end } else { 0 };
        at_end.max(urc_end)
    }

    /// Status of the resolved transcript, if one was found.
    pub fn status_of(&self, buf: &[u8]) -> Status {
        if !self.has_at() {
            return Status::Invalid;
        }
        let response = String::from_utf8_lossy(&buf[self.at.clone()]);
        let line = String::from_utf8_lossy(&buf[self.status.clone()]);
        Status::from_response(&response, &line)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    EnterAt,
    At,
    EnterStatus,
    Status,
    EnterWaitUserInput,
    UserInput,
    ExitAt,
    EnterUrc,
    Urc,
    ExitUrc,
    Finished,
}

/// One input symbol: a real byte, or the synthetic end-of-buffer marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Symbol {
    Byte(u8),
    End,
}

struct Scanner<'a> {
    buf: &'a [u8],
    state: State,
    at_start: usize,
    status_start: usize,
    urc_start: usize,
    result: Classification,
}

/// Classify `buf`, which may be a partial, still-growing capture.
pub fn classify(buf: &[u8]) -> Classification {
    let mut scanner = Scanner::new(buf);
    for i in 0..=buf.len() {
        let symbol = match buf.get(i) {
            Some(&b) => Symbol::Byte(b),
            None => Symbol::End,
        };
        scanner.step(i, symbol);
        if scanner.state == State::Finished {
            break;
        }
    }
    scanner.result
}

/// Start of a transcript that was opened by `AT` but has not closed by the
/// end of `buf`, including a prompt still waiting for its payload. `None`
/// when the capture ends outside a transcript, e.g. inside a notification.
pub fn unterminated_at(buf: &[u8]) -> Option<usize> {
    let mut scanner = Scanner::new(buf);
    for (i, &b) in buf.iter().enumerate() {
        scanner.step(i, Symbol::Byte(b));
    }
    if scanner.result.has_at() {
        return None;
    }
    match scanner.state {
        State::At
        | State::EnterStatus
        | State::Status
        | State::EnterWaitUserInput
        | State::UserInput
        | State::ExitAt => Some(scanner.at_start),
        _ => None,
    }
}

impl<'a> Scanner<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            state: State::Start,
            at_start: 0,
            status_start: 0,
            urc_start: 0,
            result: Classification::incomplete(),
        }
    }

    fn step(&mut self, i: usize, symbol: Symbol) {
        let b = match symbol {
            Symbol::End => {
                self.finish(i);
                return;
            }
            Symbol::Byte(b) => b,
        };

        self.state = match self.state {
            State::Start => self.start(i, b),
            State::EnterAt => match b {
                b'T' | b't' => {
                    self.at_start = i - 1;
                    State::At
                }
                _ => self.start(i, b),
            },
            State::At => match b {
                b'\r' => State::EnterStatus,
                _ => State::At,
            },
            State::EnterStatus => match b {
                b'\n' => {
                    self.status_start = i + 1;
                    State::Status
                }
                b'>' => {
                    self.status_start = i;
                    State::EnterWaitUserInput
                }
                b'\r' => State::EnterStatus,
                _ => State::At,
            },
            State::Status => match b {
                b'\r' => State::ExitAt,
                _ => State::Status,
            },
            State::EnterWaitUserInput => match b {
                b' ' => State::UserInput,
                _ => State::At,
            },
            State::UserInput => match b {
                b'\r' => State::ExitAt,
                _ => State::UserInput,
            },
            State::ExitAt => match b {
                b'\n' => self.close_status_line(i),
                b'\r' => State::ExitAt,
                _ => State::Status,
            },
            State::EnterUrc => match b {
                b'\n' => State::Urc,
                b'\r' => {
                    self.urc_start = i;
                    State::EnterUrc
                }
                _ => self.start(i, b),
            },
            State::Urc => match b {
                b'\r' => State::ExitUrc,
                _ => State::Urc,
            },
            State::ExitUrc => match b {
                b'\n' => self.close_urc(i),
                b'\r' => State::ExitUrc,
                _ => State::Urc,
            },
            State::Finished => State::Finished,
        };
    }

    /// `START` transitions. Also used to re-examine a byte that broke an
    /// `A`/`T` or CR/LF opener, so a CR right after a stray `A` still opens a
    /// notification.
    fn start(&mut self, i: usize, b: u8) -> State {
        match b {
            b'A' | b'a' if !self.result.has_at() => State::EnterAt,
            b'\r' if !self.result.has_urc() => {
                self.urc_start = i;
                State::EnterUrc
            }
            _ => State::Start,
        }
    }

    /// A CRLF closed a candidate status line ending at `i - 1`.
    fn close_status_line(&mut self, i: usize) -> State {
        let status_end = i - 1;
        let line = &self.buf[self.status_start.min(status_end)..status_end];
        if Status::classify_bytes(line).is_terminal() {
            self.result.at = self.at_start..i + 1;
            self.result.status = self.status_start..status_end;
            self.after_block()
        } else {
            // Not a terminator: the next line is the next candidate.
            self.status_start = i + 1;
            State::Status
        }
    }

    fn close_urc(&mut self, i: usize) -> State {
        if i == self.urc_start + 3 {
            // "\r\n\r\n": empty text, the second CRLF opens the real block.
            self.urc_start = i - 1;
            return State::Urc;
        }
        self.result.urc = self.urc_start..i + 1;
        self.after_block()
    }

    fn after_block(&self) -> State {
        if self.result.has_at() && self.result.has_urc() {
            State::Finished
        } else {
            State::Start
        }
    }

    /// End of the captured bytes. Only a pending data-entry prompt completes
    /// here; every other non-terminal state means "keep reading".
    fn finish(&mut self, i: usize) {
        let prompt_pending = match self.state {
            State::UserInput => i == self.status_start + DATA_PROMPT.len(),
            State::Status => &self.buf[self.status_start.min(i)..i] == DATA_PROMPT.as_bytes(),
            _ => false,
        };
        if prompt_pending && !self.result.has_at() {
            self.result.at = self.at_start..i;
            self.result.status = self.status_start..i;
        }
        self.state = State::Finished;
    }
}
