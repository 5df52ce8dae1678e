use thiserror::Error;

use super::status::Status;
use crate::validation::RequestError;

/// Errors surfaced by the modem engine.
///
/// `Timeout` and `InvalidStatus` are normally reported in-band as
/// [`Status::Timeout`] / [`Status::Invalid`]; they become errors only when a
/// caller asks for a `Result` via [`Status::into_result`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// No terminating status line arrived within the deadline.
    #[error("no final result code before the deadline")]
    Timeout,

    /// A transcript was captured but carried no recognized status line.
    #[error("transcript has no recognized status line")]
    InvalidStatus,

    /// The capture buffer would have overflowed; its contents were dropped.
    #[error("transport buffer overflow: capacity {capacity} bytes, dropped {dropped} bytes")]
    BufferOverflow { capacity: usize, dropped: usize },

    /// Leftover or stale bytes were found where a fresh block was expected.
    #[error("transport out of sync: discarded {bytes} stale bytes")]
    TransportDesync { bytes: usize },

    /// The modem answered with a final code other than success.
    #[error("modem rejected command: {0}")]
    Rejected(Status),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// The reader task is gone; no response can ever arrive.
    #[error("modem session closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
