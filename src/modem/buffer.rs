//! Shared capture buffer.
//!
//! One per modem link. The reader appends to it, the classifier scans it, and
//! the executor and URC dispatcher copy resolved ranges out of it. Every
//! access goes through one `std::sync::Mutex`; the lock is never held across
//! an `.await`.

use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Buf, BytesMut};

use super::classifier::{self, Classification};
use super::errors::EngineError;

pub type SharedBuffer = Arc<Mutex<TransportBuffer>>;

/// Lock the shared buffer. A panic elsewhere cannot leave the byte store
/// half-written, so a poisoned lock is still usable.
pub fn lock(buffer: &SharedBuffer) -> MutexGuard<'_, TransportBuffer> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct TransportBuffer {
    bytes: BytesMut,
    capacity: usize,
    /// End of the transcript already handed to the executor while it is still
    /// growing (data-entry prompt); `None` when nothing is outstanding.
    delivered_at_end: Option<usize>,
    /// Prefix the reader is currently handing off; kept by `purge`.
    handoff_end: Option<usize>,
}

impl TransportBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
            capacity,
            delivered_at_end: None,
            handoff_end: None,
        }
    }

    pub fn shared(capacity: usize) -> SharedBuffer {
        Arc::new(Mutex::new(Self::with_capacity(capacity)))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Append freshly read bytes. The write cursor never passes `capacity`:
    /// if the chunk does not fit, everything buffered is dropped first and the
    /// chunk is cut to the capacity. The returned error is informational; the
    /// buffer is already consistent again.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), EngineError> {
        if self.bytes.len() + chunk.len() <= self.capacity {
            self.bytes.extend_from_slice(chunk);
            return Ok(());
        }
        let dropped = self.bytes.len() + chunk.len().saturating_sub(self.capacity);
        self.bytes.clear();
        self.delivered_at_end = None;
        self.handoff_end = None;
        let keep = chunk.len().min(self.capacity);
        self.bytes.extend_from_slice(&chunk[chunk.len() - keep..]);
        Err(EngineError::BufferOverflow {
            capacity: self.capacity,
            dropped,
        })
    }

    pub fn classify(&self) -> Classification {
        classifier::classify(&self.bytes)
    }

    /// True when `c` resolved a transcript that has not been handed off yet.
    pub fn is_newly_complete(&self, c: &Classification) -> bool {
        c.has_at() && self.delivered_at_end != Some(c.at.end)
    }

    /// Remember a transcript that stays in the buffer after hand-off.
    pub fn mark_delivered(&mut self, at_end: usize) {
        self.delivered_at_end = Some(at_end);
    }

    /// Bytes in `range`, clamped to what is currently buffered.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        let end = range.end.min(self.bytes.len());
        let start = range.start.min(end);
        &self.bytes[start..end]
    }

    /// Drop the first `upto` bytes; offsets of what remains shift down.
    pub fn consume(&mut self, upto: usize) {
        let upto = upto.min(self.bytes.len());
        self.bytes.advance(upto);
        self.delivered_at_end = self
            .delivered_at_end
            .and_then(|end| end.checked_sub(upto))
            .filter(|end| *end > 0);
    }

    /// Blocks up to `end` are being handed off; their ranges must stay valid
    /// until [`finish_handoff`](Self::finish_handoff).
    pub fn begin_handoff(&mut self, end: usize) {
        self.handoff_end = Some(end.min(self.bytes.len()));
    }

    /// Hand-off done: drop the first `consume` bytes.
    pub fn finish_handoff(&mut self, consume: usize) {
        self.handoff_end = None;
        self.consume(consume);
    }

    /// Discard a transcript an abandoned command left unfinished, from its
    /// `AT` to the end of the buffer; returns how many bytes were dropped.
    /// Bytes being handed off and a notification still arriving are kept.
    pub fn purge(&mut self) -> usize {
        let from = self.handoff_end.unwrap_or(0).min(self.bytes.len());
        let Some(at) = classifier::unterminated_at(&self.bytes[from..]) else {
            return 0;
        };
        let keep = from + at;
        let dropped = self.bytes.len() - keep;
        self.bytes.truncate(keep);
        if self.delivered_at_end.is_some_and(|end| end > keep) {
            self.delivered_at_end = None;
        }
        dropped
    }
}

/// Append `src` to `dest` as text without letting `dest` grow past
/// `capacity` bytes. Cuts on a char boundary. Returns true when anything was
/// left out.
pub fn copy_truncated(dest: &mut String, src: &[u8], capacity: usize) -> bool {
    let text = String::from_utf8_lossy(src);
    let room = capacity.saturating_sub(dest.len());
    if text.len() <= room {
        dest.push_str(&text);
        return false;
    }
    let mut cut = room;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    dest.push_str(&text[..cut]);
    true
}
