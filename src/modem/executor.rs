//! Command executor.
//!
//! One command is in flight per link: callers serialize on the command
//! channel lock, honor the guard interval, write the request, then wait for
//! the reader to hand over a completed transcript. The data-entry prompt is
//! answered with the payload and the terminator in the same critical section.

use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout_at, Instant};

use super::buffer::{self, SharedBuffer};
use super::command::{AtCommand, Command};
use super::errors::EngineError;
use super::settings::EngineSettings;
use super::status::{Status, DATA_TERMINATOR};
use crate::logutil::{escape_bytes, escape_log};
use crate::metrics::{EngineMetrics, Snapshot};
use crate::validation::{validate_payload, validate_request, RequestError, MAX_REQUEST_LEN};

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A completed transcript announced by the reader. The executor answers on
/// `copied` once it is done reading the buffer: `true` if the block belonged
/// to its command.
#[derive(Debug)]
pub(crate) struct AtReady {
    pub at: Range<usize>,
    pub status: Range<usize>,
    pub copied: oneshot::Sender<bool>,
}

#[derive(Default)]
struct SlotState {
    sender: Option<mpsc::Sender<AtReady>>,
    closed: bool,
}

/// Where the reader finds the command currently waiting for a response.
#[derive(Default)]
pub(crate) struct WaiterSlot {
    state: Mutex<SlotState>,
}

impl WaiterSlot {
    fn register(&self) -> Result<Waiter<'_>, EngineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(EngineError::Closed);
        }
        let (tx, rx) = mpsc::channel(1);
        state.sender = Some(tx);
        Ok(Waiter { slot: self, rx })
    }

    /// Sender for the registered waiter, if a command is in flight.
    pub(crate) fn current(&self) -> Option<mpsc::Sender<AtReady>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
            .clone()
    }

    /// The reader is gone; fail the current and all future waits.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.sender = None;
    }
}

struct Waiter<'a> {
    slot: &'a WaiterSlot,
    rx: mpsc::Receiver<AtReady>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.slot
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sender = None;
    }
}

/// Minimum spacing between the end of one command and the start of the next.
struct GuardTimer {
    interval: Duration,
    ready_at: Option<Instant>,
}

impl GuardTimer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            ready_at: None,
        }
    }

    async fn wait(&self) {
        if let Some(at) = self.ready_at {
            sleep_until(at).await;
        }
    }

    fn restart(&mut self) {
        self.ready_at = Some(Instant::now() + self.interval);
    }
}

struct CommandChannel {
    writer: BoxedWriter,
    guard: GuardTimer,
}

impl CommandChannel {
    async fn write_request(&mut self, request: &str) -> Result<(), EngineError> {
        debug!("TX {}", escape_log(request));
        self.writer.write_all(request.as_bytes()).await?;
        self.writer.write_all(b"\r").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_payload(&mut self, payload: &[u8]) -> Result<(), EngineError> {
        trace!("TX payload {}", escape_bytes(payload));
        self.writer.write_all(payload).await?;
        self.writer.write_all(&[DATA_TERMINATOR]).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

struct EngineInner {
    channel: tokio::sync::Mutex<CommandChannel>,
    buffer: SharedBuffer,
    waiter: Arc<WaiterSlot>,
    settings: EngineSettings,
    metrics: Arc<EngineMetrics>,
}

/// Handle for issuing commands on one modem link. Cheap to clone; every clone
/// shares the same command lock.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub(crate) fn new(
        writer: BoxedWriter,
        buffer: SharedBuffer,
        waiter: Arc<WaiterSlot>,
        settings: EngineSettings,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let guard = GuardTimer::new(settings.guard_interval);
        Self {
            inner: Arc::new(EngineInner {
                channel: tokio::sync::Mutex::new(CommandChannel { writer, guard }),
                buffer,
                waiter,
                settings,
                metrics,
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn metrics(&self) -> Snapshot {
        self.inner.metrics.snapshot()
    }

    /// Run one command to completion.
    ///
    /// Returns the final [`Status`]; the transcript is in `cmd.response()`.
    /// A missing answer is `Ok(Status::Timeout)`, not an error. Errors are
    /// reserved for requests that were never sent (`InvalidRequest`), write
    /// failures (`Io`) and a dead reader (`Closed`).
    pub async fn execute(&self, cmd: &mut Command, timeout: Duration) -> Result<Status, EngineError> {
        validate_request(cmd.request())?;
        if let Some(payload) = cmd.payload() {
            validate_payload(payload)?;
        }

        let mut channel = self.inner.channel.lock().await;
        channel.guard.wait().await;
        self.discard_leftovers();

        let mut waiter = self.inner.waiter.register()?;
        cmd.reset(self.inner.settings.response_capacity);
        self.inner.metrics.inc_commands_issued();

        let result = self.exchange(&mut channel, &mut waiter, cmd, timeout).await;
        drop(waiter);
        channel.guard.restart();
        let status = result?;
        cmd.set_status(status);

        match status {
            Status::Timeout => {
                self.inner.metrics.inc_commands_timed_out();
                warn!(
                    "{} timed out after {:?}; partial: {}",
                    escape_log(cmd.request()),
                    timeout,
                    escape_log(cmd.response())
                );
            }
            Status::Invalid => {
                self.inner.metrics.inc_invalid_transcripts();
                warn!("unrecognized transcript: {}", escape_log(cmd.response()));
            }
            _ => debug!("RX {} -> {}", escape_log(cmd.response()), status),
        }
        Ok(status)
    }

    /// Run a typed command: serialize, execute, then hand a successful
    /// transcript to the command's decoder.
    pub async fn send<C: AtCommand>(&self, command: &mut C) -> Result<Status, EngineError> {
        let mut scratch = [0u8; MAX_REQUEST_LEN];
        let n = command.serialize(&mut scratch).min(MAX_REQUEST_LEN);
        let request =
            std::str::from_utf8(&scratch[..n]).map_err(|_| EngineError::from(RequestError::NonAscii))?;

        let mut cmd = Command::new(request);
        if let Some(payload) = command.payload() {
            cmd = cmd.with_payload(payload);
        }

        let status = self.execute(&mut cmd, command.timeout()).await?;
        if status == Status::Timeout {
            command.on_timeout();
        } else if status.is_success() && command.parse(cmd.response().as_bytes()) == 0 {
            debug!("{} response not understood", escape_log(cmd.request()));
        }
        Ok(status)
    }

    /// Drop the unfinished transcript an earlier, abandoned exchange left in
    /// the buffer. A notification still arriving stays for the reader.
    fn discard_leftovers(&self) {
        let dropped = buffer::lock(&self.inner.buffer).purge();
        if dropped > 0 {
            self.inner.metrics.inc_desync_discards();
            warn!("{}", EngineError::TransportDesync { bytes: dropped });
        }
    }

    async fn exchange(
        &self,
        channel: &mut CommandChannel,
        waiter: &mut Waiter<'_>,
        cmd: &mut Command,
        timeout: Duration,
    ) -> Result<Status, EngineError> {
        channel.write_request(cmd.request()).await?;
        let status = self.await_transcript(waiter, cmd, timeout).await?;
        if status != Status::WaitingForInput {
            return Ok(status);
        }

        let payload = cmd.payload().map(<[u8]>::to_vec).unwrap_or_default();
        channel.write_payload(&payload).await?;
        self.await_transcript(waiter, cmd, timeout).await
    }

    async fn await_transcript(
        &self,
        waiter: &mut Waiter<'_>,
        cmd: &mut Command,
        timeout: Duration,
    ) -> Result<Status, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready = match timeout_at(deadline, waiter.rx.recv()).await {
                Err(_) => return Ok(Status::Timeout),
                Ok(None) => return Err(EngineError::Closed),
                Ok(Some(ready)) => ready,
            };

            let status = {
                let buf = buffer::lock(&self.inner.buffer);
                let block = buf.slice(ready.at.clone());
                if block.starts_with(cmd.request().as_bytes()) {
                    let from = cmd.copied().min(block.len());
                    cmd.append_transcript(&block[from..]);
                    let response = String::from_utf8_lossy(block);
                    let line = String::from_utf8_lossy(buf.slice(ready.status.clone()));
                    Some(Status::from_response(&response, &line))
                } else {
                    debug!("stale transcript: {}", escape_bytes(block));
                    None
                }
            };
            let _ = ready.copied.send(status.is_some());

            match status {
                Some(status) => return Ok(status),
                None => {
                    self.inner.metrics.inc_desync_discards();
                    warn!(
                        "{}",
                        EngineError::TransportDesync {
                            bytes: ready.at.len()
                        }
                    );
                }
            }
        }
    }
}
