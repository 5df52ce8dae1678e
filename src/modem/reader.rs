//! Reader task: the only consumer of the transport's read side.
//!
//! Every chunk is appended to the shared buffer and the buffer is rescanned
//! until nothing more resolves. A completed transcript goes to the waiting
//! command, a URC goes to the dispatcher, and the reader waits for each to
//! finish copying before draining the bytes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

use super::buffer::{self, SharedBuffer};
use super::classifier::Classification;
use super::executor::{AtReady, WaiterSlot};
use super::settings::EngineSettings;
use super::status::Status;
use super::urc::UrcDelivery;
use super::ControlMessage;
use crate::logutil::escape_bytes;
use crate::metrics::EngineMetrics;

const READ_CHUNK: usize = 256;

pub struct ModemReader<R> {
    reader: R,
    buffer: SharedBuffer,
    waiter: Arc<WaiterSlot>,
    urc_tx: mpsc::Sender<UrcDelivery>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    poll_interval: Duration,
    metrics: Arc<EngineMetrics>,
}

impl<R: AsyncRead + Send + Unpin> ModemReader<R> {
    pub(crate) fn new(
        reader: R,
        buffer: SharedBuffer,
        waiter: Arc<WaiterSlot>,
        urc_tx: mpsc::Sender<UrcDelivery>,
        control_rx: mpsc::UnboundedReceiver<ControlMessage>,
        settings: &EngineSettings,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            reader,
            buffer,
            waiter,
            urc_tx,
            control_rx,
            poll_interval: settings.poll_interval,
            metrics,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Starting modem reader task");
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            tokio::select! {
                control_msg = self.control_rx.recv() => {
                    match control_msg {
                        Some(ControlMessage::Shutdown) => {
                            info!("Reader task received shutdown signal");
                            break;
                        }
                        Some(ControlMessage::Report) => {
                            let buffered = buffer::lock(&self.buffer).len();
                            debug!(
                                "Reader: buffered={} waiting_command={} metrics={:?}",
                                buffered,
                                self.waiter.current().is_some(),
                                self.metrics.snapshot()
                            );
                        }
                        None => {
                            warn!("Control channel closed, shutting down reader");
                            break;
                        }
                    }
                }

                read = timeout(self.poll_interval, self.reader.read(&mut chunk)) => {
                    match read {
                        // Idle poll; nothing arrived.
                        Err(_) => {}
                        Ok(Ok(0)) => {
                            info!("Modem transport closed");
                            break;
                        }
                        Ok(Ok(n)) => self.ingest(&chunk[..n]).await,
                        Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => {
                            debug!("Reader interrupted (EINTR), likely shutdown in progress");
                            break;
                        }
                        Ok(Err(e)) => {
                            warn!("Reader error: {} - continuing operation", e);
                            sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
            }
        }

        self.waiter.close();
        info!("Modem reader task shutting down");
        Ok(())
    }

    async fn ingest(&mut self, chunk: &[u8]) {
        trace!("RX {} bytes: {}", chunk.len(), escape_bytes(chunk));
        if let Err(e) = buffer::lock(&self.buffer).append(chunk) {
            self.metrics.inc_overflow_resets();
            warn!("{}", e);
        }
        self.drain_resolved().await;
    }

    /// Hand off everything the classifier can resolve, one pass at a time.
    async fn drain_resolved(&mut self) {
        loop {
            let (c, deliver_at, at_status) = {
                let mut buf = buffer::lock(&self.buffer);
                let c = buf.classify();
                let deliver_at = buf.is_newly_complete(&c);
                if !deliver_at && !c.has_urc() {
                    return;
                }
                let at_status = c.status_of(buf.as_bytes());
                buf.begin_handoff(c.consumed());
                (c, deliver_at, at_status)
            };

            // A prompt already answered by the command stays buffered so the
            // reply that follows is captured as part of the same transcript.
            // Until that reply closes it, the open transcript also absorbs any
            // notification the modem emits in between; it lands in the
            // response and is not dispatched.
            let mut retain_at = c.has_at() && !deliver_at;
            if deliver_at {
                let accepted = self.hand_to_executor(&c).await;
                retain_at = accepted && at_status == Status::WaitingForInput;
            }
            if c.has_urc() {
                self.hand_to_dispatcher(&c).await;
            }

            let mut buf = buffer::lock(&self.buffer);
            if !retain_at {
                buf.finish_handoff(c.consumed());
                continue;
            }
            if deliver_at {
                buf.mark_delivered(c.at.end);
            }
            let before_at = if c.has_urc() && c.urc.end <= c.at.start {
                c.urc.end
            } else {
                0
            };
            buf.finish_handoff(before_at);
            if before_at == 0 {
                return;
            }
        }
    }

    async fn hand_to_executor(&mut self, c: &Classification) -> bool {
        let Some(tx) = self.waiter.current() else {
            let preview = escape_bytes(buffer::lock(&self.buffer).slice(c.at.clone()));
            self.metrics.inc_desync_discards();
            warn!("Discarding transcript with no command waiting: {}", preview);
            return false;
        };
        let (copied_tx, copied_rx) = oneshot::channel();
        let ready = AtReady {
            at: c.at.clone(),
            status: c.status.clone(),
            copied: copied_tx,
        };
        if tx.send(ready).await.is_err() {
            debug!("Command stopped waiting before its transcript arrived");
            return false;
        }
        copied_rx.await.unwrap_or(false)
    }

    async fn hand_to_dispatcher(&mut self, c: &Classification) {
        let (copied_tx, copied_rx) = oneshot::channel();
        let delivery = UrcDelivery {
            range: c.urc.clone(),
            copied: copied_tx,
        };
        if self.urc_tx.send(delivery).await.is_err() {
            warn!("URC dispatcher is gone; dropping notification");
            return;
        }
        let _ = copied_rx.await;
    }
}
