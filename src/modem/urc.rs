//! Unsolicited result code dispatch.
//!
//! The dispatcher owns a single-slot mailbox. Each URC the reader resolves is
//! copied into it and offered to the registered consumers in priority order;
//! the first consumer that accepts it gets a [`UrcLease`] and the next URC is
//! not taken until that lease is released.

use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use super::buffer::{self, copy_truncated, SharedBuffer};
use super::settings::EngineSettings;
use super::ControlMessage;
use crate::logutil::escape_log;
use crate::metrics::EngineMetrics;

/// One notification, trimmed of its surrounding line breaks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrcMessage {
    text: String,
    truncated: bool,
}

impl UrcMessage {
    /// Build from the raw block, keeping at most `capacity` bytes of text.
    pub fn from_block(block: &[u8], capacity: usize) -> Self {
        let start = block
            .iter()
            .position(|b| !matches!(b, b'\r' | b'\n'))
            .unwrap_or(block.len());
        let end = block
            .iter()
            .rposition(|b| !matches!(b, b'\r' | b'\n'))
            .map_or(start, |i| i + 1);
        let mut text = String::new();
        let truncated = copy_truncated(&mut text, &block[start..end], capacity);
        Self { text, truncated }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    message: UrcMessage,
}

#[derive(Debug, Default)]
struct Mailbox {
    slot: Mutex<Slot>,
}

impl Mailbox {
    fn store(&self, message: UrcMessage) -> (u64, String) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.generation += 1;
        slot.message = message;
        (slot.generation, slot.message.text.clone())
    }

    fn read(&self, generation: u64) -> Option<UrcMessage> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        (slot.generation == generation).then(|| slot.message.clone())
    }
}

/// A consumer's claim on the mailbox. Dropping it releases the slot.
pub struct UrcLease {
    mailbox: Arc<Mailbox>,
    generation: u64,
    done: Option<oneshot::Sender<()>>,
}

impl UrcLease {
    /// The claimed notification, or `None` if the dispatcher has already
    /// moved on to the next one.
    pub fn message(&self) -> Option<UrcMessage> {
        self.mailbox.read(self.generation)
    }

    pub fn text(&self) -> Option<String> {
        self.message().map(|m| m.text)
    }

    /// Mark the notification processed so the next one can be delivered.
    pub fn release(self) {}
}

impl Drop for UrcLease {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Something interested in unsolicited notifications.
///
/// `handle` must not block; a consumer that needs time keeps the lease (e.g.
/// moves it into a task) and drops it when done.
pub trait UrcConsumer: Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, text: &str) -> bool;

    fn handle(&self, lease: UrcLease);
}

struct Registration {
    priority: u8,
    consumer: Arc<dyn UrcConsumer>,
}

/// Registered consumers. Cloning shares the same list.
#[derive(Clone, Default)]
pub struct UrcRegistry {
    consumers: Arc<RwLock<Vec<Registration>>>,
}

impl UrcRegistry {
    /// Lower `priority` is offered first; equal priorities keep registration
    /// order.
    pub fn register(&self, priority: u8, consumer: Arc<dyn UrcConsumer>) {
        let mut consumers = self
            .consumers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let at = consumers
            .iter()
            .position(|r| r.priority > priority)
            .unwrap_or(consumers.len());
        debug!("Registering URC consumer {} at priority {}", consumer.name(), priority);
        consumers.insert(at, Registration { priority, consumer });
    }

    pub fn len(&self) -> usize {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ordered(&self) -> Vec<Arc<dyn UrcConsumer>> {
        self.consumers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.consumer.clone())
            .collect()
    }
}

/// Offers notifications to consumers through the mailbox.
pub struct UrcRouter {
    registry: UrcRegistry,
    mailbox: Arc<Mailbox>,
    capacity: usize,
    release_timeout: Duration,
    metrics: Arc<EngineMetrics>,
}

impl UrcRouter {
    pub fn new(registry: UrcRegistry, settings: &EngineSettings, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            registry,
            mailbox: Arc::new(Mailbox::default()),
            capacity: settings.urc_capacity,
            release_timeout: settings.urc_release_timeout,
            metrics,
        }
    }

    /// Copy `block` into the mailbox and offer it. Returns true when a
    /// consumer claimed it; in that case this waits (bounded by the release
    /// timeout) until the consumer is done.
    pub async fn dispatch(&self, block: &str) -> bool {
        self.offer(UrcMessage::from_block(block.as_bytes(), self.capacity)).await
    }

    async fn offer(&self, message: UrcMessage) -> bool {
        if message.text().is_empty() {
            debug!("Skipping empty notification");
            return false;
        }
        if message.is_truncated() {
            warn!("URC cut to {} bytes", self.capacity);
        }
        let (generation, text) = self.mailbox.store(message);
        self.metrics.inc_urcs_dispatched();

        for consumer in self.registry.ordered() {
            if !consumer.accepts(&text) {
                continue;
            }
            let (done_tx, done_rx) = oneshot::channel();
            let lease = UrcLease {
                mailbox: self.mailbox.clone(),
                generation,
                done: Some(done_tx),
            };
            debug!("URC {} claimed by {}", escape_log(&text), consumer.name());
            self.metrics.inc_urcs_claimed();
            consumer.handle(lease);
            if tokio::time::timeout(self.release_timeout, done_rx).await.is_err() {
                warn!(
                    "URC consumer {} did not release within {:?}",
                    consumer.name(),
                    self.release_timeout
                );
            }
            return true;
        }

        self.metrics.inc_urcs_unclaimed();
        info!("Unclaimed URC: {}", escape_log(&text));
        false
    }
}

/// A URC resolved by the reader, still in the shared buffer.
#[derive(Debug)]
pub(crate) struct UrcDelivery {
    pub range: Range<usize>,
    pub copied: oneshot::Sender<()>,
}

/// Dispatcher task fed by the reader.
pub struct UrcDispatcher {
    router: UrcRouter,
    buffer: SharedBuffer,
    deliveries: mpsc::Receiver<UrcDelivery>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl UrcDispatcher {
    pub(crate) fn new(
        router: UrcRouter,
        buffer: SharedBuffer,
        deliveries: mpsc::Receiver<UrcDelivery>,
        control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    ) -> Self {
        Self {
            router,
            buffer,
            deliveries,
            control_rx,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!("Starting URC dispatcher task");
        loop {
            tokio::select! {
                control_msg = self.control_rx.recv() => {
                    match control_msg {
                        Some(ControlMessage::Shutdown) | None => {
                            info!("URC dispatcher received shutdown signal");
                            break;
                        }
                        Some(ControlMessage::Report) => {
                            debug!("Dispatcher: consumers={}", self.router.registry.len());
                        }
                    }
                }

                delivery = self.deliveries.recv() => {
                    let Some(delivery) = delivery else {
                        debug!("Reader closed the URC channel");
                        break;
                    };
                    let message = {
                        let buf = buffer::lock(&self.buffer);
                        UrcMessage::from_block(buf.slice(delivery.range), self.router.capacity)
                    };
                    // The reader may drain the buffer once the copy is taken.
                    let _ = delivery.copied.send(());
                    self.router.offer(message).await;
                }
            }
        }
        info!("URC dispatcher task shutting down");
        Ok(())
    }
}

/// Forwards notifications starting with any of `prefixes` to a channel.
pub struct PrefixConsumer {
    name: String,
    prefixes: Vec<String>,
    tx: mpsc::UnboundedSender<UrcMessage>,
}

impl PrefixConsumer {
    pub fn new(
        name: impl Into<String>,
        prefixes: &[&str],
    ) -> (Self, mpsc::UnboundedReceiver<UrcMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = Self {
            name: name.into(),
            prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            tx,
        };
        (consumer, rx)
    }
}

impl UrcConsumer for PrefixConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, text: &str) -> bool {
        self.prefixes.iter().any(|p| text.starts_with(p.as_str()))
    }

    fn handle(&self, lease: UrcLease) {
        if let Some(message) = lease.message() {
            if self.tx.send(message).is_err() {
                debug!("{}: receiver dropped", self.name);
            }
        }
        lease.release();
    }
}
