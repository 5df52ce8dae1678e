//! AT command engine for a cellular modem.
//!
//! A [`ModemSession`] owns one full-duplex byte stream to the modem and runs
//! two tasks on it: the reader, which captures and classifies everything the
//! modem sends, and the URC dispatcher. Commands are issued through a
//! cloneable [`Engine`]; notifications are consumed by registering a
//! [`UrcConsumer`] with the session's [`UrcRegistry`].

pub mod buffer;
pub mod classifier;
pub mod command;
pub mod errors;
pub mod executor;
pub mod reader;
#[cfg(feature = "serial")]
pub mod serial;
pub mod settings;
pub mod status;
pub mod urc;

use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use buffer::{SharedBuffer, TransportBuffer};
pub use classifier::{classify, Classification};
pub use command::{AtCommand, Command, RawCommand};
pub use errors::EngineError;
pub use executor::Engine;
pub use reader::ModemReader;
pub use settings::EngineSettings;
pub use status::{Status, DATA_PROMPT, DATA_TERMINATOR};
pub use urc::{PrefixConsumer, UrcConsumer, UrcDispatcher, UrcLease, UrcMessage, UrcRegistry, UrcRouter};

use crate::metrics::{EngineMetrics, Snapshot};
use executor::WaiterSlot;

/// Control messages for the session's tasks
#[derive(Debug, Clone, Copy)]
pub enum ControlMessage {
    Shutdown,
    /// Log current task state at debug level.
    Report,
}

pub struct ModemSession {
    engine: Engine,
    registry: UrcRegistry,
    metrics: Arc<EngineMetrics>,
    control: Vec<mpsc::UnboundedSender<ControlMessage>>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl ModemSession {
    /// Split `stream` and spawn the reader and dispatcher tasks on it.
    /// Must be called from within a tokio runtime.
    pub fn start<S>(stream: S, settings: EngineSettings) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let buffer = TransportBuffer::shared(settings.buffer_capacity);
        let waiter = Arc::new(WaiterSlot::default());
        let metrics = Arc::new(EngineMetrics::default());
        let registry = UrcRegistry::default();

        let (urc_tx, urc_rx) = mpsc::channel(1);
        let (reader_control_tx, reader_control_rx) = mpsc::unbounded_channel();
        let (dispatcher_control_tx, dispatcher_control_rx) = mpsc::unbounded_channel();

        let reader = ModemReader::new(
            read_half,
            buffer.clone(),
            waiter.clone(),
            urc_tx,
            reader_control_rx,
            &settings,
            metrics.clone(),
        );
        let router = UrcRouter::new(registry.clone(), &settings, metrics.clone());
        let dispatcher = UrcDispatcher::new(router, buffer.clone(), urc_rx, dispatcher_control_rx);

        info!(
            "Modem session starting (buffer {} bytes, guard {:?}, poll {:?})",
            settings.buffer_capacity, settings.guard_interval, settings.poll_interval
        );
        let engine = Engine::new(Box::new(write_half), buffer, waiter, settings, metrics.clone());
        let tasks = vec![tokio::spawn(reader.run()), tokio::spawn(dispatcher.run())];

        Self {
            engine,
            registry,
            metrics,
            control: vec![reader_control_tx, dispatcher_control_tx],
            tasks,
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine.clone()
    }

    pub fn urc_registry(&self) -> &UrcRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> Snapshot {
        self.metrics.snapshot()
    }

    /// Ask every task to log its state.
    pub fn report(&self) {
        for tx in &self.control {
            let _ = tx.send(ControlMessage::Report);
        }
    }

    /// Stop both tasks and wait for them to exit.
    pub async fn shutdown(self) -> Result<()> {
        for tx in &self.control {
            let _ = tx.send(ControlMessage::Shutdown);
        }
        for task in self.tasks {
            match task.await {
                Ok(result) => result?,
                Err(e) => warn!("Modem task ended abnormally: {}", e),
            }
        }
        info!("Modem session stopped");
        Ok(())
    }
}
