//! Serial port transport.
//!
//! `serialport` is blocking, so the port is bridged onto an in-memory duplex
//! stream: a blocking thread pumps modem output into the stream and an async
//! task writes whatever the engine sends out to the port.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serialport::SerialPort;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tokio::time::sleep;

use crate::logutil::escape_bytes;

const BRIDGE_CAPACITY: usize = 4096;

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

fn lock_port(port: &SharedPort) -> std::sync::MutexGuard<'_, Box<dyn SerialPort>> {
    port.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Modem control lines that are not part of the byte stream.
pub struct SerialControl {
    port: SharedPort,
}

impl SerialControl {
    /// Drive the power key (wired to DTR) for `duration`, then let it go.
    pub async fn pulse_power_key(&self, duration: Duration) -> Result<()> {
        info!("Pulsing modem power key for {:?}", duration);
        lock_port(&self.port)
            .write_data_terminal_ready(false)
            .map_err(|e| anyhow!("Failed to drive DTR: {}", e))?;
        sleep(duration).await;
        lock_port(&self.port)
            .write_data_terminal_ready(true)
            .map_err(|e| anyhow!("Failed to release DTR: {}", e))?;
        Ok(())
    }
}

/// Open `port_name` (8N1) and return a stream suitable for
/// [`ModemSession::start`](super::ModemSession::start).
pub async fn open_serial_link(port_name: &str, baud_rate: u32) -> Result<(DuplexStream, SerialControl)> {
    debug!("Opening serial port {} at {} baud", port_name, baud_rate);

    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(500));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder
        .open()
        .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;

    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    sleep(Duration::from_millis(150)).await;

    // Clear boot banners so the first command starts on a clean line.
    let mut purge_buf = [0u8; 512];
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let _ = port.read(&mut purge_buf);
        }
    }

    let read_port = port
        .try_clone()
        .map_err(|e| anyhow!("Failed to clone serial port handle: {}", e))?;
    let shared: SharedPort = Arc::new(Mutex::new(port));

    let (engine_side, link_side) = tokio::io::duplex(BRIDGE_CAPACITY);
    let (mut from_engine, to_engine) = tokio::io::split(link_side);

    let handle = Handle::current();
    std::thread::Builder::new()
        .name("modem-serial-rx".into())
        .spawn(move || pump_port_to_stream(read_port, to_engine, handle))
        .map_err(|e| anyhow!("Failed to spawn serial reader thread: {}", e))?;

    let write_port = shared.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        loop {
            let n = match from_engine.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let data = buf[..n].to_vec();
            let port = write_port.clone();
            let written = tokio::task::spawn_blocking(move || {
                let mut port = lock_port(&port);
                port.write_all(&data)?;
                port.flush()
            })
            .await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Serial write failed: {}", e),
                Err(e) => {
                    warn!("Serial writer task failed: {}", e);
                    break;
                }
            }
        }
        debug!("Serial writer bridge stopped");
    });

    info!("Serial port {} ready", port_name);
    Ok((engine_side, SerialControl { port: shared }))
}

fn pump_port_to_stream(
    mut port: Box<dyn SerialPort>,
    mut to_engine: tokio::io::WriteHalf<DuplexStream>,
    handle: Handle,
) {
    let mut buf = [0u8; 256];
    loop {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                log::trace!("serial RX {}", escape_bytes(&buf[..n]));
                if handle.block_on(to_engine.write_all(&buf[..n])).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Serial read failed: {}", e);
                break;
            }
        }
    }
    debug!("Serial reader bridge stopped");
}
