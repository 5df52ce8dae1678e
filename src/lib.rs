//! # gsmlink - AT command engine for cellular modems
//!
//! gsmlink drives SIM800-class GSM/GPRS modules over a serial line. It
//! captures everything the modem sends into one shared buffer, tells command
//! transcripts apart from unsolicited result codes (URCs) as they arrive, and
//! hands each to the right party: transcripts to the command that is waiting,
//! URCs to registered consumers.
//!
//! ## Features
//!
//! - **One command at a time**: callers serialize on a lock, with a guard interval between commands.
//! - **Streaming classifier**: transcripts and URCs are recognized in arbitrary chunking and interleaving.
//! - **Data-entry commands**: the `"> "` prompt is answered with a payload and `Ctrl-Z` inside the same exchange.
//! - **URC consumers**: priority-ordered, with a leased single-slot mailbox.
//! - **Bounded memory**: fixed buffer, response and notification capacities; overflow fails closed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gsmlink::config::Config;
//! use gsmlink::modem::{serial::open_serial_link, Command, ModemSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let (stream, _control) = open_serial_link(&config.modem.port, config.modem.baud_rate).await?;
//!     let session = ModemSession::start(stream, config.modem.engine_settings());
//!
//!     let mut csq = Command::new("AT+CSQ");
//!     let status = session.engine().execute(&mut csq, std::time::Duration::from_secs(2)).await?;
//!     println!("{status}: {:?}", csq.info_lines());
//!
//!     session.shutdown().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`modem`] - buffer, classifier, reader, executor and URC dispatch
//! - [`config`] - TOML configuration
//! - [`validation`] - request and payload checks
//! - [`metrics`] - per-link counters
//! - [`logutil`] - single-line rendering of transcripts for logs
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────┐   AtReady    ┌──────────────┐
//!  serial ──▶│ ModemReader  │─────────────▶│    Engine    │──▶ serial
//!            │  (classify)  │              │  (execute)   │
//!            └──────────────┘              └──────────────┘
//!                   │ UrcDelivery
//!                   ▼
//!            ┌──────────────┐   UrcLease   ┌──────────────┐
//!            │UrcDispatcher │─────────────▶│ UrcConsumer  │
//!            └──────────────┘              └──────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod modem;
pub mod validation;
