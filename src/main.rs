//! Binary entrypoint for the gsmlink CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml`
//! - `send <REQUEST> [--payload <text>] [--timeout <ms>]` - run one AT command and print the result as JSON
//! - `monitor [--seconds <n>]` - log unsolicited notifications
//! - `power` - pulse the modem power key
//!
//! See the library crate docs for module-level details: `gsmlink::`.
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use gsmlink::config::Config;

#[derive(Parser)]
#[command(name = "gsmlink")]
#[command(about = "AT command console for SIM800-class cellular modems")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Execute one command and print status and transcript
    Send {
        /// Request line, e.g. AT+CSQ
        request: String,
        /// Text to write after the "> " prompt
        #[arg(short, long)]
        payload: Option<String>,
        /// Deadline in milliseconds (defaults to the configured command timeout)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Log unsolicited notifications
    Monitor {
        /// Stop after this many seconds (runs until Ctrl-C when omitted)
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Pulse the power key line
    Power,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        Config::create_default(&cli.config).await?;
        println!("Created default configuration at {}", cli.config);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&config, cli.verbose);
    info!("gsmlink v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Send {
            request,
            payload,
            timeout,
        } => {
            let ok = commands::send(&config, request, payload, timeout).await?;
            if !ok {
                std::process::exit(2);
            }
        }
        Commands::Monitor { seconds } => commands::monitor(&config, seconds).await?,
        Commands::Power => commands::power(&config).await?,
    }
    Ok(())
}

#[cfg(feature = "serial")]
mod commands {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use log::{info, warn};
    use serde::Serialize;

    use gsmlink::config::Config;
    use gsmlink::metrics::Snapshot;
    use gsmlink::modem::serial::open_serial_link;
    use gsmlink::modem::{Command, ModemSession, PrefixConsumer, Status};

    #[derive(Serialize)]
    struct SendOutput<'a> {
        status: Status,
        response: &'a str,
        truncated: bool,
        metrics: Snapshot,
    }

    pub async fn send(
        config: &Config,
        request: String,
        payload: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Result<bool> {
        let settings = config.modem.engine_settings();
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(settings.command_timeout);
        let (stream, _control) = open_serial_link(&config.modem.port, config.modem.baud_rate).await?;
        let session = ModemSession::start(stream, settings);

        let mut cmd = Command::new(request);
        if let Some(payload) = payload {
            cmd = cmd.with_payload(payload.into_bytes());
        }
        let status = session.engine().execute(&mut cmd, timeout).await?;

        let output = SendOutput {
            status,
            response: cmd.response(),
            truncated: cmd.is_truncated(),
            metrics: session.metrics(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        session.shutdown().await?;
        Ok(status.is_success())
    }

    pub async fn monitor(config: &Config, seconds: Option<u64>) -> Result<()> {
        let (stream, _control) = open_serial_link(&config.modem.port, config.modem.baud_rate).await?;
        let session = ModemSession::start(stream, config.modem.engine_settings());
        let (consumer, mut rx) = PrefixConsumer::new("monitor", &[""]);
        session.urc_registry().register(u8::MAX, Arc::new(consumer));

        let deadline = async {
            match seconds {
                Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        let mut report = tokio::time::interval(Duration::from_secs(60));
        report.tick().await;

        info!("Monitoring {} for unsolicited notifications", config.modem.port);
        loop {
            tokio::select! {
                Some(message) = rx.recv() => {
                    println!("{}", message.text());
                    if message.is_truncated() {
                        warn!("Notification was truncated");
                    }
                }
                _ = report.tick() => session.report(),
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
            }
        }
        info!("Session counters: {:?}", session.metrics());
        session.shutdown().await
    }

    pub async fn power(config: &Config) -> Result<()> {
        let (_stream, control) = open_serial_link(&config.modem.port, config.modem.baud_rate).await?;
        control.pulse_power_key(config.modem.power_pulse()).await
    }
}

#[cfg(not(feature = "serial"))]
mod commands {
    use anyhow::{bail, Result};

    use gsmlink::config::Config;

    pub async fn send(
        _config: &Config,
        _request: String,
        _payload: Option<String>,
        _timeout_ms: Option<u64>,
    ) -> Result<bool> {
        bail!("built without the `serial` feature")
    }

    pub async fn monitor(_config: &Config, _seconds: Option<u64>) -> Result<()> {
        bail!("built without the `serial` feature")
    }

    pub async fn power(_config: &Config) -> Result<()> {
        bail!("built without the `serial` feature")
    }
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.logging.file.as_ref().and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });
    match log_file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Mirror to the console only when someone is watching it
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
