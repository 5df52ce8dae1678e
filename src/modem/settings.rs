use std::time::Duration;

/// Default round-trip deadline for one command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Default minimum spacing between two commands.
pub const DEFAULT_GUARD_INTERVAL: Duration = Duration::from_millis(100);
/// Default reader idle poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tuning for one modem link. Built from `[modem]` in the config file via
/// [`crate::config::ModemConfig::engine_settings`], or from `Default`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub command_timeout: Duration,
    pub guard_interval: Duration,
    pub poll_interval: Duration,
    /// Capture buffer size in bytes.
    pub buffer_capacity: usize,
    /// Upper bound for `Command::response` when the caller does not pick one.
    pub response_capacity: usize,
    /// Upper bound for one notification copied into the URC mailbox.
    pub urc_capacity: usize,
    /// How long the dispatcher waits for a consumer to release a claimed URC.
    pub urc_release_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            guard_interval: DEFAULT_GUARD_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            buffer_capacity: 1024,
            response_capacity: 512,
            urc_capacity: 256,
            urc_release_timeout: Duration::from_secs(10),
        }
    }
}
