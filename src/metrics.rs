//! Per-link counters for the modem engine.
//! Cheap relaxed atomics; read them through [`EngineMetrics::snapshot`].
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    commands_issued: AtomicU64,
    commands_timed_out: AtomicU64,
    invalid_transcripts: AtomicU64,
    urcs_dispatched: AtomicU64,
    urcs_claimed: AtomicU64,
    urcs_unclaimed: AtomicU64,
    desync_discards: AtomicU64,
    overflow_resets: AtomicU64,
}

impl EngineMetrics {
    pub fn inc_commands_issued(&self) {
        self.commands_issued.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_commands_timed_out(&self) {
        self.commands_timed_out.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_invalid_transcripts(&self) {
        self.invalid_transcripts.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_urcs_dispatched(&self) {
        self.urcs_dispatched.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_urcs_claimed(&self) {
        self.urcs_claimed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_urcs_unclaimed(&self) {
        self.urcs_unclaimed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_desync_discards(&self) {
        self.desync_discards.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_overflow_resets(&self) {
        self.overflow_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            commands_issued: self.commands_issued.load(Ordering::Relaxed),
            commands_timed_out: self.commands_timed_out.load(Ordering::Relaxed),
            invalid_transcripts: self.invalid_transcripts.load(Ordering::Relaxed),
            urcs_dispatched: self.urcs_dispatched.load(Ordering::Relaxed),
            urcs_claimed: self.urcs_claimed.load(Ordering::Relaxed),
            urcs_unclaimed: self.urcs_unclaimed.load(Ordering::Relaxed),
            desync_discards: self.desync_discards.load(Ordering::Relaxed),
            overflow_resets: self.overflow_resets.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Snapshot {
    pub commands_issued: u64,
    pub commands_timed_out: u64,
    pub invalid_transcripts: u64,
    pub urcs_dispatched: u64,
    pub urcs_claimed: u64,
    pub urcs_unclaimed: u64,
    pub desync_discards: u64,
    pub overflow_resets: u64,
}
