use serde::Serialize;
use tracing::info;

/// Process-lifetime counters. Owned by the engine (single writer); reporters
/// only ever see read-only snapshots.
#[derive(Debug, Default)]
pub struct Stats {
    cycles: u64,
    processed: u64,
    skipped: u64,
    failed: u64,
    sent: u64,
    send_failed: u64,
    results_received: u64,
    results_written: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub cycles: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub sent: u64,
    pub send_failed: u64,
    pub results_received: u64,
    pub results_written: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_finished(&mut self) {
        self.cycles += 1;
    }

    pub fn id_processed(&mut self) {
        self.processed += 1;
    }

    pub fn id_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn id_failed(&mut self) {
        self.failed += 1;
    }

    pub fn message_sent(&mut self) {
        self.sent += 1;
    }

    pub fn send_failed(&mut self) {
        self.send_failed += 1;
    }

    pub fn results_received(&mut self, n: u64) {
        self.results_received += n;
    }

    pub fn result_written(&mut self) {
        self.results_written += 1;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles,
            processed: self.processed,
            skipped: self.skipped,
            failed: self.failed,
            sent: self.sent,
            send_failed: self.send_failed,
            results_received: self.results_received,
            results_written: self.results_written,
        }
    }

    /// The periodic statistics block.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            cycles = s.cycles,
            processed = s.processed,
            skipped = s.skipped,
            failed = s.failed,
            sent = s.sent,
            send_failed = s.send_failed,
            results_received = s.results_received,
            results_written = s.results_written,
            "pipeline statistics"
        );
    }
}
