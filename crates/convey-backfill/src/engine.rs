use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{info, warn};

use convey_core::catalog::{SourceCatalog, SourceEntry};
use convey_core::config::{ConveyConfig, TRANSIENT_RETRY_SECS};
use convey_pipeline::assembler::{assemble, AssemblyOutcome};
use convey_pipeline::dispatcher::Dispatcher;
use convey_pipeline::error::Result;
use convey_queue::MessageQueue;
use convey_store::{Candidate, ScanMode, Store};

/// Phase labels for progress logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bulk,
    Delta,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Bulk => "BULK",
            Phase::Delta => "DELTA",
        }
    }
}

#[derive(Debug, Default)]
pub struct BackfillTotals {
    pub processed: u64,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// One-shot historical loader: a full-scan bulk sweep over the retention
/// window, then an index-assisted delta sweep until caught up.
///
/// Unlike the continuous loop, rejected conversations ARE marked processed
/// here (with a skip reason); re-scanning 90 days of malformed ids on every
/// batch would swamp the collector.
pub struct BackfillEngine {
    config: ConveyConfig,
    catalog: SourceCatalog,
    store: Store,
    dispatcher: Dispatcher,
    totals: BackfillTotals,
    started: Instant,
}

impl BackfillEngine {
    pub fn new(
        config: ConveyConfig,
        catalog: SourceCatalog,
        store: Store,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            queue,
            config.queue.outbound.clone(),
            store.clone(),
            Arc::new(DashMap::new()),
        );
        Self {
            config,
            catalog,
            store,
            dispatcher,
            totals: BackfillTotals::default(),
            started: Instant::now(),
        }
    }

    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<BackfillTotals> {
        info!(
            days_back = self.config.backfill.days_back,
            bulk_batch = self.config.backfill.bulk_batch_size,
            delta_batch = self.config.backfill.delta_batch_size,
            "backfill starting"
        );

        self.phase(Phase::Bulk, &shutdown).await?;
        if !*shutdown.borrow() {
            self.phase(Phase::Delta, &shutdown).await?;
        }

        self.print_summary();
        Ok(self.totals)
    }

    /// Loop batched collection until a full pass over all sources is empty.
    async fn phase(&mut self, phase: Phase, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let (window_hours, batch_size, scan) = match phase {
            Phase::Bulk => (
                self.config.backfill.days_back * 24,
                self.config.backfill.bulk_batch_size,
                ScanMode::FullScan,
            ),
            Phase::Delta => (
                self.config.backfill.delta_window_hours,
                self.config.backfill.delta_batch_size,
                ScanMode::Hot,
            ),
        };
        info!(phase = phase.as_str(), window_hours, batch_size, "phase starting");

        let mut batch_num = 0u64;
        loop {
            if *shutdown.borrow() {
                warn!(phase = phase.as_str(), "interrupted");
                return Ok(());
            }

            let window_start = (Utc::now() - ChronoDuration::hours(window_hours)).to_rfc3339();
            let processed_start =
                (Utc::now() - ChronoDuration::hours(window_hours * 2)).to_rfc3339();

            let mut batch_total = 0usize;
            for entry in self.catalog.enabled().cloned().collect::<Vec<_>>() {
                let candidates = self.store.collect_candidates(
                    &entry,
                    &window_start,
                    None,
                    &processed_start,
                    batch_size,
                    scan,
                )?;
                batch_total += candidates.len();
                for candidate in &candidates {
                    self.process(phase, &entry, candidate).await?;
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }

            if batch_total == 0 {
                info!(phase = phase.as_str(), "phase complete - no more conversations");
                return Ok(());
            }

            batch_num += 1;
            info!(
                phase = phase.as_str(),
                batch = batch_num,
                size = batch_total,
                "batch processed"
            );
            tokio::time::sleep(Duration::from_millis(self.config.backfill.batch_pause_ms)).await;
        }
    }

    async fn process(
        &mut self,
        phase: Phase,
        entry: &SourceEntry,
        candidate: &Candidate,
    ) -> Result<()> {
        match assemble(&self.store, entry, &candidate.source_id)? {
            AssemblyOutcome::Document(doc) => match self.dispatcher.dispatch(&doc).await {
                Ok(_) => self.totals.sent += 1,
                Err(e) if e.is_transient() => {
                    warn!(err = %e, "connectivity lost; pausing backfill");
                    tokio::time::sleep(Duration::from_secs(TRANSIENT_RETRY_SECS)).await;
                    self.totals.failed += 1;
                }
                Err(_) => self.totals.failed += 1,
            },
            AssemblyOutcome::Rejected(reason) => {
                // Consume the id so the next batch moves forward.
                self.store.mark_skipped(
                    &candidate.source_id,
                    candidate.time.as_deref(),
                    reason.skip_reason(),
                )?;
                self.totals.skipped += 1;
            }
        }

        self.totals.processed += 1;
        if self.totals.processed % 100 == 0 {
            let elapsed = self.started.elapsed().as_secs_f64();
            let rate = self.totals.processed as f64 / elapsed.max(0.001);
            info!(
                phase = phase.as_str(),
                processed = self.totals.processed,
                sent = self.totals.sent,
                skipped = self.totals.skipped,
                rate = format!("{rate:.1}/sec"),
                "progress"
            );
        }
        Ok(())
    }

    fn print_summary(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        info!(
            processed = self.totals.processed,
            sent = self.totals.sent,
            skipped = self.totals.skipped,
            failed = self.totals.failed,
            elapsed_secs = format!("{elapsed:.1}"),
            "backfill complete"
        );
    }
}
