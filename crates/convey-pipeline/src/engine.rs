use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};

use convey_core::catalog::{SourceCatalog, SourceEntry};
use convey_core::config::{ConveyConfig, TRANSIENT_RETRY_SECS};
use convey_queue::MessageQueue;
use convey_store::faults::KIND_ASSEMBLY_REJECTED;
use convey_store::status::MODE_HISTORICAL;
use convey_store::{Candidate, ScanMode, Store};

use crate::assembler::{assemble, AssemblyOutcome, RejectReason};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::ingestor::Ingestor;
use crate::stats::Stats;

/// Width of one historical catch-up window.
const HISTORICAL_WINDOW_HOURS: i64 = 24;

/// The continuous CDC driver: collect → assemble → dispatch per source, one
/// historical pass, one ingestion pass, sleep, repeat.
///
/// Single instance only: candidate reads and processed marks are not atomic
/// across processes, so a second driver would duplicate dispatches.
pub struct CdcEngine {
    config: ConveyConfig,
    catalog: SourceCatalog,
    store: Store,
    dispatcher: Dispatcher,
    ingestor: Ingestor,
    stats: Stats,
}

impl CdcEngine {
    pub fn new(
        config: ConveyConfig,
        catalog: SourceCatalog,
        store: Store,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        let pending = Arc::new(DashMap::new());
        let dispatcher = Dispatcher::new(
            queue.clone(),
            config.queue.outbound.clone(),
            store.clone(),
            pending.clone(),
        );
        let ingestor = Ingestor::new(
            queue,
            config.queue.inbound.clone(),
            store.clone(),
            catalog.clone(),
            pending,
        );
        Self {
            config,
            catalog,
            store,
            dispatcher,
            ingestor,
            stats: Stats::new(),
        }
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Main loop. Runs until `shutdown` broadcasts `true`; an in-flight id is
    /// finished before exit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("cdc engine started");
        self.init_modes()?;

        loop {
            if let Err(e) = self.cycle(&shutdown).await {
                if e.is_transient() {
                    warn!(err = %e, "connectivity lost; pausing before retry");
                    tokio::time::sleep(Duration::from_secs(TRANSIENT_RETRY_SECS)).await;
                } else {
                    error!(err = %e, "cycle failed");
                }
            }

            self.stats.cycle_finished();
            if self.stats.cycles() % self.config.cdc.stats_every_cycles.max(1) == 0 {
                self.stats.log_summary();
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.cdc.poll_interval_secs)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
        }

        info!("cdc engine shutting down");
        self.stats.log_summary();
        Ok(())
    }

    fn init_modes(&self) -> Result<()> {
        for entry in self.catalog.enabled() {
            self.store.ensure_mode(&entry.mode_key, true)?;
        }
        self.store
            .ensure_mode(MODE_HISTORICAL, self.config.cdc.historical_enabled)?;
        Ok(())
    }

    async fn cycle(&mut self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let entries: Vec<SourceEntry> = self.catalog.enabled().cloned().collect();
        for entry in &entries {
            if *shutdown.borrow() {
                return Ok(());
            }
            self.process_source(entry, shutdown).await?;
        }

        self.historical_pass(&entries, shutdown).await?;

        let pass = self.ingestor.run_pass().await?;
        self.stats.results_received(pass.received as u64);
        for _ in 0..pass.written {
            self.stats.result_written();
        }

        Ok(())
    }

    /// One normal-mode pass over a single source.
    async fn process_source(
        &mut self,
        entry: &SourceEntry,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        let hours = entry
            .time_filter_hours
            .unwrap_or(self.config.cdc.normal_window_hours);
        let window_start = (Utc::now() - ChronoDuration::hours(hours)).to_rfc3339();
        // Wider than the collection window so a just-pruned processed row can
        // never let an old id slip back in.
        let processed_start = (Utc::now() - ChronoDuration::hours(hours * 2)).to_rfc3339();

        let candidates = self.store.collect_candidates(
            entry,
            &window_start,
            None,
            &processed_start,
            self.config.cdc.batch_size,
            ScanMode::Hot,
        )?;

        for candidate in &candidates {
            self.process_candidate(entry, candidate, &entry.mode_key)
                .await?;
            if *shutdown.borrow() {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Assemble and dispatch one candidate; mode bookkeeping either way.
    ///
    /// Rejected conversations are NOT marked processed in this mode; the
    /// collector will re-observe them until their fragments complete (late
    /// fragments are the common cause of short/missing-channel rejects).
    async fn process_candidate(
        &mut self,
        entry: &SourceEntry,
        candidate: &Candidate,
        mode_key: &str,
    ) -> Result<()> {
        match assemble(&self.store, entry, &candidate.source_id)? {
            AssemblyOutcome::Document(doc) => match self.dispatcher.dispatch(&doc).await {
                Ok(_) => {
                    self.stats.message_sent();
                    self.stats.id_processed();
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(_) => {
                    self.stats.send_failed();
                    self.stats.id_failed();
                }
            },
            AssemblyOutcome::Rejected(reason) => {
                if let RejectReason::MissingChannels { .. } = &reason {
                    self.store.log_error(
                        &candidate.source_id,
                        KIND_ASSEMBLY_REJECTED,
                        &reason.describe(),
                    )?;
                }
                self.stats.id_skipped();
            }
        }

        self.store
            .advance_mode(mode_key, candidate.time.as_deref(), 1)?;
        Ok(())
    }

    /// Walk one 24-hour window forward from the historical watermark.
    async fn historical_pass(
        &mut self,
        entries: &[SourceEntry],
        shutdown: &watch::Receiver<bool>,
    ) -> Result<()> {
        let Some(status) = self.store.mode_status(MODE_HISTORICAL)? else {
            return Ok(());
        };
        if !status.enabled {
            return Ok(());
        }

        let fallback =
            (Utc::now() - ChronoDuration::days(self.config.backfill.days_back)).to_rfc3339();
        let watermark = status.last_processed_at.unwrap_or(fallback);
        let now = Utc::now().to_rfc3339();
        if watermark >= now {
            return Ok(());
        }

        let window_end = next_window_end(&watermark, &now);
        let mut any = false;

        for entry in entries {
            let candidates = self.store.collect_candidates(
                entry,
                &watermark,
                Some(&window_end),
                &watermark,
                self.config.cdc.historical_batch_size,
                ScanMode::Hot,
            )?;
            for candidate in &candidates {
                any = true;
                self.process_candidate(entry, candidate, MODE_HISTORICAL)
                    .await?;
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }

        // An empty window means this slice of history is done; jump the
        // watermark so the walker keeps moving instead of stalling.
        if !any {
            self.store
                .advance_mode(MODE_HISTORICAL, Some(&window_end), 0)?;
            info!(watermark = %window_end, "historical window empty; advanced");
        }
        Ok(())
    }
}

/// End of the next historical window: watermark + 24h, capped at `now`.
fn next_window_end(watermark: &str, now: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(watermark) {
        Ok(dt) => {
            let end = (dt + ChronoDuration::hours(HISTORICAL_WINDOW_HOURS)).to_rfc3339();
            if end.as_str() < now {
                end
            } else {
                now.to_string()
            }
        }
        Err(_) => now.to_string(),
    }
}
