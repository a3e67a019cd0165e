//! Batch scheduler -- interleaves bundle batches with probe bursts through one gate.
//!
//! Bundle tasks are pulled from a stream and collected into batches of
//! `bundle_batch_size`. Each batch runs concurrently and is awaited as a whole
//! (every task must reach a terminal state). Then `probe_batch_size` probes run
//! concurrently and are awaited, and only after that does the next batch start.
//! Both task classes share the same [`DownloadGate`], so the process stays within
//! `max_concurrent_requests` connections.
//!
//! Split into:
//! - this module: batching loop and counters
//! - [`execution`]: single-task execution (admission, fetch, cache update)

mod execution;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::StreamExt;
use futures::future::join_all;
use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::ContentCache;
use crate::config::SchedulerConfig;
use crate::gate::DownloadGate;
use crate::transport::Transport;
use crate::types::{DownloadTask, Event, SchedulerReport, TaskOutcome};

/// Counters owned by the scheduler, updated at task completion points
#[derive(Debug, Default)]
pub struct BatchCounter {
    considered: AtomicU64,
    pending_bundles: AtomicU64,
    total_success: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    skipped: AtomicU64,
    probes_succeeded: AtomicU64,
    probes_failed: AtomicU64,
    probes_cancelled: AtomicU64,
    batches: AtomicU64,
    probe_cycles: AtomicU64,
}

impl BatchCounter {
    /// Bundles of the current batch that have not reached a terminal state
    pub fn pending_bundle_count(&self) -> u64 {
        self.pending_bundles.load(Ordering::SeqCst)
    }

    /// Bundles downloaded by this scheduler
    pub fn total_success_count(&self) -> u64 {
        self.total_success.load(Ordering::SeqCst)
    }

    /// Snapshot of every counter
    pub fn report(&self) -> SchedulerReport {
        SchedulerReport {
            bundles_considered: self.considered.load(Ordering::SeqCst),
            bundles_downloaded: self.total_success.load(Ordering::SeqCst),
            bundles_failed: self.failed.load(Ordering::SeqCst),
            bundles_cancelled: self.cancelled.load(Ordering::SeqCst),
            bundles_skipped: self.skipped.load(Ordering::SeqCst),
            probes_succeeded: self.probes_succeeded.load(Ordering::SeqCst),
            probes_failed: self.probes_failed.load(Ordering::SeqCst),
            probes_cancelled: self.probes_cancelled.load(Ordering::SeqCst),
            batches: self.batches.load(Ordering::SeqCst),
            probe_cycles: self.probe_cycles.load(Ordering::SeqCst),
        }
    }
}

/// Groups bundle tasks into batches and interleaves probe cycles
pub struct BatchScheduler {
    config: SchedulerConfig,
    skip_locally_stored: bool,
    gate: DownloadGate,
    cache: Arc<ContentCache>,
    transport: Arc<dyn Transport>,
    event_tx: broadcast::Sender<Event>,
    counters: BatchCounter,
    target_reached: AtomicBool,
}

impl BatchScheduler {
    /// Create a scheduler over shared components
    pub fn new(
        config: SchedulerConfig,
        gate: DownloadGate,
        cache: Arc<ContentCache>,
        transport: Arc<dyn Transport>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            config,
            skip_locally_stored: false,
            gate,
            cache,
            transport,
            event_tx,
            counters: BatchCounter::default(),
            target_reached: AtomicBool::new(false),
        }
    }

    /// Skip bundles the local store already holds instead of fetching them
    #[must_use]
    pub fn skip_locally_stored(mut self, skip: bool) -> Self {
        self.skip_locally_stored = skip;
        self
    }

    /// Live counters
    pub fn counters(&self) -> &BatchCounter {
        &self.counters
    }

    /// Gate shared by both task classes
    pub fn gate(&self) -> &DownloadGate {
        &self.gate
    }

    /// Consume `source` until it ends, the bundle ceiling is hit, or `cancel` fires.
    ///
    /// A final partial batch is still executed and followed by one probe cycle. A
    /// source that yields nothing produces no probe cycle.
    pub async fn run<S>(&self, source: S, cancel: &CancellationToken) -> SchedulerReport
    where
        S: Stream<Item = DownloadTask>,
    {
        let mut source = std::pin::pin!(source);
        let batch_size = self.config.bundle_batch_size.max(1);
        let mut batch: Vec<DownloadTask> = Vec::with_capacity(batch_size);
        let mut considered: usize = 0;

        loop {
            if cancel.is_cancelled() {
                debug!("Cancellation observed, no further bundles will be scheduled");
                break;
            }
            if let Some(limit) = self.config.max_bundles_considered
                && considered >= limit
            {
                info!(limit, "Bundle ceiling reached, truncating source");
                break;
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = source.next() => next,
            };
            let Some(task) = next else {
                break;
            };

            considered += 1;
            self.counters.considered.fetch_add(1, Ordering::SeqCst);
            batch.push(task);

            if batch.len() >= batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                if let Some(number) = self.run_batch(full, cancel).await {
                    self.run_probe_cycle(number, cancel).await;
                }
            }
        }

        if !batch.is_empty()
            && let Some(number) = self.run_batch(batch, cancel).await
        {
            self.run_probe_cycle(number, cancel).await;
        }

        let report = self.counters.report();
        info!(
            considered = report.bundles_considered,
            downloaded = report.bundles_downloaded,
            failed = report.bundles_failed,
            cancelled = report.bundles_cancelled,
            batches = report.batches,
            probe_cycles = report.probe_cycles,
            "Scheduler finished"
        );
        report
    }

    /// Run every task of `batch` concurrently and wait for all of them
    ///
    /// Returns the batch number, or `None` when cancellation kept every task from being
    /// admitted. Such a batch is not counted.
    async fn run_batch(&self, batch: Vec<DownloadTask>, cancel: &CancellationToken) -> Option<u64> {
        let size = batch.len();
        self.counters
            .pending_bundles
            .fetch_add(size as u64, Ordering::SeqCst);
        debug!(size, "Submitting bundle batch");

        let outcomes = join_all(batch.into_iter().map(|task| self.execute(task, cancel))).await;
        if !any_admitted(&outcomes) {
            debug!(size, "Bundle batch cancelled before any admission");
            return None;
        }

        let number = self.counters.batches.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            batch = number,
            size,
            total_downloaded = self.cache.downloaded_count(),
            "Bundle batch completed"
        );
        self.emit(Event::BatchCompleted {
            batch: number,
            size,
        });
        Some(number)
    }

    /// Run `probe_batch_size` probes concurrently and wait for all of them
    ///
    /// The cycle is counted only if at least one probe was admitted.
    async fn run_probe_cycle(&self, cycle: u64, cancel: &CancellationToken) {
        let size = self.config.probe_batch_size;
        if size == 0 {
            return;
        }

        let probes = (0..size).map(|_| {
            let task = DownloadTask::probe(self.config.probe_url.clone());
            self.execute(task, cancel)
        });
        let outcomes = join_all(probes).await;
        if !any_admitted(&outcomes) {
            debug!(cycle, size, "Probe cycle cancelled before any admission");
            return;
        }

        self.counters.probe_cycles.fetch_add(1, Ordering::SeqCst);
        debug!(cycle, size, "Probe cycle completed");
        self.emit(Event::ProbeCycleCompleted { cycle, size });
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Every outcome other than `Cancelled` comes from a task that held a permit
fn any_admitted(outcomes: &[TaskOutcome]) -> bool {
    outcomes.iter().any(|o| *o != TaskOutcome::Cancelled)
}
