//! Harvester -- owns the shared components and drives one run end to end.
//!
//! A harvester holds the gate, the content cache, the transport and the cancellation
//! token. [`BundleHarvester::crawl`] wires the catalog crawler to the batch scheduler
//! through a bounded channel; [`BundleHarvester::replay`] feeds a precomputed dictionary
//! to the same scheduler. Both persist the cache exactly once when they return.
//!
//! Split into:
//! - this module: construction and accessors
//! - [`run`]: crawl and replay entry points
//! - [`lifecycle`]: persistence and shutdown

mod lifecycle;
mod run;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cache::{ContentCache, DiskStore, LocalStore, NoOpStore};
use crate::config::Config;
use crate::error::Result;
use crate::gate::DownloadGate;
use crate::scheduler::BatchScheduler;
use crate::transport::{HttpTransport, Transport};
use crate::types::Event;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Entry point for crawl and replay runs (cloneable, all state is Arc-wrapped)
#[derive(Clone)]
pub struct BundleHarvester {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    cache: Arc<ContentCache>,
    gate: DownloadGate,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
    persisted: Arc<AtomicBool>,
}

impl BundleHarvester {
    /// Build a harvester with the HTTP transport and the configured local store
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP client cannot be built
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config.http, config.scheduler.max_concurrent_requests)?;
        let store: Arc<dyn LocalStore> = match &config.cache.store_dir {
            Some(dir) => {
                let disk = DiskStore::new(dir.clone());
                tracing::info!(path = %disk.root().display(), "Keeping bundle bytes on disk");
                Arc::new(disk)
            }
            None => Arc::new(NoOpStore),
        };
        Self::with_components(config, Arc::new(transport), store)
    }

    /// Build a harvester over caller-supplied transport and store
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid
    pub fn with_components(
        config: Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn LocalStore>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(ContentCache::new(store, config.cache.snapshot_path.clone()));
        let gate = DownloadGate::new(config.scheduler.max_concurrent_requests);
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            transport,
            cache,
            gate,
            event_tx,
            cancel: CancellationToken::new(),
            persisted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe to harvester events
    ///
    /// Slow subscribers may receive `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the run when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared content cache
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Admission gate shared by bundles and probes
    pub fn gate(&self) -> &DownloadGate {
        &self.gate
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn scheduler(&self) -> BatchScheduler {
        BatchScheduler::new(
            self.config.scheduler.clone(),
            self.gate.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.transport),
            self.event_tx.clone(),
        )
        .skip_locally_stored(self.config.cache.skip_locally_stored)
    }
}
