//! Catalog crawler -- walks the remote content catalog and feeds bundle tasks to the scheduler.
//!
//! The crawl goes through these stages:
//! 1. Select a snapshot from the index (acceptance band, else the largest one)
//! 2. Fetch the snapshot body and extract entity ids
//! 3. Walk the ids in groups; each group's descriptors are fetched concurrently and the
//!    whole group is awaited before the next one starts
//! 4. For entities of the configured type, fetch the manifest
//! 5. Derive a content key per platform file, drop known keys, submit the rest
//!
//! A failure inside one entity's pipeline is logged and only that entity is skipped.

pub mod catalog;


pub use catalog::{extract_entity_ids, fill_template, select_snapshot};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::config::CatalogConfig;
use crate::error::{Error, Result};
use crate::key::derive_key;
use crate::transport::{Transport, get_json, get_text};
use crate::types::{
    ContentKey, CrawlReport, DownloadTask, EntityDescriptor, EntityManifest, SnapshotDescriptor,
};

#[derive(Debug, Default)]
struct CrawlCounters {
    visited: AtomicU64,
    failed: AtomicU64,
    matching: AtomicU64,
    submitted: AtomicU64,
    deduplicated: AtomicU64,
}

/// Produces bundle tasks from the remote catalog
pub struct CatalogCrawler {
    config: CatalogConfig,
    transport: Arc<dyn Transport>,
    cache: Arc<ContentCache>,
    /// Keys submitted during this run
    queued: Mutex<HashSet<ContentKey>>,
    counters: CrawlCounters,
}

impl CatalogCrawler {
    /// Create a crawler that checks `cache` before submitting a key
    pub fn new(config: CatalogConfig, transport: Arc<dyn Transport>, cache: Arc<ContentCache>) -> Self {
        Self {
            config,
            transport,
            cache,
            queued: Mutex::new(HashSet::new()),
            counters: CrawlCounters::default(),
        }
    }

    /// Crawl the catalog, sending bundle tasks into `sink`.
    ///
    /// Returns when the entity list is exhausted, `cancel` fires, or the receiving side
    /// is gone. Errors are returned only for the snapshot stages; per-entity failures
    /// are counted in the report.
    pub async fn run(
        &self,
        sink: mpsc::Sender<DownloadTask>,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport> {
        let snapshots: Vec<SnapshotDescriptor> =
            get_json(self.transport.as_ref(), &self.config.snapshots_url).await?;
        let snapshot = select_snapshot(&snapshots, self.config.acceptance_band)?;
        info!(
            hash = %snapshot.hash,
            entities = snapshot.number_of_entities,
            candidates = snapshots.len(),
            "Selected catalog snapshot"
        );

        let content_url = format!("{}{}", self.config.contents_url, snapshot.hash);
        let content = get_text(self.transport.as_ref(), &content_url).await?;
        let entity_ids = extract_entity_ids(&content);
        info!(entities = entity_ids.len(), "Extracted entity ids from snapshot");

        let group_size = self.config.entity_group_size.max(1);
        for (index, group) in entity_ids.chunks(group_size).enumerate() {
            if cancel.is_cancelled() {
                debug!(group = index + 1, "Cancellation observed, stopping crawl");
                break;
            }
            if sink.is_closed() {
                debug!(group = index + 1, "Scheduler stopped consuming, stopping crawl");
                break;
            }

            join_all(group.iter().map(|id| self.visit_entity(id, &sink, cancel))).await;
            debug!(
                group = index + 1,
                size = group.len(),
                submitted = self.counters.submitted.load(Ordering::SeqCst),
                "Entity group completed"
            );
        }

        let report = CrawlReport {
            snapshot_hash: snapshot.hash.clone(),
            entities_found: entity_ids.len() as u64,
            entities_visited: self.counters.visited.load(Ordering::SeqCst),
            entities_failed: self.counters.failed.load(Ordering::SeqCst),
            matching_entities: self.counters.matching.load(Ordering::SeqCst),
            tasks_submitted: self.counters.submitted.load(Ordering::SeqCst),
            files_deduplicated: self.counters.deduplicated.load(Ordering::SeqCst),
        };
        info!(
            visited = report.entities_visited,
            failed = report.entities_failed,
            submitted = report.tasks_submitted,
            deduplicated = report.files_deduplicated,
            "Catalog crawl finished"
        );
        Ok(report)
    }

    async fn visit_entity(
        &self,
        entity_id: &str,
        sink: &mpsc::Sender<DownloadTask>,
        cancel: &CancellationToken,
    ) {
        self.counters.visited.fetch_add(1, Ordering::SeqCst);
        match self.walk_entity(entity_id, sink, cancel).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                debug!(entity_id, "Entity walk interrupted");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(entity_id, error = %e, "Skipping entity");
            }
        }
    }

    async fn walk_entity(
        &self,
        entity_id: &str,
        sink: &mpsc::Sender<DownloadTask>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let descriptor_url = format!("{}{}", self.config.contents_url, entity_id);
        let descriptor: EntityDescriptor =
            get_json(self.transport.as_ref(), &descriptor_url).await?;
        if descriptor.entity_type != self.config.entity_type {
            return Ok(());
        }
        self.counters.matching.fetch_add(1, Ordering::SeqCst);

        let manifest_url = fill_template(
            &self.config.manifest_url_template,
            &[("entity_id", entity_id), ("platform", self.config.platform.as_str())],
        );
        let manifest: EntityManifest = get_json(self.transport.as_ref(), &manifest_url).await?;

        for file in manifest
            .files
            .iter()
            .filter(|f| f.ends_with(self.config.platform.as_str()))
        {
            let key = derive_key(&manifest.version, file);
            if !self.claim(key).await {
                self.counters.deduplicated.fetch_add(1, Ordering::SeqCst);
                continue;
            }

            let url = fill_template(
                &self.config.bundle_url_template,
                &[("version", manifest.version.as_str()), ("file", file.as_str())],
            );
            debug!(entity_id, content_key = %key, url = %url, "Submitting bundle");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                sent = sink.send(DownloadTask::bundle(key, url)) => {
                    sent.map_err(|_| Error::Cancelled)?;
                }
            }
            self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// True if `key` is neither in the cache nor already submitted
    async fn claim(&self, key: ContentKey) -> bool {
        if self.cache.lookup(&key).await.is_some() {
            return false;
        }
        match self.queued.lock() {
            Ok(mut queued) => queued.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        }
    }
}
