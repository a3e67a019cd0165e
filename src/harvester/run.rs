//! Crawl and replay entry points

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use super::BundleHarvester;
use crate::cache::load_dictionary;
use crate::crawler::CatalogCrawler;
use crate::error::Result;
use crate::types::{ContentKey, DownloadTask, RunReport};

impl BundleHarvester {
    /// Crawl the remote catalog and download every new bundle it lists.
    ///
    /// Crawler and scheduler run concurrently; the crawler blocks when the scheduler
    /// falls a full batch behind. The run ends when the catalog is exhausted, the
    /// download target is reached, or the token is cancelled. The cache snapshot is
    /// written once on every one of those paths.
    ///
    /// # Errors
    /// Returns the crawler's error when the snapshot index or snapshot body cannot be
    /// fetched. The cache is persisted before the error is returned.
    pub async fn crawl(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        self.prepare_cache().await;

        let crawler = CatalogCrawler::new(
            self.config.catalog.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.cache),
        );
        let scheduler = self.scheduler();
        let (tx, rx) = mpsc::channel::<DownloadTask>(self.config.scheduler.bundle_batch_size.max(1));

        info!(
            concurrency = self.config.scheduler.max_concurrent_requests,
            batch_size = self.config.scheduler.bundle_batch_size,
            probes_per_batch = self.config.scheduler.probe_batch_size,
            "Starting catalog crawl"
        );
        let (crawl, scheduler_report) = tokio::join!(
            crawler.run(tx, &self.cancel),
            scheduler.run(ReceiverStream::new(rx), &self.cancel),
        );

        let persisted = self.persist().await;
        let crawl = crawl?;

        let mut report = RunReport {
            started_at,
            finished_at: Utc::now(),
            scheduler: scheduler_report,
            crawl: Some(crawl),
            persisted_entries: None,
            persist_error: None,
            cancelled: self.cancel.is_cancelled(),
        };
        apply_persist_result(&mut report, persisted);
        Ok(report)
    }

    /// Schedule the entries of a precomputed dictionary
    ///
    /// At most `replay.max_entries` entries are used, in the order given. The cache is
    /// seeded from the previous snapshot first, so entries recorded by earlier runs
    /// survive the persist at the end.
    pub async fn replay(&self, dictionary: Vec<(ContentKey, String)>) -> Result<RunReport> {
        let started_at = Utc::now();
        self.prepare_cache().await;
        let available = dictionary.len();
        let limit = self.config.replay.max_entries.unwrap_or(available);
        let tasks: Vec<DownloadTask> = dictionary
            .into_iter()
            .take(limit)
            .map(|(key, url)| DownloadTask::bundle(key, url))
            .collect();
        info!(
            available,
            scheduled = tasks.len(),
            "Replaying asset bundle dictionary"
        );

        let scheduler_report = self
            .scheduler()
            .run(futures::stream::iter(tasks), &self.cancel)
            .await;
        let persisted = self.persist().await;

        let mut report = RunReport {
            started_at,
            finished_at: Utc::now(),
            scheduler: scheduler_report,
            crawl: None,
            persisted_entries: None,
            persist_error: None,
            cancelled: self.cancel.is_cancelled(),
        };
        apply_persist_result(&mut report, persisted);
        Ok(report)
    }

    /// Load a dictionary file and [`replay`](Self::replay) it
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub async fn replay_file(&self, path: &Path) -> Result<RunReport> {
        let dictionary = load_dictionary(path).await?;
        self.replay(dictionary).await
    }

    /// Seed the cache from the previous snapshot when configured
    ///
    /// A snapshot that exists but cannot be read is moved to `<snapshot>.bak`. If the
    /// move fails the run skips its persist, so the file is never overwritten.
    async fn prepare_cache(&self) {
        if !self.config.cache.seed_from_snapshot {
            return;
        }
        let path = self.cache.snapshot_path();
        let load_error = match load_dictionary(path).await {
            Ok(entries) => {
                let added = self.cache.seed(entries).await;
                info!(entries = added, path = %path.display(), "Seeded cache from previous snapshot");
                return;
            }
            Err(e) => e,
        };

        match self.cache.set_aside_snapshot().await {
            Ok(backup) => warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %load_error,
                "Could not read previous snapshot, kept it as a backup and starting with an empty cache"
            ),
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %load_error,
                    backup_error = %e,
                    "Could not read or back up previous snapshot, this run will not persist"
                );
                self.persisted.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn apply_persist_result(report: &mut RunReport, persisted: Option<Result<usize>>) {
    match persisted {
        Some(Ok(entries)) => report.persisted_entries = Some(entries),
        Some(Err(e)) => report.persist_error = Some(e.to_string()),
        None => {}
    }
}
