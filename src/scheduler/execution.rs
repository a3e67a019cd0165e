//! Execution of a single bundle or probe task

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::BatchScheduler;
use crate::error::{Error, Result};
use crate::types::{ContentKey, DownloadTask, Event, TaskKind, TaskOutcome};

impl BatchScheduler {
    /// Drive `task` to a terminal state
    pub(super) async fn execute(&self, task: DownloadTask, cancel: &CancellationToken) -> TaskOutcome {
        match task {
            DownloadTask::Bundle { key, url } => {
                let outcome = self.execute_bundle(key, &url, cancel).await;
                self.counters.pending_bundles.fetch_sub(1, Ordering::SeqCst);
                let counter = match outcome {
                    TaskOutcome::Succeeded => &self.counters.total_success,
                    TaskOutcome::Failed => &self.counters.failed,
                    TaskOutcome::Cancelled => &self.counters.cancelled,
                    TaskOutcome::Skipped => &self.counters.skipped,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                outcome
            }
            DownloadTask::Probe { url } => {
                let outcome = self.execute_probe(&url, cancel).await;
                let counter = match outcome {
                    TaskOutcome::Succeeded | TaskOutcome::Skipped => &self.counters.probes_succeeded,
                    TaskOutcome::Failed => &self.counters.probes_failed,
                    TaskOutcome::Cancelled => &self.counters.probes_cancelled,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                outcome
            }
        }
    }

    async fn execute_bundle(&self, key: ContentKey, url: &str, cancel: &CancellationToken) -> TaskOutcome {
        if cancel.is_cancelled() {
            self.finished(TaskKind::Bundle, Some(key), url, TaskOutcome::Cancelled, None);
            return TaskOutcome::Cancelled;
        }

        // Held until the cache entry is recorded.
        let _permit = match self.gate.acquire(cancel).await {
            Ok(permit) => permit,
            Err(_) => {
                self.finished(TaskKind::Bundle, Some(key), url, TaskOutcome::Cancelled, None);
                return TaskOutcome::Cancelled;
            }
        };

        let locally_stored = self.cache.is_cached(&key, url).await;
        if locally_stored {
            debug!(content_key = %key, url = %url, "Cached version hit");
        } else {
            debug!(content_key = %key, url = %url, "Cached version miss");
        }
        if locally_stored && self.skip_locally_stored {
            self.finished(TaskKind::Bundle, Some(key), url, TaskOutcome::Skipped, None);
            return TaskOutcome::Skipped;
        }

        debug!(content_key = %key, url = %url, "Starting bundle download");
        self.emit(Event::TaskStarted {
            kind: TaskKind::Bundle,
            content_key: Some(key),
            url: url.to_string(),
        });

        let bytes = match self.fetch_bundle(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(content_key = %key, url = %url, error = %e, "Bundle download failed");
                self.finished(
                    TaskKind::Bundle,
                    Some(key),
                    url,
                    TaskOutcome::Failed,
                    Some(e.to_string()),
                );
                return TaskOutcome::Failed;
            }
        };

        if let Err(e) = self.cache.store_bytes(&key, url, &bytes).await {
            warn!(content_key = %key, url = %url, error = %e, "Failed to keep bundle bytes locally");
        }
        let total = self.cache.record(key, url).await;
        info!(
            content_key = %key,
            url = %url,
            size = bytes.len(),
            total_downloaded = total,
            "Bundle downloaded"
        );
        self.finished(TaskKind::Bundle, Some(key), url, TaskOutcome::Succeeded, None);
        self.check_target(total, cancel);

        TaskOutcome::Succeeded
    }

    async fn fetch_bundle(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.transport.get(url).await?;
        if bytes.is_empty() {
            return Err(Error::EmptyBundle {
                url: url.to_string(),
            });
        }
        Ok(bytes)
    }

    async fn execute_probe(&self, url: &str, cancel: &CancellationToken) -> TaskOutcome {
        let _permit = match self.gate.acquire(cancel).await {
            Ok(permit) => permit,
            Err(_) => {
                self.finished(TaskKind::Probe, None, url, TaskOutcome::Cancelled, None);
                return TaskOutcome::Cancelled;
            }
        };

        self.emit(Event::TaskStarted {
            kind: TaskKind::Probe,
            content_key: None,
            url: url.to_string(),
        });

        match self.transport.get(url).await {
            Ok(body) => {
                debug!(url = %url, size = body.len(), "Probe completed");
                self.finished(TaskKind::Probe, None, url, TaskOutcome::Succeeded, None);
                TaskOutcome::Succeeded
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Probe failed");
                self.finished(
                    TaskKind::Probe,
                    None,
                    url,
                    TaskOutcome::Failed,
                    Some(e.to_string()),
                );
                TaskOutcome::Failed
            }
        }
    }

    /// Cancel the run once the download target is met (first crossing only)
    fn check_target(&self, total: u64, cancel: &CancellationToken) {
        let Some(target) = self.config.download_target else {
            return;
        };
        if total < target || self.target_reached.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(total_downloaded = total, target, "Download target reached, stopping");
        self.emit(Event::TargetReached {
            total_downloaded: total,
        });
        cancel.cancel();
    }

    fn finished(
        &self,
        kind: TaskKind,
        content_key: Option<ContentKey>,
        url: &str,
        outcome: TaskOutcome,
        error: Option<String>,
    ) {
        self.emit(Event::TaskFinished {
            kind,
            content_key,
            url: url.to_string(),
            outcome,
            error,
        });
    }
}
