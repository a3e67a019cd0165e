//! Persistence and shutdown coordination.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::types::Event;

use super::BundleHarvester;

impl BundleHarvester {
    /// Write the cache snapshot if this harvester has not done so yet
    ///
    /// Returns `None` when the snapshot was already written by an earlier call.
    pub async fn persist(&self) -> Option<Result<usize>> {
        if self.persisted.swap(true, Ordering::SeqCst) {
            tracing::debug!("Cache already persisted for this harvester");
            return None;
        }

        let result = self.cache.persist().await;
        match &result {
            Ok(entries) => {
                let _ = self.event_tx.send(Event::CachePersisted {
                    entries: *entries,
                    path: self.cache.snapshot_path().to_path_buf(),
                });
            }
            Err(e) => {
                tracing::error!(
                    path = %self.cache.snapshot_path().display(),
                    error = %e,
                    "Failed to persist cache"
                );
            }
        }
        Some(result)
    }

    /// Stop the current run
    ///
    /// Admitted requests finish; nothing new is admitted. The run itself persists the
    /// cache on its way out, so a later [`persist`](Self::persist) is not needed.
    pub fn shutdown(&self) {
        tracing::info!("Initiating shutdown");
        self.cancel.cancel();
        let _ = self.event_tx.send(Event::Shutdown);
    }
}
