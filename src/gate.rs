//! Admission control for network operations
//!
//! Every bundle download and every probe holds a [`GatePermit`] for the whole duration
//! of its request. The permit returns its slot when dropped, so a slot is released
//! exactly once on every exit path of the holder, including errors and panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct GateStats {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    admissions: AtomicU64,
}

/// Concurrency limiter shared by both traffic classes (cloneable, all state is Arc-wrapped)
#[derive(Clone, Debug)]
pub struct DownloadGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<GateStats>,
}

/// Proof of admission; the slot is returned when this is dropped
#[derive(Debug)]
pub struct GatePermit {
    stats: Arc<GateStats>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        // Runs before `_permit` is dropped, so the counter never overstates free slots.
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DownloadGate {
    /// Create a gate admitting at most `capacity` simultaneous operations
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(GateStats::default()),
        }
    }

    /// Wait for a free slot, or give up when `cancel` fires.
    ///
    /// A token that is already cancelled wins over an available slot, so nothing is
    /// admitted after cancellation. Returns [`Error::Cancelled`] without consuming a slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| Error::Other("download gate closed".to_string()))?
            }
        };

        let now = self.stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        self.stats.admissions.fetch_add(1, Ordering::SeqCst);

        Ok(GatePermit {
            stats: Arc::clone(&self.stats),
            _permit: permit,
        })
    }

    /// Maximum number of simultaneous permits
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at once since the gate was created
    pub fn peak_in_flight(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Total permits granted since the gate was created
    pub fn admissions(&self) -> u64 {
        self.stats.admissions.load(Ordering::SeqCst)
    }
}
