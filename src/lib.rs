//! # bundle-harvester
//!
//! Bounded-concurrency harvester for content-addressed asset bundles.
//!
//! ## Overview
//!
//! The harvester walks a remote content catalog, derives a content key for every
//! platform bundle it finds, and downloads the bundles it has not seen before. Downloads
//! are grouped into batches; after each batch a burst of probe requests goes to a
//! separate endpoint. Both traffic classes pass through one admission gate, so the
//! process never holds more than the configured number of connections.
//!
//! A key → origin URL cache deduplicates work within a run and is written to a JSON
//! snapshot when the run ends (target reached, catalog exhausted, or cancelled).
//!
//! ## Quick Start
//!
//! ```no_run
//! use bundle_harvester::{BundleHarvester, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.scheduler.max_concurrent_requests = 8;
//!
//!     let harvester = BundleHarvester::new(config)?;
//!
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = harvester.crawl().await?;
//!     println!("downloaded {}", report.scheduler.bundles_downloaded);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Content cache and local stores
pub mod cache;
/// Configuration types
pub mod config;
/// Catalog crawler
pub mod crawler;
/// Error types
pub mod error;
/// Admission gate
pub mod gate;
/// Harvester entry point
pub mod harvester;
/// Content key derivation
pub mod key;
/// Batch scheduler
pub mod scheduler;
/// Network transport
pub mod transport;
/// Core types and events
pub mod types;


pub use cache::{ContentCache, DiskStore, LocalStore, NoOpStore};
pub use config::Config;
pub use crawler::CatalogCrawler;
pub use error::{Error, Result};
pub use gate::{DownloadGate, GatePermit};
pub use harvester::BundleHarvester;
pub use key::derive_key;
pub use scheduler::BatchScheduler;
pub use transport::{HttpTransport, Transport};
pub use types::{ContentKey, DownloadTask, Event, RunReport};

/// Stop `harvester` when SIGTERM or SIGINT arrives
///
/// Meant to be spawned next to the run; the run itself persists the cache.
///
/// ```no_run
/// use bundle_harvester::{BundleHarvester, Config, shutdown_on_signal};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let harvester = BundleHarvester::new(Config::default())?;
/// tokio::spawn(shutdown_on_signal(harvester.clone()));
/// harvester.crawl().await?;
/// # Ok(())
/// # }
/// ```
pub async fn shutdown_on_signal(harvester: BundleHarvester) {
    let cancel = harvester.cancel_token();
    tokio::select! {
        _ = wait_for_signal() => harvester.shutdown(),
        // Stopped elsewhere, e.g. download target reached.
        _ = cancel.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Handlers may fail to register in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register one signal handler, waiting on the other");
            only.recv().await;
            tracing::info!("Received shutdown signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
