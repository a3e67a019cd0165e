//! Core types for bundle-harvester

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;

/// Content key identifying an asset bundle (SHA-256 digest)
///
/// The string form is 64 lowercase hex characters and is what the cache snapshot and
/// dictionary files use as map keys.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentKey(pub [u8; 32]);

impl ContentKey {
    /// Length of the digest in bytes
    pub const LEN: usize = 32;

    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentKey({})", self.to_hex())
    }
}

impl std::str::FromStr for ContentKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; Self::LEN];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| Error::InvalidContentKey(format!("{s:?}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContentKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The two traffic classes pushed through the gate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Asset bundle download, recorded in the content cache on success
    Bundle,
    /// Lightweight request whose payload is discarded
    Probe,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Bundle => f.write_str("bundle"),
            TaskKind::Probe => f.write_str("probe"),
        }
    }
}

/// A single unit of network work
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadTask {
    /// Fetch an asset bundle identified by `key` from `url`
    Bundle {
        /// Content key derived from the manifest version and filename
        key: ContentKey,
        /// Origin URL of the bundle
        url: String,
    },
    /// Issue a probe request
    Probe {
        /// Probe endpoint
        url: String,
    },
}

impl DownloadTask {
    /// Create a bundle task
    pub fn bundle(key: ContentKey, url: impl Into<String>) -> Self {
        DownloadTask::Bundle {
            key,
            url: url.into(),
        }
    }

    /// Create a probe task
    pub fn probe(url: impl Into<String>) -> Self {
        DownloadTask::Probe { url: url.into() }
    }

    /// Traffic class of this task
    pub fn kind(&self) -> TaskKind {
        match self {
            DownloadTask::Bundle { .. } => TaskKind::Bundle,
            DownloadTask::Probe { .. } => TaskKind::Probe,
        }
    }

    /// Target URL
    pub fn url(&self) -> &str {
        match self {
            DownloadTask::Bundle { url, .. } | DownloadTask::Probe { url } => url,
        }
    }

    /// Content key, for bundle tasks only
    pub fn content_key(&self) -> Option<ContentKey> {
        match self {
            DownloadTask::Bundle { key, .. } => Some(*key),
            DownloadTask::Probe { .. } => None,
        }
    }
}

/// Entry of the catalog snapshot index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDescriptor {
    /// Content hash of the snapshot body
    pub hash: String,
    /// Number of entities referenced by the snapshot
    pub number_of_entities: u64,
}

/// Entity descriptor; only the type is consulted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity type (e.g. "wearable", "scene")
    #[serde(rename = "type")]
    pub entity_type: String,
}

/// Per-entity manifest listing the bundle files of that entity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityManifest {
    /// Build version the files were published under
    pub version: String,
    /// File names, in publication order
    #[serde(default)]
    pub files: Vec<String>,
}

/// Terminal state of a single task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Request completed successfully
    Succeeded,
    /// Request failed at the transport level (not retried)
    Failed,
    /// Cancellation fired before the task was admitted
    Cancelled,
    /// Bundle already in the local store and skipping is enabled
    Skipped,
}

/// Events emitted during a run
///
/// Delivered over a broadcast channel; slow subscribers may observe `Lagged`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was admitted through the gate
    TaskStarted {
        /// Traffic class
        kind: TaskKind,
        /// Content key (bundles only)
        content_key: Option<ContentKey>,
        /// Target URL
        url: String,
    },
    /// A task reached a terminal state
    TaskFinished {
        /// Traffic class
        kind: TaskKind,
        /// Content key (bundles only)
        content_key: Option<ContentKey>,
        /// Target URL
        url: String,
        /// Terminal state
        outcome: TaskOutcome,
        /// Error description for failed tasks
        error: Option<String>,
    },
    /// Every task of a bundle batch reached a terminal state
    BatchCompleted {
        /// 1-based batch number
        batch: u64,
        /// Tasks in this batch
        size: usize,
    },
    /// Every probe of a probe cycle reached a terminal state
    ProbeCycleCompleted {
        /// 1-based cycle number (matches the preceding batch)
        cycle: u64,
        /// Probes in this cycle
        size: usize,
    },
    /// The configured download target was reached; the run is being cancelled
    TargetReached {
        /// Successful downloads so far
        total_downloaded: u64,
    },
    /// The cache snapshot was written
    CachePersisted {
        /// Entries written
        entries: usize,
        /// Snapshot path
        path: PathBuf,
    },
    /// The harvester is shutting down
    Shutdown,
}

/// Counters of a scheduler run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerReport {
    /// Bundle tasks taken from the source
    pub bundles_considered: u64,
    /// Bundles downloaded and recorded
    pub bundles_downloaded: u64,
    /// Bundles that failed at the transport level
    pub bundles_failed: u64,
    /// Bundles never admitted because of cancellation
    pub bundles_cancelled: u64,
    /// Bundles skipped because the local store already held them
    pub bundles_skipped: u64,
    /// Successful probes
    pub probes_succeeded: u64,
    /// Failed probes
    pub probes_failed: u64,
    /// Probes never admitted because of cancellation
    pub probes_cancelled: u64,
    /// Bundle batches with at least one admitted task
    pub batches: u64,
    /// Probe cycles with at least one admitted probe
    pub probe_cycles: u64,
}

/// Counters of a crawl
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlReport {
    /// Hash of the snapshot that was walked
    pub snapshot_hash: String,
    /// Entity ids extracted from the snapshot body
    pub entities_found: u64,
    /// Entities whose pipeline was started
    pub entities_visited: u64,
    /// Entities skipped because a fetch or decode step failed
    pub entities_failed: u64,
    /// Entities of the configured type
    pub matching_entities: u64,
    /// Bundle tasks handed to the scheduler
    pub tasks_submitted: u64,
    /// Files skipped because their key was already recorded or already submitted
    pub files_deduplicated: u64,
}

/// Summary of a complete harvester run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished (after persistence)
    pub finished_at: DateTime<Utc>,
    /// Scheduler counters
    pub scheduler: SchedulerReport,
    /// Crawl counters (crawl mode only)
    pub crawl: Option<CrawlReport>,
    /// Entries written to the snapshot, or `None` if persistence failed or was skipped
    pub persisted_entries: Option<usize>,
    /// Persistence failure message, if any
    pub persist_error: Option<String>,
    /// True if the run ended through cancellation (signal or download target)
    pub cancelled: bool,
}
