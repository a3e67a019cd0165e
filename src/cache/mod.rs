//! Content-addressed dedup cache.
//!
//! Maps content keys to the origin URL they were downloaded from. The map is the
//! source of truth for "already downloaded" during a crawl and is written wholesale to
//! a pretty-printed JSON snapshot when the run halts. Each entry also has an advisory
//! "cached" state that comes from a [`LocalStore`] probe.

mod store;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use store::{DiskStore, LocalStore, NoOpStore};

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::types::ContentKey;

/// In-memory key → origin URL map with snapshot persistence
pub struct ContentCache {
    entries: RwLock<HashMap<ContentKey, String>>,
    downloaded: AtomicU64,
    store: Arc<dyn LocalStore>,
    snapshot_path: PathBuf,
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("store", &self.store.name())
            .field("snapshot_path", &self.snapshot_path)
            .field("downloaded", &self.downloaded.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ContentCache {
    /// Create an empty cache that persists to `snapshot_path`
    pub fn new(store: Arc<dyn LocalStore>, snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            downloaded: AtomicU64::new(0),
            store,
            snapshot_path: snapshot_path.into(),
        }
    }

    /// Insert previously known entries without counting them as downloads
    pub async fn seed(&self, entries: impl IntoIterator<Item = (ContentKey, String)>) -> usize {
        let mut map = self.entries.write().await;
        let before = map.len();
        map.extend(entries);
        map.len() - before
    }

    /// Ask the local store whether the bundle bytes are present (advisory)
    pub async fn is_cached(&self, key: &ContentKey, url: &str) -> bool {
        self.store.is_cached(key, url).await
    }

    /// Hand downloaded bytes to the local store
    pub async fn store_bytes(&self, key: &ContentKey, url: &str, bytes: &[u8]) -> Result<()> {
        self.store.store(key, url, bytes).await
    }

    /// Origin URL recorded for `key`, if any
    pub async fn lookup(&self, key: &ContentKey) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    /// Record a successful download; later calls for the same key overwrite the URL
    ///
    /// Returns the total number of successful downloads recorded so far.
    pub async fn record(&self, key: ContentKey, url: impl Into<String>) -> u64 {
        let url = url.into();
        let mut map = self.entries.write().await;
        if let Some(previous) = map.insert(key, url.clone())
            && previous != url
        {
            debug!(content_key = %key, previous = %previous, url = %url, "Overwrote cache entry");
        }
        // Incremented under the write lock so totals follow insertion order.
        self.downloaded.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Successful downloads recorded during this run (seeded entries not included)
    pub fn downloaded_count(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Number of entries in the map
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True if the map has no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Sorted copy of the map in snapshot form
    pub async fn to_snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(key, url)| (key.to_hex(), url.clone()))
            .collect()
    }

    /// Path the snapshot is written to
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Write the whole map to the snapshot file, replacing any previous file
    ///
    /// Returns the number of entries written.
    pub async fn persist(&self) -> Result<usize> {
        let snapshot = self.to_snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)?;
        let path = &self.snapshot_path;

        write_atomically(path, json.as_bytes())
            .await
            .map_err(|source| Error::Persist {
                path: path.clone(),
                source,
            })?;

        info!(
            entries = snapshot.len(),
            path = %path.display(),
            "Cache saved successfully"
        );
        Ok(snapshot.len())
    }

    /// Move the current snapshot file to `<snapshot>.bak` so a later
    /// [`persist`](Self::persist) cannot overwrite it
    ///
    /// Returns the backup path.
    pub async fn set_aside_snapshot(&self) -> Result<PathBuf> {
        let backup = with_suffix(&self.snapshot_path, ".bak");
        tokio::fs::rename(&self.snapshot_path, &backup)
            .await
            .map_err(|source| Error::Persist {
                path: backup.clone(),
                source,
            })?;
        Ok(backup)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = with_suffix(path, ".tmp");

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Read a key → origin URL dictionary (same format as the snapshot)
///
/// A missing file is an empty dictionary. Entries whose key is not a valid content
/// key are skipped with a warning. Entries come back sorted by key.
pub async fn load_dictionary(path: &Path) -> Result<Vec<(ContentKey, String)>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No dictionary file, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let parsed: BTreeMap<String, String> = serde_json::from_slice(&raw)?;
    let mut entries = Vec::with_capacity(parsed.len());
    for (key, url) in parsed {
        match key.parse::<ContentKey>() {
            Ok(content_key) => entries.push((content_key, url)),
            Err(e) => warn!(key = %key, url = %url, error = %e, "Skipping malformed dictionary key"),
        }
    }

    info!(
        path = %path.display(),
        entries = entries.len(),
        "Loaded asset bundle dictionary"
    );
    Ok(entries)
}
