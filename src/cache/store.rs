//! Local bundle stores.
//!
//! The cache consults a store to tell whether a bundle's bytes are already on this
//! machine. The answer is advisory: it is logged for every bundle and only changes
//! scheduling when `skip_locally_stored` is enabled.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::ContentKey;

/// Trait for local bundle storage implementations
#[async_trait::async_trait]
pub trait LocalStore: Send + Sync {
    /// True if the bytes for `key` are present locally
    async fn is_cached(&self, key: &ContentKey, url: &str) -> bool;

    /// Keep the downloaded bytes for `key`
    async fn store(&self, key: &ContentKey, url: &str, bytes: &[u8]) -> Result<()>;

    /// Name of this implementation, for logs
    fn name(&self) -> &'static str;
}

/// Store that keeps nothing and never reports a hit
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpStore;

#[async_trait::async_trait]
impl LocalStore for NoOpStore {
    async fn is_cached(&self, _key: &ContentKey, _url: &str) -> bool {
        false
    }

    async fn store(&self, _key: &ContentKey, _url: &str, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Content-addressed directory store: `<root>/<first two hex chars>/<full hex key>`
#[derive(Clone, Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Create a store rooted at `root` (created lazily on first write)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the bytes for `key`
    pub fn path_for(&self, key: &ContentKey) -> PathBuf {
        let hex = key.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }
}

#[async_trait::async_trait]
impl LocalStore for DiskStore {
    async fn is_cached(&self, key: &ContentKey, _url: &str) -> bool {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .unwrap_or(false)
    }

    async fn store(&self, key: &ContentKey, _url: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // A partial write never sits at the final path.
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "disk"
    }
}
