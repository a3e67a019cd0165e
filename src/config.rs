//! Configuration types for bundle-harvester
//!
//! Every tunable of the scheduler and crawler lives here with a serde default, so an
//! empty file (or no file) yields the stock configuration. Files are read as TOML or
//! JSON depending on their extension.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Batch scheduling and admission settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Simultaneous network operations across both traffic classes (default: 20)
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Bundle tasks per batch (default: 1000)
    #[serde(default = "default_bundle_batch_size")]
    pub bundle_batch_size: usize,

    /// Probe requests issued after every bundle batch (default: 10)
    #[serde(default = "default_probe_batch_size")]
    pub probe_batch_size: usize,

    /// Stop taking bundle tasks from the source after this many (None = unlimited)
    ///
    /// Meant for shortened test runs. Tasks already collected into the current batch
    /// still complete.
    #[serde(default)]
    pub max_bundles_considered: Option<usize>,

    /// Cancel the run once this many bundles were downloaded (None = no target)
    #[serde(default = "default_download_target")]
    pub download_target: Option<u64>,

    /// Endpoint hit by probe requests; the response body is discarded
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            bundle_batch_size: default_bundle_batch_size(),
            probe_batch_size: default_probe_batch_size(),
            max_bundles_considered: None,
            download_target: default_download_target(),
            probe_url: default_probe_url(),
        }
    }
}

/// Half-open range `[low, high)` of acceptable snapshot entity counts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceBand {
    /// Inclusive lower bound
    pub low: u64,
    /// Exclusive upper bound
    pub high: u64,
}

impl AcceptanceBand {
    /// True if `count` lies within the band
    pub fn contains(&self, count: u64) -> bool {
        (self.low..self.high).contains(&count)
    }
}

impl Default for AcceptanceBand {
    fn default() -> Self {
        Self {
            low: 19_000,
            high: 22_000,
        }
    }
}

/// Remote catalog endpoints and crawl shape
///
/// Templates use named placeholders:
/// - `manifest_url_template`: `{entity_id}`, `{platform}`
/// - `bundle_url_template`: `{version}`, `{file}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Snapshot index endpoint (JSON array of `{hash, numberOfEntities}`)
    #[serde(default = "default_snapshots_url")]
    pub snapshots_url: String,

    /// Content endpoint prefix; snapshot bodies and entity descriptors live at `<prefix><id>`
    #[serde(default = "default_contents_url")]
    pub contents_url: String,

    /// Per-entity manifest URL template
    #[serde(default = "default_manifest_url_template")]
    pub manifest_url_template: String,

    /// Bundle file URL template
    #[serde(default = "default_bundle_url_template")]
    pub bundle_url_template: String,

    /// Platform suffix; only manifest files ending with it are fetched (default: "mac")
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Entity type whose manifests are fetched (default: "wearable")
    #[serde(default = "default_entity_type")]
    pub entity_type: String,

    /// Entities walked concurrently before the next group starts (default: 25)
    #[serde(default = "default_entity_group_size")]
    pub entity_group_size: usize,

    /// Preferred snapshot size; the largest snapshot is used when none fits
    #[serde(default)]
    pub acceptance_band: AcceptanceBand,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            snapshots_url: default_snapshots_url(),
            contents_url: default_contents_url(),
            manifest_url_template: default_manifest_url_template(),
            bundle_url_template: default_bundle_url_template(),
            platform: default_platform(),
            entity_type: default_entity_type(),
            entity_group_size: default_entity_group_size(),
            acceptance_band: AcceptanceBand::default(),
        }
    }
}

/// Content cache and local store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Where the key → origin URL snapshot is written (default: "AssetBundleCache.json")
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Precomputed key → origin URL dictionary used by replay mode
    #[serde(default = "default_dictionary_path")]
    pub dictionary_path: PathBuf,

    /// Directory for downloaded bundle bytes (None = bytes are discarded)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,

    /// Load the existing snapshot at startup so recorded keys are skipped (default: true)
    #[serde(default = "default_true")]
    pub seed_from_snapshot: bool,

    /// Skip bundles the local store already holds instead of refetching them (default: false)
    #[serde(default)]
    pub skip_locally_stored: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            dictionary_path: default_dictionary_path(),
            store_dir: None,
            seed_from_snapshot: true,
            skip_locally_stored: false,
        }
    }
}

/// Replay mode settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Dictionary entries scheduled per run (None = all, default: 1500)
    #[serde(default = "default_replay_max_entries")]
    pub max_entries: Option<usize>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_entries: default_replay_max_entries(),
        }
    }
}

/// HTTP client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Connect timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Main configuration for BundleHarvester
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Batch scheduling and admission
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Remote catalog
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Content cache and local store
    #[serde(default)]
    pub cache: CacheConfig,

    /// Replay mode
    #[serde(default)]
    pub replay: ReplayConfig,

    /// HTTP client
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Load a configuration file; `.json` files are read as JSON, anything else as TOML
    ///
    /// The loaded configuration is validated before it is returned.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let config: Config = if is_json {
            serde_json::from_str(&raw)?
        } else {
            toml::from_str(&raw)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Other(format!("failed to render config: {e}")))
    }

    /// Reject values the scheduler or crawler cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        if s.max_concurrent_requests == 0 {
            return Err(Error::config(
                "scheduler.max_concurrent_requests",
                "must be greater than zero",
            ));
        }
        if s.bundle_batch_size == 0 {
            return Err(Error::config(
                "scheduler.bundle_batch_size",
                "must be greater than zero",
            ));
        }
        if s.download_target == Some(0) {
            return Err(Error::config(
                "scheduler.download_target",
                "must be greater than zero when set",
            ));
        }
        check_url("scheduler.probe_url", &s.probe_url)?;

        let c = &self.catalog;
        if c.entity_group_size == 0 {
            return Err(Error::config(
                "catalog.entity_group_size",
                "must be greater than zero",
            ));
        }
        if c.acceptance_band.low >= c.acceptance_band.high {
            return Err(Error::config(
                "catalog.acceptance_band",
                format!(
                    "low ({}) must be below high ({})",
                    c.acceptance_band.low, c.acceptance_band.high
                ),
            ));
        }
        if c.platform.is_empty() {
            return Err(Error::config("catalog.platform", "must not be empty"));
        }
        check_url("catalog.snapshots_url", &c.snapshots_url)?;
        check_url("catalog.contents_url", &c.contents_url)?;
        check_template(
            "catalog.manifest_url_template",
            &c.manifest_url_template,
            &["{entity_id}"],
        )?;
        check_template(
            "catalog.bundle_url_template",
            &c.bundle_url_template,
            &["{version}", "{file}"],
        )?;

        Ok(())
    }
}

fn check_url(key: &str, value: &str) -> Result<()> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| Error::config(key, format!("invalid URL {value:?}: {e}")))
}

fn check_template(key: &str, template: &str, placeholders: &[&str]) -> Result<()> {
    for placeholder in placeholders {
        if !template.contains(placeholder) {
            return Err(Error::config(
                key,
                format!("template {template:?} is missing {placeholder}"),
            ));
        }
    }
    // Placeholders are filled with URL-safe sample values to check the shape.
    let sample = template
        .replace("{entity_id}", "entity")
        .replace("{platform}", "platform")
        .replace("{version}", "v1")
        .replace("{file}", "file");
    check_url(key, &sample)
}

fn default_max_concurrent_requests() -> usize {
    20
}

fn default_bundle_batch_size() -> usize {
    1000
}

fn default_probe_batch_size() -> usize {
    10
}

fn default_download_target() -> Option<u64> {
    Some(13_000)
}

fn default_probe_url() -> String {
    "https://res.soulmagic.online/v093/ui_atlas_5.png".to_string()
}

fn default_snapshots_url() -> String {
    "https://peer.decentraland.org/content/snapshots".to_string()
}

fn default_contents_url() -> String {
    "https://peer.decentraland.org/content/contents/".to_string()
}

fn default_manifest_url_template() -> String {
    "https://ab-cdn.decentraland.org/manifest/{entity_id}_{platform}.json".to_string()
}

fn default_bundle_url_template() -> String {
    "https://ab-cdn.decentraland.org/{version}/{file}".to_string()
}

fn default_platform() -> String {
    "mac".to_string()
}

fn default_entity_type() -> String {
    "wearable".to_string()
}

fn default_entity_group_size() -> usize {
    25
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("AssetBundleCache.json")
}

fn default_dictionary_path() -> PathBuf {
    PathBuf::from("AssetBundleDictionary.json")
}

fn default_true() -> bool {
    true
}

fn default_replay_max_entries() -> Option<usize> {
    Some(1500)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_user_agent() -> String {
    concat!("bundle-harvester/", env!("CARGO_PKG_VERSION")).to_string()
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
