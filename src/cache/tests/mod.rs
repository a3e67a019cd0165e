use super::*;
use crate::key::derive_key;
use tempfile::tempdir;

fn cache_in(dir: &Path) -> ContentCache {
    ContentCache::new(Arc::new(NoOpStore), dir.join("AssetBundleCache.json"))
}

#[tokio::test]
async fn record_then_lookup_returns_url() {
    let dir = tempdir().unwrap();
    let cache = cache_in(dir.path());
    let key = derive_key("v5", "hat_mac");

    assert_eq!(cache.lookup(&key).await, None);
    let total = cache.record(key, "https://cdn/v5/hat_mac").await;

    assert_eq!(total, 1);
    assert_eq!(
        cache.lookup(&key).await.as_deref(),
        Some("https://cdn/v5/hat_mac")
    );
}

#[tokio::test]
async fn later_record_wins() {
    let dir = tempdir().unwrap();
    let cache = cache_in(dir.path());
    let key = derive_key("v5", "hat_mac");

    cache.record(key, "https://old/hat_mac").await;
    let total = cache.record(key, "https://new/hat_mac").await;

    assert_eq!(cache.lookup(&key).await.as_deref(), Some("https://new/hat_mac"));
    assert_eq!(cache.len().await, 1, "one entry per key");
    assert_eq!(total, 2, "every successful download is counted");
}

#[tokio::test]
async fn seed_does_not_count_as_download() {
    let dir = tempdir().unwrap();
    let cache = cache_in(dir.path());
    let added = cache
        .seed([
            (derive_key("v1", "a_mac"), "https://cdn/v1/a_mac".to_string()),
            (derive_key("v1", "b_mac"), "https://cdn/v1/b_mac".to_string()),
        ])
        .await;

    assert_eq!(added, 2);
    assert_eq!(cache.downloaded_count(), 0);
    assert!(cache.lookup(&derive_key("v1", "b_mac")).await.is_some());
}

#[tokio::test]
async fn persist_writes_exactly_recorded_pairs() {
    let dir = tempdir().unwrap();
    let cache = cache_in(dir.path());

    let mut expected = BTreeMap::new();
    for i in 0..5 {
        let file = format!("item{i}_mac");
        let key = derive_key("v9", &file);
        let url = format!("https://cdn/v9/{file}");
        cache.record(key, url.clone()).await;
        expected.insert(key.to_hex(), url);
    }

    let written = cache.persist().await.unwrap();
    assert_eq!(written, 5);

    let raw = std::fs::read_to_string(cache.snapshot_path()).unwrap();
    assert!(raw.contains('\n'), "snapshot is pretty-printed");
    let on_disk: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(on_disk, expected);
}

#[tokio::test]
async fn persist_overwrites_previous_snapshot() {
    let dir = tempdir().unwrap();
    let cache = cache_in(dir.path());
    std::fs::write(cache.snapshot_path(), r#"{"stale": "entry"}"#).unwrap();

    cache.record(derive_key("v1", "a_mac"), "https://cdn/v1/a_mac").await;
    cache.persist().await.unwrap();

    let on_disk: BTreeMap<String, String> =
        serde_json::from_str(&std::fs::read_to_string(cache.snapshot_path()).unwrap()).unwrap();
    assert_eq!(on_disk.len(), 1);
    assert!(!on_disk.contains_key("stale"));
}

#[tokio::test]
async fn persist_failure_is_reported() {
    let dir = tempdir().unwrap();
    // A directory sits where the snapshot file should go.
    let blocked = dir.path().join("snapshot");
    std::fs::create_dir_all(blocked.join("AssetBundleCache.json")).unwrap();
    let cache = ContentCache::new(Arc::new(NoOpStore), blocked.join("AssetBundleCache.json"));

    cache.record(derive_key("v1", "a_mac"), "https://cdn/v1/a_mac").await;
    let err = cache.persist().await.unwrap_err();
    assert!(matches!(err, Error::Persist { .. }), "got {err:?}");
}

#[tokio::test]
async fn persisted_snapshot_loads_back_as_dictionary() {
    let dir = tempdir().unwrap();
    let cache = cache_in(dir.path());
    let key = derive_key("v2", "shoes_mac");
    cache.record(key, "https://cdn/v2/shoes_mac").await;
    cache.persist().await.unwrap();

    let loaded = load_dictionary(cache.snapshot_path()).await.unwrap();
    assert_eq!(loaded, vec![(key, "https://cdn/v2/shoes_mac".to_string())]);
}

#[tokio::test]
async fn missing_dictionary_is_empty() {
    let dir = tempdir().unwrap();
    let loaded = load_dictionary(&dir.path().join("absent.json")).await.unwrap();
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn dictionary_skips_malformed_keys() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dict.json");
    let good = derive_key("v1", "a_mac");
    let body = BTreeMap::from([
        (good.to_hex(), "https://cdn/v1/a_mac"),
        ("not-a-key".to_string(), "https://cdn/v1/b_mac"),
    ]);
    std::fs::write(&path, serde_json::to_string(&body).unwrap()).unwrap();

    let loaded = load_dictionary(&path).await.unwrap();
    assert_eq!(loaded, vec![(good, "https://cdn/v1/a_mac".to_string())]);
}

#[tokio::test]
async fn dictionary_with_invalid_json_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dict.json");
    std::fs::write(&path, "[1, 2").unwrap();

    assert!(matches!(
        load_dictionary(&path).await,
        Err(Error::Serialization(_))
    ));
}

#[tokio::test]
async fn is_cached_delegates_to_store() {
    let dir = tempdir().unwrap();
    let store = Arc::new(DiskStore::new(dir.path().join("bundles")));
    let cache = ContentCache::new(store, dir.path().join("cache.json"));
    let key = derive_key("v1", "a_mac");

    assert!(!cache.is_cached(&key, "https://cdn/v1/a_mac").await);
    cache
        .store_bytes(&key, "https://cdn/v1/a_mac", b"abc")
        .await
        .unwrap();
    assert!(cache.is_cached(&key, "https://cdn/v1/a_mac").await);
}

#[tokio::test]
async fn set_aside_snapshot_moves_file_to_backup() {
    let dir = tempdir().unwrap();
    let cache = cache_in(dir.path());
    std::fs::write(cache.snapshot_path(), "not json").unwrap();

    let backup = cache.set_aside_snapshot().await.unwrap();

    assert_eq!(backup, dir.path().join("AssetBundleCache.json.bak"));
    assert!(!cache.snapshot_path().exists());
    assert_eq!(std::fs::read_to_string(backup).unwrap(), "not json");
}
