use super::*;
use crate::key::derive_key;
use crate::test_helpers::{FakeResponse, FakeTransport, drain_events};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::tempdir;

const SNAPSHOTS: &str = "https://catalog.test/snapshots";
const CONTENTS: &str = "https://catalog.test/contents/";
const PROBE: &str = "https://probe.test/atlas.png";

fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.scheduler.max_concurrent_requests = 4;
    config.scheduler.bundle_batch_size = 2;
    config.scheduler.probe_batch_size = 1;
    config.scheduler.download_target = None;
    config.scheduler.probe_url = PROBE.to_string();
    config.catalog.snapshots_url = SNAPSHOTS.to_string();
    config.catalog.contents_url = CONTENTS.to_string();
    config.catalog.manifest_url_template =
        "https://cdn.test/manifest/{entity_id}_{platform}.json".to_string();
    config.catalog.bundle_url_template = "https://cdn.test/{version}/{file}".to_string();
    config.cache.snapshot_path = dir.join("AssetBundleCache.json");
    config
}

/// One in-band snapshot with a single wearable "e1" publishing `files` under v1
fn catalog(files: &[&str]) -> FakeTransport {
    FakeTransport::new()
        .route_json(SNAPSHOTS, json!([{"hash": "h1", "numberOfEntities": 20000}]))
        .route(
            &format!("{CONTENTS}h1"),
            FakeResponse::Body(br#"{"entityId":"e1"}"#.to_vec()),
        )
        .route_json(&format!("{CONTENTS}e1"), json!({"type": "wearable"}))
        .route_json(
            "https://cdn.test/manifest/e1_mac.json",
            json!({"version": "v1", "files": files}),
        )
}

fn harvester(config: Config, transport: FakeTransport) -> (BundleHarvester, Arc<FakeTransport>) {
    let transport = Arc::new(transport);
    let harvester =
        BundleHarvester::with_components(config, transport.clone(), Arc::new(NoOpStore)).unwrap();
    (harvester, transport)
}

fn read_snapshot(path: &Path) -> BTreeMap<String, String> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn crawl_downloads_and_persists() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let snapshot_path = config.cache.snapshot_path.clone();
    let (harvester, transport) = harvester(config, catalog(&["a_mac", "b_mac", "c_mac", "skin_windows"]));
    let mut events = harvester.subscribe();

    let report = harvester.crawl().await.unwrap();

    assert_eq!(report.scheduler.bundles_downloaded, 3);
    assert_eq!(report.scheduler.batches, 2);
    assert_eq!(report.scheduler.probe_cycles, 2);
    assert_eq!(report.persisted_entries, Some(3));
    assert!(report.persist_error.is_none());
    assert!(!report.cancelled);
    assert_eq!(report.crawl.as_ref().unwrap().tasks_submitted, 3);
    assert_eq!(transport.request_count(PROBE), 2);

    let on_disk = read_snapshot(&snapshot_path);
    assert_eq!(on_disk.len(), 3);
    assert_eq!(
        on_disk.get(&derive_key("v1", "b_mac").to_hex()).map(String::as_str),
        Some("https://cdn.test/v1/b_mac")
    );

    let persisted: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, Event::CachePersisted { entries: 3, .. }))
        .collect();
    assert_eq!(persisted.len(), 1);
}

#[tokio::test]
async fn crawl_skips_keys_from_previous_snapshot() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let previous = BTreeMap::from([(
        derive_key("v1", "a_mac").to_hex(),
        "https://cdn.test/v1/a_mac".to_string(),
    )]);
    std::fs::write(
        &config.cache.snapshot_path,
        serde_json::to_string_pretty(&previous).unwrap(),
    )
    .unwrap();
    let snapshot_path = config.cache.snapshot_path.clone();
    let (harvester, transport) = harvester(config, catalog(&["a_mac", "b_mac"]));

    let report = harvester.crawl().await.unwrap();

    assert_eq!(report.scheduler.bundles_downloaded, 1);
    assert_eq!(transport.request_count("https://cdn.test/v1/a_mac"), 0);
    assert_eq!(read_snapshot(&snapshot_path).len(), 2, "seeded entries are kept");
}

#[tokio::test]
async fn download_target_halts_and_persists_once() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.scheduler.max_concurrent_requests = 1;
    config.scheduler.bundle_batch_size = 10;
    config.scheduler.download_target = Some(2);
    let snapshot_path = config.cache.snapshot_path.clone();
    let files = ["a_mac", "b_mac", "c_mac", "d_mac", "e_mac"];
    let (harvester, _transport) = harvester(config, catalog(&files));
    let mut events = harvester.subscribe();

    let report = harvester.crawl().await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.scheduler.bundles_downloaded, 2);
    assert_eq!(report.persisted_entries, Some(2));
    assert_eq!(read_snapshot(&snapshot_path).len(), 2);
    assert!(harvester.persist().await.is_none(), "second persist is a no-op");

    let events = drain_events(&mut events);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::TargetReached { .. }))
            .count(),
        1
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::CachePersisted { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn fatal_crawl_error_still_persists() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let snapshot_path = config.cache.snapshot_path.clone();
    let transport = FakeTransport::new().route(SNAPSHOTS, FakeResponse::Status(503));
    let (harvester, _transport) = harvester(config, transport);

    let err = harvester.crawl().await.unwrap_err();

    assert!(err.is_transport(), "got {err:?}");
    assert!(snapshot_path.exists());
    assert!(read_snapshot(&snapshot_path).is_empty());
}

#[tokio::test]
async fn shutdown_before_crawl_downloads_nothing() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let (harvester, transport) = harvester(config, catalog(&["a_mac"]));
    let mut events = harvester.subscribe();

    harvester.shutdown();
    let report = harvester.crawl().await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.scheduler.bundles_downloaded, 0);
    assert_eq!(transport.request_count("https://cdn.test/v1/a_mac"), 0);
    assert_eq!(report.persisted_entries, Some(0));
    assert!(matches!(drain_events(&mut events).first(), Some(Event::Shutdown)));
}

#[tokio::test]
async fn persist_failure_is_reported_not_fatal() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cache.seed_from_snapshot = false;
    std::fs::create_dir_all(&config.cache.snapshot_path).unwrap();
    let (harvester, _transport) = harvester(config, catalog(&["a_mac"]));

    let report = harvester.crawl().await.unwrap();

    assert_eq!(report.scheduler.bundles_downloaded, 1);
    assert!(report.persisted_entries.is_none());
    assert!(report.persist_error.is_some());
}

#[tokio::test]
async fn replay_honours_entry_limit() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.replay.max_entries = Some(3);
    let snapshot_path = config.cache.snapshot_path.clone();
    let (harvester, transport) = harvester(config, FakeTransport::new());

    let dictionary: Vec<_> = (0..5)
        .map(|i| {
            let file = format!("item{i}_mac");
            (derive_key("v1", &file), format!("https://cdn.test/v1/{file}"))
        })
        .collect();
    let report = harvester.replay(dictionary).await.unwrap();

    assert!(report.crawl.is_none());
    assert_eq!(report.scheduler.bundles_considered, 3);
    assert_eq!(report.scheduler.bundles_downloaded, 3);
    assert_eq!(transport.request_count("https://cdn.test/v1/item3_mac"), 0);
    assert_eq!(read_snapshot(&snapshot_path).len(), 3);
}

#[tokio::test]
async fn replay_file_reads_dictionary() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let dictionary_path = dir.path().join("AssetBundleDictionary.json");
    let dictionary = BTreeMap::from([(
        derive_key("v3", "hat_mac").to_hex(),
        "https://cdn.test/v3/hat_mac".to_string(),
    )]);
    std::fs::write(&dictionary_path, serde_json::to_string(&dictionary).unwrap()).unwrap();
    let (harvester, transport) = harvester(config, FakeTransport::new());

    let report = harvester.replay_file(&dictionary_path).await.unwrap();

    assert_eq!(report.scheduler.bundles_downloaded, 1);
    assert_eq!(transport.request_count("https://cdn.test/v3/hat_mac"), 1);
    assert_eq!(
        harvester
            .cache()
            .lookup(&derive_key("v3", "hat_mac"))
            .await
            .as_deref(),
        Some("https://cdn.test/v3/hat_mac")
    );
}

#[tokio::test]
async fn replay_keeps_entries_from_previous_snapshot() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let snapshot_path = config.cache.snapshot_path.clone();
    let previous: BTreeMap<String, String> = (0..50)
        .map(|i| {
            let file = format!("old{i}_mac");
            (derive_key("v0", &file).to_hex(), format!("https://cdn.test/v0/{file}"))
        })
        .collect();
    std::fs::write(&snapshot_path, serde_json::to_string_pretty(&previous).unwrap()).unwrap();
    let (harvester, _transport) = harvester(config, FakeTransport::new());

    let report = harvester
        .replay_file(&dir.path().join("absent.json"))
        .await
        .unwrap();

    assert_eq!(report.scheduler.bundles_downloaded, 0);
    assert_eq!(report.persisted_entries, Some(50));
    assert_eq!(harvester.cache().downloaded_count(), 0, "seeding is not a download");
    assert_eq!(read_snapshot(&snapshot_path), previous);
}

#[tokio::test]
async fn replay_adds_to_previous_snapshot() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let snapshot_path = config.cache.snapshot_path.clone();
    let previous = BTreeMap::from([(
        derive_key("v0", "old_mac").to_hex(),
        "https://cdn.test/v0/old_mac".to_string(),
    )]);
    std::fs::write(&snapshot_path, serde_json::to_string_pretty(&previous).unwrap()).unwrap();
    let (harvester, _transport) = harvester(config, FakeTransport::new());

    let dictionary = vec![(
        derive_key("v1", "new_mac"),
        "https://cdn.test/v1/new_mac".to_string(),
    )];
    let report = harvester.replay(dictionary).await.unwrap();

    assert_eq!(report.scheduler.bundles_downloaded, 1);
    let on_disk = read_snapshot(&snapshot_path);
    assert_eq!(on_disk.len(), 2);
    assert!(on_disk.contains_key(&derive_key("v0", "old_mac").to_hex()));
}

#[tokio::test]
async fn unreadable_snapshot_is_kept_as_backup() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let snapshot_path = config.cache.snapshot_path.clone();
    std::fs::write(&snapshot_path, "{ truncated").unwrap();
    let (harvester, _transport) = harvester(config, catalog(&["a_mac"]));

    let report = harvester.crawl().await.unwrap();

    assert_eq!(report.persisted_entries, Some(1));
    let backup = dir.path().join("AssetBundleCache.json.bak");
    assert_eq!(std::fs::read_to_string(backup).unwrap(), "{ truncated");
    assert_eq!(read_snapshot(&snapshot_path).len(), 1);
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.scheduler.max_concurrent_requests = 0;

    let result = BundleHarvester::with_components(
        config,
        Arc::new(FakeTransport::new()),
        Arc::new(NoOpStore),
    );
    assert!(result.is_err());
}
