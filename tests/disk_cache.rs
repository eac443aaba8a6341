mod common;

use std::sync::Arc;

use offline_worker::{
    infra::disk_cache::DiskCacheStorage,
    worker::{CacheStorage, PrefetchJob},
};
use tempfile::TempDir;

use common::{site, worker};

fn storage(dir: &TempDir) -> Arc<dyn CacheStorage> {
    Arc::new(DiskCacheStorage::new(dir.path().to_path_buf()).expect("disk storage"))
}

fn job(resources: &[&str], force_update: bool) -> PrefetchJob {
    PrefetchJob {
        resources: resources.iter().map(|r| r.to_string()).collect(),
        client: None,
        force_update,
    }
}

#[tokio::test]
async fn cached_entries_outlive_the_process_until_the_version_changes() {
    let dir = TempDir::new().expect("temp dir");
    let upstream = site();

    // First run: install v1 and prefetch one data file.
    let first = worker("v1", storage(&dir), upstream.clone());
    let (install, activation) = first.start().await;
    assert_eq!(install.seeded, 4);
    assert!(activation.evicted.is_empty());
    let summary = first.prefetch(job(&["data/cards.json"], false)).await;
    assert_eq!((summary.success, summary.updated), (1, 0));
    drop(first);

    // Second run, same version: the entries are already there.
    let second = worker("v1", storage(&dir), upstream.clone());
    second.start().await;
    assert_eq!(second.status().await.cached_entries, 5);

    let summary = second.prefetch(job(&["data/cards.json"], false)).await;
    assert_eq!((summary.skipped, summary.success), (1, 0));

    let summary = second.prefetch(job(&["data/cards.json"], true)).await;
    assert_eq!((summary.success, summary.updated), (1, 1));
    drop(second);

    // Third run with a bumped version evicts everything cached under v1.
    let third = worker("v2", storage(&dir), upstream);
    let (_, activation) = third.start().await;
    assert_eq!(activation.evicted, vec!["cards-v1".to_string()]);
    assert!(!dir.path().join("cards-v1").exists());

    let names = storage(&dir).names().await.expect("names");
    assert_eq!(names, vec!["cards-v2".to_string()]);
    assert_eq!(third.status().await.cached_entries, 4);
}
