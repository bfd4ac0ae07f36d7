// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Stale-while-revalidate behavior of the model cache.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use workforce::error::ModelCacheError;
use workforce::models::{fallback_models, ModelCache, ModelCacheEntry, ModelInfo, ModelLister};

/// Lister that counts calls and answers after a delay.
struct SlowLister {
    calls: AtomicUsize,
    delay: Duration,
    models: Vec<ModelInfo>,
    fail: bool,
}

impl SlowLister {
    fn new(delay: Duration, ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            models: ids.iter().map(|id| ModelInfo::new(*id)).collect(),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
            models: Vec::new(),
            fail: true,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLister for SlowLister {
    async fn list(&self) -> Result<Vec<ModelInfo>, ModelCacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ModelCacheError::ListFailed("agent not installed".to_string()));
        }
        Ok(self.models.clone())
    }
}

fn write_entry(path: &Path, entry: &ModelCacheEntry) {
    std::fs::write(path, serde_json::to_string(entry).unwrap()).unwrap();
}

fn stale_entry(ids: &[&str], age_days: i64) -> ModelCacheEntry {
    let mut entry = ModelCacheEntry::new(ids.iter().map(|id| ModelInfo::new(*id)).collect());
    entry.last_updated -= age_days * 24 * 60 * 60 * 1000;
    entry
}

async fn wait_idle(cache: &ModelCache) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while cache.is_refreshing() {
        assert!(Instant::now() < deadline, "refresh never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_stale_cache_is_served_and_refreshed_once() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("models-cache.json");
    write_entry(&path, &stale_entry(&["old-model"], 8));

    let lister = SlowLister::new(Duration::from_millis(200), &["new-model"]);
    let cache = ModelCache::new(&path, lister.clone());

    let started = Instant::now();
    let first = cache.list_models().await;
    let second = cache.list_models().await;
    assert!(started.elapsed() < Duration::from_millis(150));

    assert_eq!(first, vec![ModelInfo::new("old-model")]);
    assert_eq!(second, vec![ModelInfo::new("old-model")]);
    assert!(cache.is_refreshing());

    wait_idle(&cache).await;
    assert_eq!(lister.calls(), 1);
    assert_eq!(cache.list_models().await, vec![ModelInfo::new("new-model")]);
    assert_eq!(lister.calls(), 1);
}

#[tokio::test]
async fn test_fresh_cache_does_not_refresh() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("models-cache.json");
    write_entry(&path, &stale_entry(&["opus"], 1));

    let lister = SlowLister::new(Duration::from_millis(0), &["other"]);
    let cache = ModelCache::new(&path, lister.clone());

    assert_eq!(cache.list_models().await, vec![ModelInfo::new("opus")]);
    assert!(!cache.is_refreshing());
    assert_eq!(lister.calls(), 0);
}

#[tokio::test]
async fn test_missing_cache_returns_fallback_and_populates() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("models-cache.json");

    let lister = SlowLister::new(Duration::from_millis(20), &["sonnet-x"]);
    let cache = ModelCache::new(&path, lister.clone());

    assert_eq!(cache.list_models().await, fallback_models());
    wait_idle(&cache).await;

    let entry = cache.read_cache().await.unwrap();
    assert_eq!(entry.models, vec![ModelInfo::new("sonnet-x")]);
    assert!(path.exists());
}

#[tokio::test]
async fn test_failed_refresh_keeps_existing_cache() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("models-cache.json");
    let entry = stale_entry(&["kept"], 30);
    write_entry(&path, &entry);

    let cache = ModelCache::new(&path, SlowLister::failing());
    let err = cache.refresh_models().await.unwrap_err();
    assert!(matches!(err, ModelCacheError::ListFailed(_)));

    assert_eq!(cache.read_cache().await.unwrap(), entry);
    assert!(!cache.is_refreshing());
    assert_eq!(cache.list_models().await, vec![ModelInfo::new("kept")]);
    wait_idle(&cache).await;
}

#[tokio::test]
async fn test_explicit_refresh_while_refreshing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("models-cache.json");
    let lister = SlowLister::new(Duration::from_millis(100), &["a"]);
    let cache = ModelCache::new(&path, lister.clone());

    cache.list_models().await;
    assert!(cache.refresh_models().await.unwrap().is_none());
    wait_idle(&cache).await;

    let refreshed = cache.refresh_models().await.unwrap();
    assert_eq!(refreshed, Some(vec![ModelInfo::new("a")]));
    assert_eq!(lister.calls(), 2);
}

#[tokio::test]
async fn test_corrupt_cache_is_treated_as_missing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("models-cache.json");
    std::fs::write(&path, "{ truncated").unwrap();

    let cache = ModelCache::new(&path, SlowLister::new(Duration::from_millis(0), &["z"]))
        .with_ttl(Duration::from_secs(60));
    assert_eq!(cache.list_models().await, fallback_models());
    wait_idle(&cache).await;
    assert_eq!(cache.list_models().await, vec![ModelInfo::new("z")]);
}

#[tokio::test]
async fn test_cancelled_refresh_releases_guard() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("models-cache.json");
    write_entry(&path, &stale_entry(&["old-model"], 8));

    let lister = SlowLister::new(Duration::from_millis(200), &["new-model"]);
    let cache = ModelCache::new(&path, lister.clone());

    let cancelled = tokio::time::timeout(Duration::from_millis(20), cache.refresh_models()).await;
    assert!(cancelled.is_err());
    assert!(!cache.is_refreshing());

    // The stale cache still triggers a background refresh afterwards.
    assert_eq!(cache.list_models().await, vec![ModelInfo::new("old-model")]);
    assert!(cache.is_refreshing());
    wait_idle(&cache).await;
    assert_eq!(lister.calls(), 2);
    assert_eq!(cache.list_models().await, vec![ModelInfo::new("new-model")]);

    let refreshed = cache.refresh_models().await.unwrap();
    assert_eq!(refreshed, Some(vec![ModelInfo::new("new-model")]));
}
