//! Site Config Store — the durable, linearizable domain -> [`SiteConfig`] map.
//!
//! A single in-memory map guarded by an async mutex is the authoritative
//! copy; every mutation is followed by an atomic write-to-temp-then-rename
//! of the whole map to a configured JSON path, per §4.2/§5.

use crate::error::StoreError;
use crate::types::SiteConfig;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

#[async_trait]
pub trait SiteConfigStore: Send + Sync {
    async fn get(&self, domain: &str) -> Option<SiteConfig>;
    async fn put(&self, config: SiteConfig) -> Result<(), StoreError>;
    /// Create-if-absent with an empty locator, then increment
    /// `failure_count_since_last_success`. Returns the record after the
    /// increment.
    async fn increment_failure(&self, domain: &str) -> Result<SiteConfig, StoreError>;
    /// Sets the locator, zeros the failure count, and stamps the timestamp.
    /// Idempotent.
    async fn mark_success(
        &self,
        domain: &str,
        xpath: &str,
        discovered_by_llm: bool,
    ) -> Result<SiteConfig, StoreError>;
    async fn list(&self) -> Vec<SiteConfig>;
    async fn delete(&self, domain: &str) -> bool;
}

/// `SiteConfigStore` backed by a single JSON document. On load, a missing
/// file yields an empty map; a corrupt file logs and starts empty — neither
/// crashes the process.
pub struct JsonFileSiteConfigStore {
    path: PathBuf,
    map: Arc<Mutex<HashMap<String, SiteConfig>>>,
}

impl JsonFileSiteConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = load_from_disk(&path);
        Self {
            path,
            map: Arc::new(Mutex::new(map)),
        }
    }

    async fn persist(&self, map: &HashMap<String, SiteConfig>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| StoreError::Write(format!("serialize: {e}")))?;

        let dir = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        let tmp_path = self.path.with_extension("json.tmp");

        if let Some(dir) = dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Write(format!("create_dir_all: {e}")))?;
        }
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| StoreError::Write(format!("write temp file: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| StoreError::Write(format!("atomic rename: {e}")))?;
        Ok(())
    }
}

fn load_from_disk(path: &Path) -> HashMap<String, SiteConfig> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return HashMap::new(),
    };
    match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            error!("site config store at {path:?} is corrupt ({e}), starting empty");
            HashMap::new()
        }
    }
}

#[async_trait]
impl SiteConfigStore for JsonFileSiteConfigStore {
    async fn get(&self, domain: &str) -> Option<SiteConfig> {
        self.map.lock().await.get(domain).cloned()
    }

    async fn put(&self, config: SiteConfig) -> Result<(), StoreError> {
        let mut guard = self.map.lock().await;
        guard.insert(config.domain_pattern.clone(), config);
        self.persist(&guard).await
    }

    async fn increment_failure(&self, domain: &str) -> Result<SiteConfig, StoreError> {
        let mut guard = self.map.lock().await;
        let entry = guard
            .entry(domain.to_string())
            .or_insert_with(|| SiteConfig::new(domain));
        entry.failure_count_since_last_success += 1;
        let updated = entry.clone();
        self.persist(&guard).await?;
        Ok(updated)
    }

    async fn mark_success(
        &self,
        domain: &str,
        xpath: &str,
        discovered_by_llm: bool,
    ) -> Result<SiteConfig, StoreError> {
        let mut guard = self.map.lock().await;
        let entry = guard
            .entry(domain.to_string())
            .or_insert_with(|| SiteConfig::new(domain));
        entry.xpath_main_content = xpath.to_string();
        entry.failure_count_since_last_success = 0;
        entry.discovered_by_llm = discovered_by_llm;
        entry.last_successful_scrape_timestamp = Some(Utc::now().to_rfc3339());
        let updated = entry.clone();
        self.persist(&guard).await?;
        Ok(updated)
    }

    async fn list(&self) -> Vec<SiteConfig> {
        self.map.lock().await.values().cloned().collect()
    }

    async fn delete(&self, domain: &str) -> bool {
        let mut guard = self.map.lock().await;
        let existed = guard.remove(domain).is_some();
        if existed {
            if let Err(e) = self.persist(&guard).await {
                warn!("failed to persist after delete({domain}): {e}");
            }
        }
        existed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("site-config-store-test-{name}-{}.json", std::process::id()))
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let path = temp_path("missing");
        std::fs::remove_file(&path).ok();
        let store = JsonFileSiteConfigStore::open(&path);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty_not_panic() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileSiteConfigStore::open(&path);
        assert!(store.list().await.is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let path = temp_path("roundtrip");
        std::fs::remove_file(&path).ok();
        let store = JsonFileSiteConfigStore::open(&path);
        let cfg = SiteConfig::new("example.com");
        store.put(cfg.clone()).await.unwrap();
        assert_eq!(store.get("example.com").await, Some(cfg));
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn round_trip_survives_reopen() {
        let path = temp_path("reopen");
        std::fs::remove_file(&path).ok();
        {
            let store = JsonFileSiteConfigStore::open(&path);
            store.mark_success("example.com", "//article", true).await.unwrap();
        }
        let reopened = JsonFileSiteConfigStore::open(&path);
        let cfg = reopened.get("example.com").await.unwrap();
        assert_eq!(cfg.xpath_main_content, "//article");
        assert!(cfg.discovered_by_llm);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn increment_failure_creates_with_empty_locator() {
        let path = temp_path("create-on-failure");
        std::fs::remove_file(&path).ok();
        let store = JsonFileSiteConfigStore::open(&path);
        let cfg = store.increment_failure("example.com").await.unwrap();
        assert_eq!(cfg.failure_count_since_last_success, 1);
        assert_eq!(cfg.xpath_main_content, "");
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn mark_success_resets_failure_counter() {
        let path = temp_path("reset");
        std::fs::remove_file(&path).ok();
        let store = JsonFileSiteConfigStore::open(&path);
        store.increment_failure("example.com").await.unwrap();
        store.increment_failure("example.com").await.unwrap();
        let cfg = store.mark_success("example.com", "//main", false).await.unwrap();
        assert_eq!(cfg.failure_count_since_last_success, 0);
        assert!(cfg.last_successful_scrape_timestamp.is_some());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let path = temp_path("delete");
        std::fs::remove_file(&path).ok();
        let store = JsonFileSiteConfigStore::open(&path);
        store.mark_success("example.com", "//main", false).await.unwrap();
        assert!(store.delete("example.com").await);
        assert!(store.get("example.com").await.is_none());
        std::fs::remove_file(&path).ok();
    }
}
