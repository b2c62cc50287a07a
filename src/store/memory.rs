//! In-memory counter store for testing
//!
//! Mimics the Redis-backed store without a network: hashes become a
//! `HashMap` behind a mutex, increments are linearized by the lock, and
//! the lock keys honor their TTLs. A failure toggle lets tests exercise
//! the store-error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{CounterStore, StoreError, VariantCounters};
use crate::types::VariantKey;

#[derive(Debug, Clone, Default)]
struct Record {
    exposures: u64,
    conversions: u64,
    weight: Option<f64>,
    last_updated: Option<u64>,
}

#[derive(Debug)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

/// Test double for the counter store
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    records: Arc<Mutex<HashMap<String, Record>>>,
    locks: Arc<Mutex<HashMap<String, LockEntry>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with a connection error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::Relaxed) {
            Err(StoreError::Connection("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    /// Number of counter records currently stored
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_exposure(&self, key: &VariantKey) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap();
        records.entry(key.storage_key()).or_default().exposures += 1;
        Ok(())
    }

    async fn incr_conversion(&self, key: &VariantKey) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap();
        records.entry(key.storage_key()).or_default().conversions += 1;
        Ok(())
    }

    async fn counters(&self, key: &VariantKey) -> Result<VariantCounters, StoreError> {
        self.check_available()?;
        let records = self.records.lock().unwrap();
        let record = records.get(&key.storage_key()).cloned().unwrap_or_default();
        Ok(VariantCounters {
            exposures: record.exposures,
            conversions: record.conversions,
            weight: record.weight,
            last_updated: record.last_updated,
        })
    }

    async fn set_weight(
        &self,
        key: &VariantKey,
        weight: f64,
        updated_at: u64,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap();
        let record = records.entry(key.storage_key()).or_default();
        record.weight = Some(weight);
        record.last_updated = Some(updated_at);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        let records = self.records.lock().unwrap();
        Ok(records
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();
        if let Some(entry) = locks.get(key)
            && entry.expires_at > now
        {
            return Ok(false);
        }
        locks.insert(
            key.to_string(),
            LockEntry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn unlock(&self, key: &str, token: &str) -> Result<(), StoreError> {
        self.check_available()?;
        let mut locks = self.locks.lock().unwrap();
        if locks.get(key).is_some_and(|entry| entry.token == token) {
            locks.remove(key);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> VariantKey {
        VariantKey::new("d.json", "feat", "a")
    }

    #[tokio::test]
    async fn test_increments_create_records_lazily() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.record_count(), 0);

        store.incr_exposure(&key()).await.unwrap();
        store.incr_exposure(&key()).await.unwrap();
        store.incr_conversion(&key()).await.unwrap();

        let counters = store.counters(&key()).await.unwrap();
        assert_eq!(counters.exposures, 2);
        assert_eq!(counters.conversions, 1);
        assert_eq!(counters.weight, None);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_set_weight_leaves_counters_untouched() {
        let store = MemoryCounterStore::new();
        store.incr_exposure(&key()).await.unwrap();

        store.set_weight(&key(), 62.5, 1_700_000_000).await.unwrap();

        let counters = store.counters(&key()).await.unwrap();
        assert_eq!(counters.exposures, 1);
        assert_eq!(counters.weight, Some(62.5));
        assert_eq!(counters.last_updated, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_never_lost() {
        let store = MemoryCounterStore::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    store.incr_exposure(&key()).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let counters = store.counters(&key()).await.unwrap();
        assert_eq!(counters.exposures, 2000);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.try_lock("lock:recalc", "owner-1", ttl).await.unwrap());
        assert!(!store.try_lock("lock:recalc", "owner-2", ttl).await.unwrap());

        // Wrong owner cannot release
        store.unlock("lock:recalc", "owner-2").await.unwrap();
        assert!(!store.try_lock("lock:recalc", "owner-2", ttl).await.unwrap());

        store.unlock("lock:recalc", "owner-1").await.unwrap();
        assert!(store.try_lock("lock:recalc", "owner-2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_taken() {
        let store = MemoryCounterStore::new();
        assert!(
            store
                .try_lock("lock:recalc", "a", Duration::from_millis(1))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(
            store
                .try_lock("lock:recalc", "b", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_failure_toggle() {
        let store = MemoryCounterStore::new();
        store.set_failing(true);
        assert!(store.incr_exposure(&key()).await.is_err());
        assert!(store.ping().await.is_err());
        store.set_failing(false);
        assert!(store.ping().await.is_ok());
    }
}
