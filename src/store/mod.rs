//! Counter store
//!
//! Durable, concurrently updated mapping from `(datafile, feature,
//! variant)` to exposure/conversion counters and the current effective
//! weight. The `CounterStore` trait is the seam between the service and
//! the concrete backend; `RedisCounterStore` is the production
//! implementation, `MemoryCounterStore` backs the tests.

mod memory;
mod redis;
pub mod resp;

pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::VariantKey;

/// Errors surfaced by the counter store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// TCP / pool-level failure reaching the store
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The store answered with an error reply
    #[error("store rejected command: {0}")]
    Command(String),

    /// The store answered with a reply shape we did not expect
    #[error("unexpected store reply: {0}")]
    Protocol(String),

    /// I/O error on the store connection
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot of one variant's counter record
///
/// `weight` is `None` until the first recalculation writes one; callers
/// fall back to the datafile's declared weight. `conversions` may
/// transiently exceed `exposures` (client-side event ordering) and is
/// reported as-is.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VariantCounters {
    pub exposures: u64,
    pub conversions: u64,
    pub weight: Option<f64>,
    pub last_updated: Option<u64>,
}

impl VariantCounters {
    /// `conversions / exposures`, with `0/0 = 0`
    #[must_use]
    pub fn conversion_rate(&self) -> f64 {
        if self.exposures == 0 {
            0.0
        } else {
            self.conversions as f64 / self.exposures as f64
        }
    }
}

/// Storage backend for per-variant counters
///
/// Implementations must linearize increments to the same key and must
/// never touch the counters when writing a weight.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one exposure, creating the record if missing
    async fn incr_exposure(&self, key: &VariantKey) -> Result<(), StoreError>;

    /// Atomically add one conversion, creating the record if missing
    async fn incr_conversion(&self, key: &VariantKey) -> Result<(), StoreError>;

    /// Snapshot read of one record; a missing record reads as all-zero
    async fn counters(&self, key: &VariantKey) -> Result<VariantCounters, StoreError>;

    /// Atomically write `weight` and `last_updated` in one operation,
    /// leaving the counters untouched
    async fn set_weight(
        &self,
        key: &VariantKey,
        weight: f64,
        updated_at: u64,
    ) -> Result<(), StoreError>;

    /// Enumerate keys under `prefix`
    ///
    /// Backed by a cursor scan: the result may contain duplicates and may
    /// miss keys created mid-iteration. Callers deduplicate.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Acquire `key` as a lock with `token` as owner, expiring after
    /// `ttl`. Returns false when someone else holds it.
    async fn try_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Release `key` if and only if `token` still owns it
    async fn unlock(&self, key: &str, token: &str) -> Result<(), StoreError>;

    /// Liveness probe
    async fn ping(&self) -> Result<(), StoreError>;
}
