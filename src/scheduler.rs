//! Recalculation scheduler
//!
//! A single background task periodically turns counters into fresh
//! weights: enumerate every counter key, group by `(datafile, feature)`,
//! resolve each group against the datafile catalogue, and hand eligible
//! groups to the sampler. Groups are independent; one group's failure
//! never aborts the rest of the cycle.
//!
//! Only one cycle runs at a time. A process-local busy flag coalesces
//! overlapping ticks and a store-side lock (`lock:recalc`) keeps
//! multi-process deployments from recalculating concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::store::{RECALC_LOCK_KEY, STATS_PREFIX};
use crate::datafile::DatafileRepository;
use crate::sampler::{ThompsonSampler, VariantObservations};
use crate::store::{CounterStore, StoreError};
use crate::types::{GroupKey, VariantKey};

/// One group left untouched this cycle, and why
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkippedGroup {
    pub datafile: String,
    pub feature: String,
    pub reason: String,
}

/// One group that hit a store error mid-update
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupError {
    pub datafile: String,
    pub feature: String,
    pub error: String,
}

/// Outcome of one full cycle
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct CycleSummary {
    /// Unix timestamp stamped on every weight written this cycle
    pub started_at: u64,
    pub groups_considered: usize,
    pub groups_updated: usize,
    pub skipped: Vec<SkippedGroup>,
    pub errors: Vec<GroupError>,
}

/// What happened when a cycle was requested
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleSummary),
    /// Another cycle is running in this process
    AlreadyRunning,
    /// Another process holds the recalculation lock
    LockHeld,
}

/// Skip reasons reused by tests and the stats surface
mod reason {
    pub const NOT_IN_ANY_DATAFILE: &str = "not in any datafile";
    pub const TOO_FEW_VARIANTS: &str = "fewer than two variants";
    pub const INSUFFICIENT_EXPOSURES: &str = "insufficient exposures";
}

/// Runs recalculation cycles over the catalogue and the counter store
pub struct Recalculator {
    repo: Arc<DatafileRepository>,
    store: Arc<dyn CounterStore>,
    min_exposures: u64,
    trials: usize,
    lock_ttl: Duration,
    busy: AtomicBool,
    seed: Option<u64>,
}

impl Recalculator {
    pub fn new(
        repo: Arc<DatafileRepository>,
        store: Arc<dyn CounterStore>,
        min_exposures: u64,
        trials: usize,
        update_interval: Duration,
    ) -> Self {
        Self {
            repo,
            store,
            min_exposures,
            trials,
            // The lock must outlive a slow cycle but still self-heal if
            // the holder dies; 4x the period bounds both.
            lock_ttl: update_interval * 4,
            busy: AtomicBool::new(false),
            seed: None,
        }
    }

    /// Fix the sampler seed (reproducible cycles for tests)
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn sampler(&self) -> ThompsonSampler {
        match self.seed {
            Some(seed) => ThompsonSampler::with_seed(self.trials, seed),
            None => ThompsonSampler::new(self.trials),
        }
    }

    /// Run exactly one cycle
    ///
    /// Store errors on key enumeration or lock handling abort the cycle
    /// (the next tick retries); per-group errors are recorded in the
    /// summary and the cycle continues.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, StoreError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("Recalculation already running; coalescing");
            return Ok(CycleOutcome::AlreadyRunning);
        }
        let _busy = BusyGuard(&self.busy);

        let token = Uuid::new_v4().to_string();
        if !self
            .store
            .try_lock(RECALC_LOCK_KEY, &token, self.lock_ttl)
            .await?
        {
            debug!("Recalculation lock held elsewhere; skipping");
            return Ok(CycleOutcome::LockHeld);
        }

        let result = self.run_cycle_locked().await;

        if let Err(e) = self.store.unlock(RECALC_LOCK_KEY, &token).await {
            warn!("Failed to release recalculation lock: {}", e);
        }

        result.map(CycleOutcome::Completed)
    }

    async fn run_cycle_locked(&self) -> Result<CycleSummary, StoreError> {
        let started_at = unix_now();
        info!("Starting weight recalculation cycle");

        let keys = self.store.list_keys(STATS_PREFIX).await?;

        // The scan may return duplicates; BTreeMap dedupes and gives the
        // cycle a deterministic group order.
        let mut groups: BTreeMap<GroupKey, ()> = BTreeMap::new();
        for raw in keys {
            match VariantKey::parse_storage_key(&raw) {
                Some(key) => {
                    groups.insert(key.group(), ());
                }
                None => warn!("Ignoring malformed counter key '{}'", raw),
            }
        }

        let mut summary = CycleSummary {
            started_at,
            groups_considered: groups.len(),
            ..CycleSummary::default()
        };
        let mut sampler = self.sampler();

        for group in groups.keys() {
            match self
                .recalculate_group(group, &mut sampler, started_at)
                .await
            {
                Ok(GroupResult::Updated) => summary.groups_updated += 1,
                Ok(GroupResult::Skipped(why)) => summary.skipped.push(SkippedGroup {
                    datafile: group.datafile.clone(),
                    feature: group.feature.clone(),
                    reason: why,
                }),
                Err(e) => {
                    error!("Error recalculating {}: {}", group, e);
                    summary.errors.push(GroupError {
                        datafile: group.datafile.clone(),
                        feature: group.feature.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            considered = summary.groups_considered,
            updated = summary.groups_updated,
            skipped = summary.skipped.len(),
            errors = summary.errors.len(),
            "Recalculation cycle finished"
        );
        Ok(summary)
    }

    async fn recalculate_group(
        &self,
        group: &GroupKey,
        sampler: &mut ThompsonSampler,
        started_at: u64,
    ) -> Result<GroupResult, StoreError> {
        // Counters for experiments removed from every datafile keep
        // accumulating harmlessly; they are skipped, never pruned.
        let Some(declared) = self.repo.group_variants(group).await else {
            return Ok(GroupResult::Skipped(reason::NOT_IN_ANY_DATAFILE.into()));
        };
        if declared.len() < 2 {
            return Ok(GroupResult::Skipped(reason::TOO_FEW_VARIANTS.into()));
        }

        let original_sum: f64 = declared.iter().map(|v| v.weight).sum();

        let mut observations = Vec::with_capacity(declared.len());
        for variant in &declared {
            let counters = self
                .store
                .counters(&group.variant(variant.value.as_str()))
                .await?;
            observations.push(VariantObservations {
                value: variant.value.clone(),
                exposures: counters.exposures,
                conversions: counters.conversions,
            });
        }

        if observations
            .iter()
            .any(|o| o.exposures < self.min_exposures)
        {
            return Ok(GroupResult::Skipped(reason::INSUFFICIENT_EXPOSURES.into()));
        }

        let sampled = match sampler.sample_weights(&observations, original_sum) {
            Ok(sampled) => sampled,
            Err(e) => {
                warn!("Sampler skipped {}: {}", group, e);
                return Ok(GroupResult::Skipped(format!("sampler: {}", e)));
            }
        };

        for (variant, weight) in observations.iter().zip(&sampled.weights) {
            self.store
                .set_weight(&group.variant(variant.value.as_str()), *weight, started_at)
                .await?;
        }

        info!(
            "Updated weights for {}: {:?} (P(best) = {:?})",
            group, sampled.weights, sampled.probabilities
        );
        Ok(GroupResult::Updated)
    }
}

enum GroupResult {
    Updated,
    Skipped(String),
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Spawn the periodic recalculation task
///
/// Ticks every `period` until `shutdown` flips to true. A tick that
/// lands while a cycle is still running coalesces via the busy flag.
pub fn spawn_scheduler(
    recalculator: Arc<Recalculator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            "Scheduler started - will update weights every {} minute(s)",
            period.as_secs() / 60
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match recalculator.run_cycle().await {
                        Ok(CycleOutcome::Completed(_)) => {}
                        Ok(CycleOutcome::AlreadyRunning) => {
                            debug!("Tick coalesced: previous cycle still running");
                        }
                        Ok(CycleOutcome::LockHeld) => {
                            debug!("Tick skipped: lock held by another process");
                        }
                        Err(e) => {
                            // The next tick retries; never crash the task.
                            error!("Recalculation cycle failed: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    })
}
