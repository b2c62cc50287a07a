//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;

use experiment_optimizer::store::CounterStore;
use experiment_optimizer::types::VariantKey;
use experiment_optimizer::{
    AppState, DatafileRepository, MemoryCounterStore, Recalculator,
};

/// Eligibility threshold used by every fixture
pub const MIN_EXPOSURES: u64 = 100;

/// Monte-Carlo trials used by every fixture
pub const TRIALS: usize = 10_000;

/// A datafile with one feature of two 50/50 variants `a` and `b`
pub fn two_variant_doc(feature: &str) -> Value {
    json!({
        "schemaVersion": 1,
        "features": {
            feature: {
                "defaultValue": "a",
                "variations": [
                    {"value": "a", "weight": 50},
                    {"value": "b", "weight": 50}
                ]
            }
        }
    })
}

pub fn write_datafile(dir: &Path, name: &str, doc: &Value) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
}

/// Build a full application state over a memory store and a temp
/// datafiles directory; the recalculator runs with a fixed seed
pub async fn app_with_datafiles(
    files: &[(&str, Value)],
) -> (AppState, Arc<MemoryCounterStore>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for (name, doc) in files {
        write_datafile(dir.path(), name, doc);
    }

    let store = Arc::new(MemoryCounterStore::new());
    let repo = Arc::new(DatafileRepository::new(dir.path()));
    repo.load().await.unwrap();

    let recalculator = Arc::new(
        Recalculator::new(
            repo.clone(),
            store.clone(),
            MIN_EXPOSURES,
            TRIALS,
            Duration::from_secs(60),
        )
        .with_seed(42),
    );

    let state = AppState::new(repo, store.clone(), recalculator);
    (state, store, dir)
}

/// Drive raw counters to a given state
pub async fn seed_counters(
    store: &MemoryCounterStore,
    key: &VariantKey,
    exposures: u64,
    conversions: u64,
) {
    for _ in 0..exposures {
        store.incr_exposure(key).await.unwrap();
    }
    for _ in 0..conversions {
        store.incr_conversion(key).await.unwrap();
    }
}
