//! End-to-end recalculation behavior through the manual trigger

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MIN_EXPOSURES, TRIALS, app_with_datafiles, seed_counters, two_variant_doc};
use experiment_optimizer::http::recalculate_impl;
use experiment_optimizer::store::CounterStore;
use experiment_optimizer::types::VariantKey;
use experiment_optimizer::{DatafileRepository, MemoryCounterStore, Recalculator};

#[tokio::test]
async fn test_eligibility_gate_reports_reason() {
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    seed_counters(&store, &VariantKey::new("d.json", "cta", "a"), 100, 10).await;
    seed_counters(&store, &VariantKey::new("d.json", "cta", "b"), 99, 30).await;

    let summary = recalculate_impl(&state).await.unwrap();
    assert_eq!(summary.groups_considered, 1);
    assert_eq!(summary.groups_updated, 0);
    assert_eq!(summary.skipped[0].reason, "insufficient exposures");

    // Weights are untouched below the threshold
    let counters = store
        .counters(&VariantKey::new("d.json", "cta", "b"))
        .await
        .unwrap();
    assert_eq!(counters.weight, None);
    assert_eq!(counters.exposures, 99);
}

#[tokio::test]
async fn test_cycle_stamps_timestamp_and_preserves_counters() {
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    let a = VariantKey::new("d.json", "cta", "a");
    let b = VariantKey::new("d.json", "cta", "b");
    seed_counters(&store, &a, 500, 100).await;
    seed_counters(&store, &b, 500, 100).await;

    let summary = recalculate_impl(&state).await.unwrap();
    assert_eq!(summary.groups_updated, 1);

    for key in [&a, &b] {
        let counters = store.counters(key).await.unwrap();
        assert_eq!(counters.last_updated, Some(summary.started_at));
        assert_eq!(counters.exposures, 500);
        assert_eq!(counters.conversions, 100);
        assert!(counters.weight.is_some());
    }
}

#[tokio::test]
async fn test_symmetric_variants_stay_close() {
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    seed_counters(&store, &VariantKey::new("d.json", "cta", "a"), 500, 100).await;
    seed_counters(&store, &VariantKey::new("d.json", "cta", "b"), 500, 100).await;

    recalculate_impl(&state).await.unwrap();

    let wa = store
        .counters(&VariantKey::new("d.json", "cta", "a"))
        .await
        .unwrap()
        .weight
        .unwrap();
    let wb = store
        .counters(&VariantKey::new("d.json", "cta", "b"))
        .await
        .unwrap()
        .weight
        .unwrap();
    assert!((wa - wb).abs() < 5.0, "wa = {}, wb = {}", wa, wb);
    assert!((wa + wb - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_recalculation_is_stable_on_unchanged_counters() {
    // Two cycles over the same counters land within Monte-Carlo noise
    // of each other.
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    let a = VariantKey::new("d.json", "cta", "a");
    let b = VariantKey::new("d.json", "cta", "b");
    seed_counters(&store, &a, 2000, 180).await;
    seed_counters(&store, &b, 2000, 140).await;

    recalculate_impl(&state).await.unwrap();
    let first = store.counters(&a).await.unwrap().weight.unwrap();

    recalculate_impl(&state).await.unwrap();
    let second = store.counters(&a).await.unwrap().weight.unwrap();

    assert!(
        (first - second).abs() <= 0.5,
        "first = {}, second = {}",
        first,
        second
    );
}

#[tokio::test]
async fn test_groups_are_independent() {
    // One orphaned group and one live eligible group: the orphan is
    // skipped, the live group still updates in the same cycle.
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    seed_counters(&store, &VariantKey::new("d.json", "cta", "a"), 400, 20).await;
    seed_counters(&store, &VariantKey::new("d.json", "cta", "b"), 400, 80).await;
    seed_counters(&store, &VariantKey::new("gone.json", "old", "x"), 400, 80).await;

    let summary = recalculate_impl(&state).await.unwrap();
    assert_eq!(summary.groups_considered, 2);
    assert_eq!(summary.groups_updated, 1);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].datafile, "gone.json");
    assert_eq!(summary.skipped[0].reason, "not in any datafile");
}

#[tokio::test]
async fn test_multi_datafile_cycle() {
    let (state, store, _dir) = app_with_datafiles(&[
        ("one.json", two_variant_doc("f")),
        ("production/two.json", two_variant_doc("g")),
    ])
    .await;

    for (df, feat) in [("one.json", "f"), ("production/two.json", "g")] {
        seed_counters(&store, &VariantKey::new(df, feat, "a"), 300, 10).await;
        seed_counters(&store, &VariantKey::new(df, feat, "b"), 300, 60).await;
    }

    let summary = recalculate_impl(&state).await.unwrap();
    assert_eq!(summary.groups_considered, 2);
    assert_eq!(summary.groups_updated, 2);
}

#[tokio::test]
async fn test_concurrent_triggers_coalesce() {
    // Many simultaneous manual triggers: exactly one cycle may run at a
    // time, the rest either conflict or complete later; counters are
    // never corrupted.
    let dir = tempfile::tempdir().unwrap();
    common::write_datafile(dir.path(), "d.json", &two_variant_doc("cta"));

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

    seed_counters(&store, &VariantKey::new("d.json", "cta", "a"), 200, 10).await;
    seed_counters(&store, &VariantKey::new("d.json", "cta", "b"), 200, 40).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let recalculator = recalculator.clone();
        handles.push(tokio::spawn(async move { recalculator.run_cycle().await }));
    }

    let mut completed = 0;
    for handle in handles {
        if let experiment_optimizer::scheduler::CycleOutcome::Completed(_) =
            handle.await.unwrap().unwrap()
        {
            completed += 1;
        }
    }
    assert!(completed >= 1);

    // Counters intact regardless of contention
    let counters = store
        .counters(&VariantKey::new("d.json", "cta", "a"))
        .await
        .unwrap();
    assert_eq!(counters.exposures, 200);
    assert_eq!(counters.conversions, 10);
}
