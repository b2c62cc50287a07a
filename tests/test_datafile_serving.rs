//! Serving overlayed datafiles through the query surface

mod common;

use common::{app_with_datafiles, seed_counters, two_variant_doc};
use experiment_optimizer::http::{ApiError, datafile_impl, recalculate_impl};
use experiment_optimizer::store::CounterStore;
use experiment_optimizer::types::VariantKey;
use serde_json::json;

fn weights_of(doc: &serde_json::Value, feature: &str) -> Vec<f64> {
    doc["features"][feature]["variations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["weight"].as_f64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_passthrough_without_counters() {
    let (state, _store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    let doc = datafile_impl(&state, "d.json").await.unwrap();
    assert_eq!(weights_of(&doc, "cta"), vec![50.0, 50.0]);
    // Pass-through fields survive re-serialization
    assert_eq!(doc["schemaVersion"], json!(1));
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (state, _store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    assert!(matches!(
        datafile_impl(&state, "missing.json").await,
        Err(ApiError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_nested_path_keys() {
    let (state, _store, _dir) = app_with_datafiles(&[(
        "production/datafile-tag-all.json",
        two_variant_doc("cta"),
    )])
    .await;

    assert!(
        datafile_impl(&state, "production/datafile-tag-all.json")
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_stored_weights_are_served() {
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    store
        .set_weight(&VariantKey::new("d.json", "cta", "a"), 80.0, 1)
        .await
        .unwrap();
    store
        .set_weight(&VariantKey::new("d.json", "cta", "b"), 20.0, 1)
        .await
        .unwrap();

    let doc = datafile_impl(&state, "d.json").await.unwrap();
    assert_eq!(weights_of(&doc, "cta"), vec![80.0, 20.0]);
}

#[tokio::test]
async fn test_group_sum_is_preserved_under_partial_weights() {
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    // Only one variant has a stored weight; the group renormalizes to
    // the declared sum.
    store
        .set_weight(&VariantKey::new("d.json", "cta", "a"), 300.0, 1)
        .await
        .unwrap();

    let doc = datafile_impl(&state, "d.json").await.unwrap();
    let weights = weights_of(&doc, "cta");
    let sum: f64 = weights.iter().sum();
    assert!((sum - 100.0).abs() < 1e-4, "weights = {:?}", weights);
}

#[tokio::test]
async fn test_store_outage_falls_back_to_disk_weights() {
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    store
        .set_weight(&VariantKey::new("d.json", "cta", "a"), 99.0, 1)
        .await
        .unwrap();
    store.set_failing(true);

    // The overlay never fails to serve a known datafile
    let doc = datafile_impl(&state, "d.json").await.unwrap();
    assert_eq!(weights_of(&doc, "cta"), vec![50.0, 50.0]);
}

#[tokio::test]
async fn test_recalculated_weights_flow_through_to_serving() {
    let (state, store, _dir) =
        app_with_datafiles(&[("d.json", two_variant_doc("cta"))]).await;

    seed_counters(&store, &VariantKey::new("d.json", "cta", "a"), 1000, 50).await;
    seed_counters(&store, &VariantKey::new("d.json", "cta", "b"), 1000, 200).await;

    let summary = recalculate_impl(&state).await.unwrap();
    assert_eq!(summary.groups_updated, 1);

    let doc = datafile_impl(&state, "d.json").await.unwrap();
    let weights = weights_of(&doc, "cta");
    assert!(weights[1] > 90.0, "weights = {:?}", weights);
    assert!(weights[0] < 10.0, "weights = {:?}", weights);
    let sum: f64 = weights.iter().sum();
    assert!((sum - 100.0).abs() < 1e-4);
    // Variant identity and order are untouched by the rewrite
    let values: Vec<&str> = doc["features"]["cta"]["variations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["value"].as_str().unwrap())
        .collect();
    assert_eq!(values, vec!["a", "b"]);
}
