//! Weight overlay
//!
//! Pure rewrite of a parsed datafile: each variant's declared weight is
//! replaced by its stored weight when one exists, and any group that uses
//! at least one stored weight is renormalized so its sum still equals the
//! sum of the declared weights. Everything else in the document passes
//! through untouched.

use std::collections::HashMap;

use serde_json::Value;

use crate::constants::datafile::VARIANT_ARRAY_KEYS;
use crate::constants::sampling::WEIGHT_DECIMALS;

/// Stored weights keyed by `(feature, variant value)`
pub type StoredWeights = HashMap<(String, String), f64>;

fn round_weight(x: f64) -> f64 {
    let scale = 10_f64.powi(WEIGHT_DECIMALS as i32);
    (x * scale).round() / scale
}

/// Split `target_sum` across variants in proportion to `shares`
///
/// Weights are rounded to four decimal places; the post-rounding residual
/// is added to the largest share so the sum equals `target_sum` exactly
/// (weights would otherwise drift over many rewrite cycles). An all-zero
/// share vector splits the target evenly. Ties on the largest share go to
/// the first variant.
#[must_use]
pub fn allocate_weights(shares: &[f64], target_sum: f64) -> Vec<f64> {
    if shares.is_empty() {
        return Vec::new();
    }

    let share_sum: f64 = shares.iter().sum();
    let mut weights: Vec<f64> = if share_sum > 0.0 {
        shares
            .iter()
            .map(|s| round_weight(s / share_sum * target_sum))
            .collect()
    } else {
        let equal = round_weight(target_sum / shares.len() as f64);
        vec![equal; shares.len()]
    };

    let rounded_sum: f64 = weights.iter().sum();
    let residual = target_sum - rounded_sum;
    if residual != 0.0 {
        let top = shares
            .iter()
            .enumerate()
            .max_by(|(ai, a), (bi, b)| {
                a.partial_cmp(b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(bi.cmp(ai))
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        weights[top] = round_weight(weights[top] + residual);
    }

    weights
}

/// Rewrite one datafile with the given stored weights
///
/// The returned document has the same features, the same variant values
/// in the same order, and per-group weight sums equal to the on-disk
/// sums. Groups with no stored weight pass through unchanged.
#[must_use]
pub fn overlay_datafile(doc: &Value, stored: &StoredWeights) -> Value {
    let mut out = doc.clone();

    let Some(features) = out.get_mut("features").and_then(Value::as_object_mut) else {
        return out;
    };

    for (feature_key, feature) in features.iter_mut() {
        let mut entries = None;
        for key in VARIANT_ARRAY_KEYS.iter() {
            if feature.get(*key).is_some() {
                entries = feature.get_mut(*key).and_then(Value::as_array_mut);
                break;
            }
        }
        let Some(entries) = entries else {
            continue;
        };

        overlay_group(feature_key, entries, stored);
    }

    out
}

fn overlay_group(feature_key: &str, entries: &mut [Value], stored: &StoredWeights) {
    let mut original_sum = 0.0;
    let mut shares = Vec::with_capacity(entries.len());
    let mut any_stored = false;

    for entry in entries.iter() {
        let original = entry.get("weight").and_then(Value::as_f64).unwrap_or(0.0);
        original_sum += original;

        let value = entry.get("value").and_then(Value::as_str);
        let effective = value
            .and_then(|v| stored.get(&(feature_key.to_string(), v.to_string())))
            .copied();
        if effective.is_some() {
            any_stored = true;
        }
        shares.push(effective.unwrap_or(original));
    }

    if !any_stored {
        return;
    }

    let weights = allocate_weights(&shares, original_sum);
    for (entry, weight) in entries.iter_mut().zip(weights) {
        if let Some(obj) = entry.as_object_mut() {
            obj.insert("weight".to_string(), Value::from(weight));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(pairs: &[(&str, &str, f64)]) -> StoredWeights {
        pairs
            .iter()
            .map(|(f, v, w)| ((f.to_string(), v.to_string()), *w))
            .collect()
    }

    fn weights_of(doc: &Value, feature: &str) -> Vec<f64> {
        doc["features"][feature]["variations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["weight"].as_f64().unwrap())
            .collect()
    }

    fn sample_doc() -> Value {
        json!({
            "schemaVersion": 1,
            "features": {
                "cta": {
                    "defaultValue": "a",
                    "variations": [
                        {"value": "a", "weight": 50},
                        {"value": "b", "weight": 50}
                    ]
                }
            }
        })
    }

    #[test]
    fn test_passthrough_without_stored_weights() {
        let doc = sample_doc();
        let out = overlay_datafile(&doc, &StoredWeights::new());
        assert_eq!(out, doc);
    }

    #[test]
    fn test_stored_weights_replace_originals() {
        let doc = sample_doc();
        let out = overlay_datafile(&doc, &stored(&[("cta", "a", 80.0), ("cta", "b", 20.0)]));
        assert_eq!(weights_of(&out, "cta"), vec![80.0, 20.0]);
        // Everything outside the weights is untouched
        assert_eq!(out["schemaVersion"], json!(1));
        assert_eq!(out["features"]["cta"]["defaultValue"], json!("a"));
    }

    #[test]
    fn test_partial_stored_weights_renormalize_whole_group() {
        let doc = sample_doc();
        // Only variant a has a stored weight; the group is rescaled so
        // the sum still equals the declared 100.
        let out = overlay_datafile(&doc, &stored(&[("cta", "a", 150.0)]));
        let weights = weights_of(&out, "cta");
        assert_eq!(weights.len(), 2);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 100.0).abs() < 1e-4);
        assert!(weights[0] > weights[1]);
    }

    #[test]
    fn test_variant_order_is_preserved() {
        let doc = json!({
            "features": {
                "f": {
                    "variations": [
                        {"value": "z", "weight": 10},
                        {"value": "m", "weight": 10},
                        {"value": "a", "weight": 80}
                    ]
                }
            }
        });
        let out = overlay_datafile(&doc, &stored(&[("f", "m", 90.0)]));
        let values: Vec<&str> = out["features"]["f"]["variations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["value"].as_str().unwrap())
            .collect();
        assert_eq!(values, vec!["z", "m", "a"]);
    }

    #[test]
    fn test_sum_preserved_for_non_hundred_targets() {
        let doc = json!({
            "features": {
                "f": {
                    "variations": [
                        {"value": "a", "weight": 30},
                        {"value": "b", "weight": 30}
                    ]
                }
            }
        });
        let out = overlay_datafile(&doc, &stored(&[("f", "a", 10.0), ("f", "b", 90.0)]));
        let weights = weights_of(&out, "f");
        let sum: f64 = weights.iter().sum();
        assert!((sum - 60.0).abs() < 1e-4);
        assert!(weights[1] > weights[0]);
    }

    #[test]
    fn test_allocate_weights_residual_goes_to_largest_share() {
        let weights = allocate_weights(&[1.0, 1.0, 1.0], 100.0);
        let sum: f64 = weights.iter().sum();
        assert!((sum - 100.0).abs() < 1e-9, "weights = {:?}", weights);
        // 33.3333 * 3 leaves 0.0001; the tie on largest share goes to
        // the first variant.
        assert!(weights[0] >= weights[1]);
        assert_eq!(weights[1], weights[2]);
    }

    #[test]
    fn test_allocate_weights_zero_shares_split_evenly() {
        let weights = allocate_weights(&[0.0, 0.0], 100.0);
        assert_eq!(weights, vec![50.0, 50.0]);
    }

    #[test]
    fn test_allocate_weights_empty() {
        assert!(allocate_weights(&[], 100.0).is_empty());
    }

    #[test]
    fn test_opaque_document_passes_through() {
        let doc = json!({"anything": [1, 2, 3]});
        assert_eq!(overlay_datafile(&doc, &StoredWeights::new()), doc);
    }
}
