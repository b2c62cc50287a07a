//! Variant structure extraction from datafile documents
//!
//! Datafiles are opaque JSON except for one known sub-shape:
//! `features.<key>.variations[*].{value, weight}`. The variant-array key
//! is parameterized because the platform's schema has shipped more than
//! one spelling.

use serde_json::Value;

use crate::constants::datafile::VARIANT_ARRAY_KEYS;

/// One variant as declared on disk
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredVariant {
    pub value: String,
    pub weight: f64,
}

/// All variants of one feature, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct VariantGroup {
    pub feature: String,
    pub variants: Vec<DeclaredVariant>,
}

impl VariantGroup {
    /// Sum of the declared weights; the normalization target for any
    /// rewrite of this group
    #[must_use]
    pub fn original_sum(&self) -> f64 {
        self.variants.iter().map(|v| v.weight).sum()
    }
}

/// Locate the variant array inside one feature object
///
/// Checks the candidate keys in order; first present wins.
#[must_use]
pub fn variant_array(feature: &Value) -> Option<&Vec<Value>> {
    VARIANT_ARRAY_KEYS
        .iter()
        .find_map(|key| feature.get(*key).and_then(Value::as_array))
}

/// Extract every feature's variant group from a parsed datafile
///
/// Features without a variant array, and array entries without a string
/// `value`, are skipped. Ordering follows the document.
#[must_use]
pub fn extract_variant_groups(doc: &Value) -> Vec<VariantGroup> {
    let Some(features) = doc.get("features").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut groups = Vec::new();
    for (feature_key, feature) in features {
        let Some(entries) = variant_array(feature) else {
            continue;
        };
        let variants: Vec<DeclaredVariant> = entries
            .iter()
            .filter_map(|entry| {
                let value = entry.get("value")?.as_str()?.to_string();
                let weight = entry.get("weight").and_then(Value::as_f64).unwrap_or(0.0);
                Some(DeclaredVariant { value, weight })
            })
            .collect();
        if !variants.is_empty() {
            groups.push(VariantGroup {
                feature: feature_key.clone(),
                variants,
            });
        }
    }
    groups
}
