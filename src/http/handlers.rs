//! Endpoint implementations
//!
//! Each axum handler is a thin wrapper over an `_impl` function taking
//! plain arguments, so the behavior is testable without a socket.

use std::collections::{BTreeMap, BTreeSet};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::AppState;
use super::error::ApiError;
use crate::constants::store::STATS_PREFIX;
use crate::datafile::extract_variant_groups;
use crate::overlay::{StoredWeights, overlay_datafile};
use crate::scheduler::{CycleOutcome, CycleSummary};
use crate::types::{GroupKey, VariantKey};

/// Body shape shared by `/expose` and `/convert`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackEvent {
    pub datafile: String,
    pub features: BTreeMap<String, String>,
}

/// Which counter an event increments
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    Exposure,
    Conversion,
}

/// One variant's entry in the stats response
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VariantStats {
    pub exposures: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub weight: Option<f64>,
    pub last_updated: Option<u64>,
}

/// `datafile → feature → variant → stats`
pub type StatsResponse = BTreeMap<String, BTreeMap<String, BTreeMap<String, VariantStats>>>;

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub datafile: Option<String>,
    pub feature: Option<String>,
}

// --- implementations ---

/// Serve a datafile with its weights overlaid from the store
///
/// A counter-lookup failure for a variant falls back to the on-disk
/// weight; the overlay never fails to serve a known datafile.
pub async fn datafile_impl(state: &AppState, path: &str) -> Result<Value, ApiError> {
    let doc = state
        .repo
        .get(path)
        .await
        .ok_or_else(|| ApiError::NotFound("Datafile not found".to_string()))?;

    let mut stored = StoredWeights::new();
    for group in extract_variant_groups(&doc) {
        for variant in &group.variants {
            let key = VariantKey::new(path, group.feature.clone(), variant.value.clone());
            match state.store.counters(&key).await {
                Ok(counters) => {
                    if let Some(weight) = counters.weight {
                        stored.insert((group.feature.clone(), variant.value.clone()), weight);
                    }
                }
                Err(e) => {
                    debug!("Counter lookup failed for {}; using declared weight: {}", key, e);
                }
            }
        }
    }

    Ok(overlay_datafile(&doc, &stored))
}

/// Record one exposure or conversion event per `(feature, variant)` pair
///
/// Unknown feature keys and variant values still increment; retired
/// experiments accumulate harmlessly and the scheduler ignores them.
/// Increments are never retried: on a store error the rest of the batch
/// is abandoned and the SDK may resend.
pub async fn track_impl(
    state: &AppState,
    kind: EventKind,
    event: &TrackEvent,
) -> Result<(), ApiError> {
    for (feature, variant) in &event.features {
        let key = VariantKey::new(event.datafile.clone(), feature.clone(), variant.clone());
        match kind {
            EventKind::Exposure => state.store.incr_exposure(&key).await?,
            EventKind::Conversion => state.store.incr_conversion(&key).await?,
        }
    }
    Ok(())
}

/// Collect counter rows, optionally narrowed to one datafile or one group
///
/// The result is the union of every counter record in scope (orphans of
/// retired experiments included) and every variant declared in the
/// catalogue, so a variant that has never seen an event still reports
/// zeros.
pub async fn stats_impl(
    state: &AppState,
    datafile: Option<&str>,
    feature: Option<&str>,
) -> Result<StatsResponse, ApiError> {
    let prefix = match (datafile, feature) {
        (Some(df), Some(feat)) => GroupKey::new(df, feat).storage_prefix(),
        (Some(df), None) => format!("{}{}:", STATS_PREFIX, df),
        _ => STATS_PREFIX.to_string(),
    };

    // The scan may return duplicates; dedupe before fetching.
    let mut keys = BTreeSet::new();
    for raw in state.store.list_keys(&prefix).await? {
        match VariantKey::parse_storage_key(&raw) {
            Some(key) => {
                keys.insert(key);
            }
            None => warn!("Ignoring malformed counter key '{}'", raw),
        }
    }

    for (group, declared) in state.repo.all_groups().await {
        if datafile.is_some_and(|df| df != group.datafile)
            || feature.is_some_and(|feat| feat != group.feature)
        {
            continue;
        }
        for variant in &declared.variants {
            keys.insert(group.variant(variant.value.as_str()));
        }
    }

    let mut response = StatsResponse::new();
    for key in keys {
        let counters = state.store.counters(&key).await?;
        response
            .entry(key.datafile.clone())
            .or_default()
            .entry(key.feature.clone())
            .or_default()
            .insert(
                key.variant,
                VariantStats {
                    exposures: counters.exposures,
                    conversions: counters.conversions,
                    conversion_rate: round4(counters.conversion_rate()),
                    weight: counters.weight,
                    last_updated: counters.last_updated,
                },
            );
    }

    Ok(response)
}

/// Run exactly one recalculation cycle synchronously
pub async fn recalculate_impl(state: &AppState) -> Result<CycleSummary, ApiError> {
    match state.recalculator.run_cycle().await? {
        CycleOutcome::Completed(summary) => Ok(summary),
        CycleOutcome::AlreadyRunning => Err(ApiError::Conflict(
            "A recalculation cycle is already running".to_string(),
        )),
        CycleOutcome::LockHeld => Err(ApiError::Conflict(
            "Another process holds the recalculation lock".to_string(),
        )),
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

// --- axum wrappers ---

pub(super) async fn get_datafile(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Value>, ApiError> {
    datafile_impl(&state, &path).await.map(Json)
}

fn parse_event(body: &[u8]) -> Result<TrackEvent, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request format: {}", e)))
}

pub(super) async fn expose(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event = parse_event(&body)?;
    track_impl(&state, EventKind::Exposure, &event).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn convert(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let event = parse_event(&body)?;
    track_impl(&state, EventKind::Conversion, &event).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, ApiError> {
    stats_impl(&state, query.datafile.as_deref(), query.feature.as_deref())
        .await
        .map(Json)
}

pub(super) async fn recalculate(
    State(state): State<AppState>,
) -> Result<Json<CycleSummary>, ApiError> {
    recalculate_impl(&state).await.map(Json)
}

pub(super) async fn reload(State(state): State<AppState>) -> Result<Response, ApiError> {
    let count = state
        .repo
        .load()
        .await
        .map_err(|e| ApiError::Internal(format!("Reload failed: {}", e)))?;
    Ok(Json(serde_json::json!({ "reloaded": count })).into_response())
}

pub(super) async fn health(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.store.ping().await?;
    Ok(Json(serde_json::json!({ "status": "ok" })).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_parsing() {
        let event = parse_event(
            br#"{"datafile": "production/d.json", "features": {"cta": "red", "banner": "on"}}"#,
        )
        .unwrap();
        assert_eq!(event.datafile, "production/d.json");
        assert_eq!(event.features.len(), 2);
        assert_eq!(event.features["cta"], "red");
    }

    #[test]
    fn test_malformed_event_is_bad_request() {
        assert!(matches!(
            parse_event(b"{not json"),
            Err(ApiError::BadRequest(_))
        ));
        // Missing required fields
        assert!(matches!(
            parse_event(br#"{"datafile": "d.json"}"#),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            parse_event(br#"{"features": {}}"#),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(1.0 / 3.0), 0.3333);
        assert_eq!(round4(0.0), 0.0);
    }
}
