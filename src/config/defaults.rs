//! Default values for configuration fields
//!
//! This module centralizes all default value functions so loading and
//! tests agree on one source of truth.

use std::path::PathBuf;
use std::time::Duration;

use super::types::{Config, StoreConfig};
use crate::constants::sampling;

/// Default store host
#[inline]
pub fn store_host() -> String {
    "localhost".to_string()
}

/// Default store port
#[inline]
pub fn store_port() -> u16 {
    6379
}

/// Default store database index
#[inline]
pub fn store_db() -> u32 {
    0
}

/// Default store pool size
#[inline]
pub fn store_max_connections() -> usize {
    8
}

/// Default datafiles directory
#[inline]
pub fn datafiles_dir() -> PathBuf {
    PathBuf::from("./dist")
}

/// Default recalculation period (30 minutes)
#[inline]
pub fn update_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Default eligibility threshold
#[inline]
pub fn min_exposures_for_update() -> u64 {
    100
}

/// Default Monte-Carlo trial count
#[inline]
pub fn sampler_trials() -> usize {
    sampling::DEFAULT_TRIALS
}

/// Default HTTP bind host
#[inline]
pub fn http_host() -> String {
    "0.0.0.0".to_string()
}

/// Default HTTP bind port
#[inline]
pub fn http_port() -> u16 {
    5050
}

/// A configuration built entirely from defaults
#[must_use]
pub fn default_config() -> Config {
    Config {
        store: StoreConfig {
            host: store_host(),
            port: store_port(),
            db: store_db(),
            password: None,
            max_connections: store_max_connections(),
        },
        datafiles_dir: datafiles_dir(),
        update_interval: update_interval(),
        min_exposures_for_update: min_exposures_for_update(),
        sampler_trials: sampler_trials(),
        host: http_host(),
        port: http_port(),
    }
}
