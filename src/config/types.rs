//! Configuration type definitions

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counter store (Redis) connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Store hostname or IP
    pub host: String,
    /// Store port
    pub port: u16,
    /// Logical database index
    pub db: u32,
    /// Optional AUTH password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Connections kept in the pool
    pub max_connections: usize,
}

impl StoreConfig {
    /// `host:port` form used for dialing and log lines
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Top-level service configuration
///
/// Loaded from environment variables (see `loading`); CLI flags may
/// override `datafiles_dir` and `port` after loading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Counter store settings
    pub store: StoreConfig,
    /// Root directory scanned for `*.json` datafiles
    pub datafiles_dir: PathBuf,
    /// Period between recalculation cycles
    #[serde(with = "minutes_serde")]
    pub update_interval: Duration,
    /// Every variant of a group needs at least this many exposures
    /// before the group is re-weighted
    pub min_exposures_for_update: u64,
    /// Monte-Carlo trials per group when estimating P(best)
    pub sampler_trials: usize,
    /// HTTP bind host
    pub host: String,
    /// HTTP bind port
    pub port: u16,
}

impl Config {
    /// `host:port` the HTTP surface binds to
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Serialize the update interval as whole minutes, matching the
/// `UPDATE_INTERVAL_MINUTES` environment variable
pub mod minutes_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs() / 60)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let minutes = u64::deserialize(d)?;
        Ok(Duration::from_secs(minutes * 60))
    }
}
