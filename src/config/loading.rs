//! Configuration loading from environment variables
//!
//! The service is configured environment-first for Docker/container
//! deployments; every variable has a default so an empty environment
//! yields a runnable local configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use super::defaults;
use super::types::{Config, StoreConfig};

/// Read an environment variable, falling back to `default` when unset
/// or empty, and failing loudly when present but unparseable
fn env_parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: '{}'", name, raw)),
        _ => Ok(default),
    }
}

fn env_string(name: &str, default: String) -> String {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw,
        _ => default,
    }
}

/// Load the full configuration from the environment
///
/// Recognized variables (all optional):
/// - `REDIS_HOST`, `REDIS_PORT`, `REDIS_DB`, `REDIS_PASSWORD`,
///   `REDIS_MAX_CONNECTIONS`
/// - `DATAFILES_DIR`
/// - `UPDATE_INTERVAL_MINUTES`, `MIN_EXPOSURES_FOR_UPDATE`,
///   `SAMPLER_TRIALS`
/// - `HOST`, `PORT`
pub fn load_config_from_env() -> Result<Config> {
    let password = std::env::var("REDIS_PASSWORD")
        .ok()
        .filter(|p| !p.is_empty());

    let update_minutes: u64 = env_parsed(
        "UPDATE_INTERVAL_MINUTES",
        defaults::update_interval().as_secs() / 60,
    )?;

    let config = Config {
        store: StoreConfig {
            host: env_string("REDIS_HOST", defaults::store_host()),
            port: env_parsed("REDIS_PORT", defaults::store_port())?,
            db: env_parsed("REDIS_DB", defaults::store_db())?,
            password,
            max_connections: env_parsed("REDIS_MAX_CONNECTIONS", defaults::store_max_connections())?,
        },
        datafiles_dir: PathBuf::from(env_string(
            "DATAFILES_DIR",
            defaults::datafiles_dir().display().to_string(),
        )),
        update_interval: Duration::from_secs(update_minutes * 60),
        min_exposures_for_update: env_parsed(
            "MIN_EXPOSURES_FOR_UPDATE",
            defaults::min_exposures_for_update(),
        )?,
        sampler_trials: env_parsed("SAMPLER_TRIALS", defaults::sampler_trials())?,
        host: env_string("HOST", defaults::http_host()),
        port: env_parsed("PORT", defaults::http_port())?,
    };

    config.validate()?;

    Ok(config)
}
