//! # Experiment Optimizer Library
//!
//! A companion optimization service for a feature-flag / experimentation
//! platform: it counts which variants users see and which of those
//! exposures convert, then continuously re-weights the variants with
//! Thompson Sampling so better performers receive more traffic. The
//! result is exposed by rewriting the `weight` fields inside the
//! platform's datafiles as SDKs fetch them.
//!
//! ## Architecture
//!
//! The service is organized into several modules for clean separation of
//! concerns:
//!
//! - **config**: Configuration loading and validation (environment-first)
//! - **store**: Durable counter store (Redis) behind the `CounterStore` trait
//! - **datafile**: Datafile catalogue and variant-structure extraction
//! - **overlay**: Pure weight rewrite of a datafile from stored weights
//! - **sampler**: Thompson-Sampling math over per-variant Beta posteriors
//! - **scheduler**: The periodic recalculation cycle and its locking
//! - **http**: Event ingest and query endpoints (axum)
//!
//! ## Design Philosophy
//!
//! Counter state lives entirely in the external store; parsed datafiles
//! are read-only in memory after load. The overlay is a pure function, so
//! serving never depends on recalculation, and a counter lookup failure
//! degrades to the on-disk weight instead of an error. One recalculation
//! cycle runs at a time, process-wide and (via a store lock) fleet-wide.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

// Module declarations
pub mod config;
pub mod constants;
pub mod datafile;
pub mod http;
pub mod logging;
pub mod overlay;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod types;

// Public exports
pub use config::{Config, load_config_from_env};
pub use datafile::DatafileRepository;
pub use http::AppState;
pub use scheduler::Recalculator;
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore};

use constants::lifecycle::{BOOT_PING_ATTEMPTS, BOOT_PING_BACKOFF};

/// Connect to the counter store, retrying within a bounded window
///
/// An unreachable store at boot is fatal: after the last failed attempt
/// the error propagates and the process exits non-zero.
pub async fn connect_store(config: &Config) -> Result<Arc<RedisCounterStore>> {
    let store = Arc::new(RedisCounterStore::new(&config.store)?);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.ping().await {
            Ok(()) => {
                info!(
                    "Successfully connected to store at {}",
                    config.store.address()
                );
                return Ok(store);
            }
            Err(e) if attempt < BOOT_PING_ATTEMPTS => {
                warn!(
                    "Store not reachable (attempt {}/{}): {}",
                    attempt, BOOT_PING_ATTEMPTS, e
                );
                tokio::time::sleep(BOOT_PING_BACKOFF).await;
            }
            Err(e) => {
                anyhow::bail!(
                    "Store at {} unreachable after {} attempts: {}",
                    config.store.address(),
                    BOOT_PING_ATTEMPTS,
                    e
                );
            }
        }
    }
}

/// Wire the application state from a loaded configuration
///
/// Loads the datafile catalogue (a missing directory is fatal), connects
/// the store, and builds the recalculator. The caller owns the scheduler
/// task and the HTTP server.
pub async fn build_app(config: &Config) -> Result<AppState> {
    let repo = Arc::new(DatafileRepository::new(&config.datafiles_dir));
    repo.load().await?;

    let store = connect_store(config).await?;

    let recalculator = Arc::new(Recalculator::new(
        repo.clone(),
        store.clone(),
        config.min_exposures_for_update,
        config.sampler_trials,
        config.update_interval,
    ));

    Ok(AppState::new(repo, store, recalculator))
}
