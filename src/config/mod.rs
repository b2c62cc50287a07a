//! Configuration module
//!
//! This module handles all configuration types and loading
//! for the optimizer service.

mod defaults;
mod loading;
mod types;
mod validation;

// Re-export public types
pub use loading::load_config_from_env;
pub use types::{Config, StoreConfig};

// Re-export default functions for use in tests and other modules
pub use defaults::{
    datafiles_dir, default_config, http_host, http_port, min_exposures_for_update,
    sampler_trials, store_host, store_max_connections, store_port, update_interval,
};
