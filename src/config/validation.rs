//! Configuration validation
//!
//! Semantic checks that run once at load time, before any component is
//! wired up. Misconfiguration should fail the boot, not a request.

use anyhow::Result;
use std::time::Duration;

use super::types::Config;

/// Below this the scheduler competes with its own lock TTL
const MIN_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

impl Config {
    /// Validate configuration for correctness
    pub fn validate(&self) -> Result<()> {
        if self.store.host.is_empty() {
            anyhow::bail!("REDIS_HOST must not be empty");
        }
        if self.store.port == 0 {
            anyhow::bail!("REDIS_PORT must not be 0");
        }
        if self.store.max_connections == 0 {
            anyhow::bail!("REDIS_MAX_CONNECTIONS must be at least 1");
        }
        if self.port == 0 {
            anyhow::bail!("PORT must not be 0");
        }
        if self.update_interval < MIN_UPDATE_INTERVAL {
            anyhow::bail!(
                "UPDATE_INTERVAL_MINUTES must be at least 1 (got {:?})",
                self.update_interval
            );
        }
        if self.min_exposures_for_update == 0 {
            tracing::warn!(
                "MIN_EXPOSURES_FOR_UPDATE is 0; groups will be re-weighted \
                 on their first cycle regardless of traffic"
            );
        }
        if self.sampler_trials < 1_000 {
            tracing::warn!(
                trials = self.sampler_trials,
                "SAMPLER_TRIALS is low; P(best) estimates will be noisy"
            );
        }
        Ok(())
    }
}
