//! Constants used throughout the optimizer
//!
//! This module centralizes magic numbers and store-layout strings
//! to improve maintainability and reduce duplication.

use std::time::Duration;

/// Persistent store layout
pub mod store {
    /// Prefix for per-variant counter records
    pub const STATS_PREFIX: &str = "stats:";

    /// Key guarding the recalculation cycle across processes
    pub const RECALC_LOCK_KEY: &str = "lock:recalc";

    /// Hash field names inside a counter record
    pub const FIELD_EXPOSURES: &str = "exposures";
    pub const FIELD_CONVERSIONS: &str = "conversions";
    pub const FIELD_WEIGHT: &str = "weight";
    pub const FIELD_LAST_UPDATED: &str = "last_updated";

    /// SCAN batch size hint for key enumeration
    pub const SCAN_COUNT: usize = 250;
}

/// Sampling constants
pub mod sampling {
    /// Monte-Carlo trials per group when estimating P(best)
    pub const DEFAULT_TRIALS: usize = 10_000;

    /// Weights are rounded to this many decimal places
    pub const WEIGHT_DECIMALS: u32 = 4;
}

/// Boot and shutdown timing
pub mod lifecycle {
    use super::Duration;

    /// Attempts to reach the store before giving up at boot
    pub const BOOT_PING_ATTEMPTS: u32 = 5;

    /// Delay between boot connection attempts
    pub const BOOT_PING_BACKOFF: Duration = Duration::from_secs(2);

    /// Grace period for in-flight handlers and a running cycle on shutdown
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
}

/// Logging sinks
pub mod logging {
    /// File sink beside the process working directory; stdout gets the
    /// same stream
    pub const LOG_FILE: &str = "optimizer.log";
}

/// HTTP surface limits
pub mod http {
    /// Maximum accepted request body size (events are tiny)
    pub const MAX_BODY_BYTES: usize = 256 * 1024;
}

/// Datafile parsing
pub mod datafile {
    /// Candidate keys for the variant array inside a feature, checked in
    /// order. The platform's schema has shipped more than one spelling.
    pub const VARIANT_ARRAY_KEYS: &[&str] = &["variations", "variants"];
}
