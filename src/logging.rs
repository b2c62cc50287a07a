//! Logging setup
//!
//! One subscriber, two sinks: human-readable lines on stdout plus the
//! same stream appended to `optimizer.log` for post-mortems after a bad
//! recalculation cycle. The level comes from `RUST_LOG` and defaults to
//! `info`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::constants::logging::LOG_FILE;

/// Install the global subscriber; call once, before any component logs
pub fn init_logging() {
    let file_appender = tracing_appender::rolling::never(".", LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Both sinks share one filter; the level split belongs to RUST_LOG
    // directives, not to the sink.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    // The appender flushes from a background thread for as long as the
    // guard lives; the process logs until exit, so leak it.
    std::mem::forget(guard);
}
