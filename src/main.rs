use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use experiment_optimizer::constants::lifecycle::SHUTDOWN_GRACE;
use experiment_optimizer::{build_app, load_config_from_env, logging, scheduler};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Override the HTTP port (takes precedence over PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the datafiles directory (takes precedence over DATAFILES_DIR)
    #[arg(short, long)]
    datafiles_dir: Option<PathBuf>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    // Initialize tracing first
    logging::init_logging();

    let args = Args::parse();

    let num_cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    let worker_threads = args.threads.unwrap_or(num_cpus);

    if worker_threads == 1 {
        info!("Starting optimizer with single-threaded runtime");
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        rt.block_on(run(args))
    } else {
        info!(
            "Starting optimizer with {} worker threads (detected {} CPUs)",
            worker_threads, num_cpus
        );
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .enable_all()
            .build()?;
        rt.block_on(run(args))
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match load_config_from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration from environment: {}", e);
            return Err(e);
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = args.datafiles_dir {
        config.datafiles_dir = dir;
    }
    config.validate()?;

    info!(
        "Configuration: store {}, datafiles '{}', recalculation every {} minute(s), \
         eligibility threshold {} exposures",
        config.store.address(),
        config.datafiles_dir.display(),
        config.update_interval.as_secs() / 60,
        config.min_exposures_for_update
    );

    // Catalogue + store + recalculator; any failure here exits non-zero
    let state = build_app(&config).await?;

    // Background recalculation task with an explicit shutdown signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler_handle = scheduler::spawn_scheduler(
        state.recalculator.clone(),
        config.update_interval,
        shutdown_rx,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    info!("Optimizer listening on {}", config.bind_address());

    experiment_optimizer::http::serve(listener, state, shutdown_signal()).await?;

    // The HTTP server has drained; stop the scheduler and give any
    // running cycle a bounded window to finish.
    info!("Shutdown signal received, stopping scheduler...");
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler_handle)
        .await
        .is_err()
    {
        warn!(
            "Scheduler did not stop within {:?}; exiting anyway",
            SHUTDOWN_GRACE
        );
    }

    info!("Graceful shutdown complete");
    Ok(())
}

/// Resolve when the platform asks the optimizer to stop
///
/// Ctrl-C everywhere, SIGTERM too on unix since container runtimes send
/// it before a hard kill. A handler that cannot be installed is logged
/// and dropped rather than aborting a service that is otherwise healthy;
/// the remaining signal (or SIGKILL) still stops the process.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!("SIGTERM handler unavailable, shutting down on ctrl-c only: {}", e);
            ctrl_c.await;
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
