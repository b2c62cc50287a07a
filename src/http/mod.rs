//! HTTP surface
//!
//! The ingest endpoints (`/expose`, `/convert`) and the query surface
//! (`/datafile/...`, `/stats`, `/recalculate`, `/reload`, `/health`)
//! share one axum router over a cloneable application state. Handlers do
//! no CPU-heavy work beyond JSON; everything else is store I/O.

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::{
    EventKind, StatsQuery, StatsResponse, TrackEvent, VariantStats, datafile_impl,
    recalculate_impl, stats_impl, track_impl,
};

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::constants::http::MAX_BODY_BYTES;
use crate::datafile::DatafileRepository;
use crate::scheduler::Recalculator;
use crate::store::CounterStore;

/// Shared state behind every handler
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<DatafileRepository>,
    pub store: Arc<dyn CounterStore>,
    pub recalculator: Arc<Recalculator>,
}

impl AppState {
    #[must_use]
    pub fn new(
        repo: Arc<DatafileRepository>,
        store: Arc<dyn CounterStore>,
        recalculator: Arc<Recalculator>,
    ) -> Self {
        Self {
            repo,
            store,
            recalculator,
        }
    }
}

/// Build the service router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/datafile/{*path}", get(handlers::get_datafile))
        .route("/expose", post(handlers::expose))
        .route("/convert", post(handlers::convert))
        .route("/stats", get(handlers::stats))
        .route("/recalculate", post(handlers::recalculate))
        .route("/reload", post(handlers::reload))
        .route("/health", get(handlers::health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight handlers
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
