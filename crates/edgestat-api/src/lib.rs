//! edgestat-api — HTTP surface of the exporter.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `{path}` (default `/metrics`) | Foreground refresh, Prometheus exposition |

pub mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use edgestat_scheduler::RefreshScheduler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<RefreshScheduler>,
    /// Snapshot file foreground refreshes read and write.
    pub output_path: Arc<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub path: String,
    pub output_path: PathBuf,
}

/// Build the exporter router.
pub fn build_router(scheduler: Arc<RefreshScheduler>, config: ApiConfig) -> Router {
    let state = ApiState {
        scheduler,
        output_path: Arc::new(config.output_path),
    };

    Router::new()
        .route(&config.path, get(handlers::scrape))
        .with_state(state)
}
