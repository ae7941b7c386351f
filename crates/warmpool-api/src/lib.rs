//! warmpool-api: HTTP surface for WarmPool.
//!
//! Exposes the claimer and the quota gate to callers that provision
//! workspaces, plus the Prometheus scrape endpoint.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/presets/{id}/claim` | Claim a prebuilt workspace (409 when none is claimable) |
//! | POST | `/api/v1/quota/commit` | Admit or reject a build against the owner's budget |
//! | GET | `/healthz` | Liveness |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use warmpool_metrics::MetricsCollector;
use warmpool_prebuilds::Claimer;
use warmpool_quota::QuotaCommitter;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub claimer: Arc<dyn Claimer>,
    pub committer: Arc<dyn QuotaCommitter>,
    pub metrics: Arc<MetricsCollector>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/presets/{id}/claim", post(handlers::claim_prebuild))
        .route("/quota/commit", post(handlers::commit_quota))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
