//! HTTP handlers.
//!
//! Each handler calls one seam from `ApiState` and returns a JSON envelope,
//! except `/metrics` which returns Prometheus text.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use warmpool_prebuilds::{ClaimRequest, PrebuildsError};
use warmpool_quota::{CommitQuotaRequest, QuotaError};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Claiming ───────────────────────────────────────────────────

/// Body of a claim request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimBody {
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub autostart_schedule: Option<String>,
    #[serde(default)]
    pub next_start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct Claimed {
    workspace_id: Uuid,
}

/// POST /api/v1/presets/{id}/claim
pub async fn claim_prebuild(
    State(state): State<ApiState>,
    Path(preset_id): Path<Uuid>,
    Json(body): Json<ClaimBody>,
) -> impl IntoResponse {
    let request = ClaimRequest {
        now: Utc::now(),
        user_id: body.user_id,
        name: body.name,
        preset_id,
        autostart_schedule: body.autostart_schedule,
        next_start_at: body.next_start_at,
        ttl: body.ttl_secs.map(Duration::from_secs),
    };

    match state.claimer.claim(&request) {
        Ok(workspace_id) => ApiResponse::ok(Claimed { workspace_id }).into_response(),
        Err(e @ PrebuildsError::NoClaimablePrebuiltWorkspaces) => {
            debug!(%preset_id, "no claimable prebuild, caller falls back to provisioning");
            error_response(&e.to_string(), StatusCode::CONFLICT).into_response()
        }
        Err(e @ PrebuildsError::Validation(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(e @ PrebuildsError::PresetNotFound(_)) => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            warn!(error = %e, %preset_id, "claim failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ── Quota ──────────────────────────────────────────────────────

/// POST /api/v1/quota/commit
///
/// A rejected build is still a successful call; the decision is in `data.ok`.
pub async fn commit_quota(
    State(state): State<ApiState>,
    Json(request): Json<CommitQuotaRequest>,
) -> impl IntoResponse {
    match state.committer.commit_quota(&request) {
        Ok(response) => ApiResponse::ok(response).into_response(),
        Err(e @ QuotaError::Validation(_)) => {
            error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response()
        }
        Err(QuotaError::Store(e)) if e.is_not_found() => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => {
            warn!(error = %e, build_id = %request.build_id, "quota commit failed");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({ "status": "ok" }))
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = warmpool_metrics::render_prometheus(&state.metrics.collect());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
