//! Claimer: hands one eligible prebuild to a requesting user.
//!
//! Selection and reassignment happen in a single store transaction. The
//! claimer only shapes the request and sorts the outcome into
//! "claimed", "pool empty" and "store failure".

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use warmpool_state::{ClaimPrebuildParams, StateStore};

use crate::error::{PrebuildsError, PrebuildsResult};

/// A user's request for a workspace from a preset's pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    pub now: DateTime<Utc>,
    pub user_id: Uuid,
    /// Name the claimed workspace is renamed to.
    pub name: String,
    pub preset_id: Uuid,
    pub autostart_schedule: Option<String>,
    pub next_start_at: Option<DateTime<Utc>>,
    pub ttl: Option<Duration>,
}

/// Claims prebuilt workspaces on behalf of users.
pub trait Claimer: Send + Sync {
    /// Returns the id of the claimed workspace, or
    /// [`PrebuildsError::NoClaimablePrebuiltWorkspaces`] when the pool is empty
    /// and [`PrebuildsError::PresetNotFound`] when there is no such preset.
    fn claim(&self, request: &ClaimRequest) -> PrebuildsResult<Uuid>;
}

/// Claims from the state store.
#[derive(Clone)]
pub struct StoreClaimer {
    store: StateStore,
}

impl StoreClaimer {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl Claimer for StoreClaimer {
    fn claim(&self, request: &ClaimRequest) -> PrebuildsResult<Uuid> {
        if request.name.trim().is_empty() {
            return Err(PrebuildsError::Validation("workspace name is empty".to_string()));
        }

        let preset = self.store.get_preset(request.preset_id).map_err(|source| {
            PrebuildsError::Claim {
                user_id: request.user_id,
                source,
            }
        })?;
        if preset.is_none() {
            return Err(PrebuildsError::PresetNotFound(request.preset_id));
        }

        let params = ClaimPrebuildParams {
            new_user_id: request.user_id,
            new_name: request.name.clone(),
            now: request.now,
            preset_id: request.preset_id,
            autostart_schedule: request.autostart_schedule.clone(),
            next_start_at: request.next_start_at,
            ttl_ms: request
                .ttl
                .map(|ttl| i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)),
        };

        match self.store.claim_prebuilt_workspace(&params) {
            Ok(workspace) => {
                debug!(
                    workspace_id = %workspace.id,
                    preset_id = %request.preset_id,
                    user_id = %request.user_id,
                    "claimed prebuilt workspace"
                );
                Ok(workspace.id)
            }
            Err(e) if e.is_not_found() => Err(PrebuildsError::NoClaimablePrebuiltWorkspaces),
            Err(source) => Err(PrebuildsError::Claim {
                user_id: request.user_id,
                source,
            }),
        }
    }
}

/// Never claims anything; used when prebuilds are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopClaimer;

impl Claimer for NoopClaimer {
    fn claim(&self, _request: &ClaimRequest) -> PrebuildsResult<Uuid> {
        Err(PrebuildsError::NoClaimablePrebuiltWorkspaces)
    }
}
