//! Prebuild pool error types.

use thiserror::Error;
use uuid::Uuid;
use warmpool_state::StateError;

/// Errors that can occur while snapshotting or claiming prebuilds.
#[derive(Debug, Error)]
pub enum PrebuildsError {
    #[error("preset not found: {0}")]
    PresetNotFound(Uuid),

    /// The pool is empty; callers fall back to on-demand provisioning.
    #[error("no claimable prebuilt workspaces found")]
    NoClaimablePrebuiltWorkspaces,

    #[error("invalid claim request: {0}")]
    Validation(String),

    #[error("claim prebuild for user {user_id}: {source}")]
    Claim {
        user_id: Uuid,
        #[source]
        source: StateError,
    },

    #[error("snapshot state: {0}")]
    Snapshot(#[source] StateError),
}

pub type PrebuildsResult<T> = Result<T, PrebuildsError>;
