use std::time::Duration;

use warmpool_prebuilds::PrebuildsError;
use warmpool_state::StateError;

/// Why a metrics refresh did not replace the cached state.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch prebuild metrics: {0}")]
    Query(#[source] StateError),

    #[error("snapshot state: {0}")]
    Snapshot(#[source] PrebuildsError),

    #[error("metrics refresh timed out after {0:?}")]
    Timeout(Duration),

    #[error("previous metrics refresh is still running")]
    InFlight,

    #[error("metrics refresh task failed: {0}")]
    Join(String),
}
