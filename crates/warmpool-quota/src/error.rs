//! Quota admission error types.

use thiserror::Error;
use warmpool_state::StateError;

/// Errors from quota admission. A rejected build is not an error; it is a
/// `CommitQuotaResponse` with `ok == false`.
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("invalid quota request: {0}")]
    Validation(String),

    #[error("quota transaction: {0}")]
    Store(#[from] StateError),
}

pub type QuotaResult<T> = Result<T, QuotaError>;
