//! warmpool-quota: quota admission for workspace builds.
//!
//! Every build, prebuilt or not, passes through a [`QuotaCommitter`] before
//! it starts. The store-backed committer reads the owner's consumption and
//! budget inside one serializable transaction and applies the net-increase
//! rule:
//!
//! ```text
//! net_increase = previous build missing || proposed >= previous
//! reject       = consumed + proposed > budget && net_increase
//! ```
//!
//! A build that lowers a workspace's cost is admitted even when the owner
//! is already over budget; holding the cost steady counts as an increase.
//! The committer is a gate only: the build's own `daily_cost` is persisted
//! by the caller. Nothing is reserved, so two builds committed before
//! either cost is persisted are judged against the same consumption and
//! can both be admitted past the budget together.

pub mod committer;
pub mod error;

pub use committer::{CommitQuotaRequest, CommitQuotaResponse, NoopCommitter, QuotaCommitter, StoreCommitter};
pub use error::{QuotaError, QuotaResult};
