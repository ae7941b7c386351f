//! warmpool-prebuilds: the prebuilt workspace pool.
//!
//! Turns raw store rows into a point-in-time [`GlobalSnapshot`], derives the
//! per-preset [`ReconciliationState`] the reconciliation engine acts on, and
//! hands eligible prebuilds to users through a [`Claimer`].
//!
//! # Architecture
//!
//! ```text
//! StateSnapshotter::snapshot_state()
//!   └── GlobalSnapshot (immutable, one read transaction)
//!         └── filter_by_preset(id) → PresetSnapshot
//!               └── calculate_state() → ReconciliationState
//!
//! Claimer::claim()
//!   └── StateStore::claim_prebuilt_workspace() (one write transaction)
//! ```
//!
//! Both seams have a store-backed implementation and a no-op one that is
//! wired in when prebuilds are disabled.

pub mod claim;
pub mod error;
pub mod snapshot;
pub mod state;

#[cfg(test)]
mod test_support;

pub use claim::{ClaimRequest, Claimer, NoopClaimer, StoreClaimer};
pub use error::{PrebuildsError, PrebuildsResult};
pub use snapshot::{
    GlobalSnapshot, NoopSnapshotter, PresetKey, PresetSnapshot, StateSnapshotter, StoreSnapshotter,
};
pub use state::ReconciliationState;
