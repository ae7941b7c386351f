//! warmpool-state: embedded state store for WarmPool.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for templates, presets, workspaces, workspace builds and quota
//! groups, plus the handful of multi-row queries the prebuild pool is built
//! on (snapshot rows, prebuild claiming, quota reads, raw metric rows).
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Builds use the composite key `{workspace_id}:{build_number:010}` so that a
//! workspace's builds sort in build order.
//!
//! redb admits one write transaction at a time. Every operation that has to
//! read and then decide (claiming, quota admission) runs inside a single
//! write transaction, which makes it serializable against every other writer.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks and threads.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{QuotaTx, StateStore};
pub use types::*;
