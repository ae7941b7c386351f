//! warmpoold: the WarmPool daemon.
//!
//! Assembles the WarmPool subsystems into one process:
//! - State store (redb)
//! - Prebuild claimer and snapshotter
//! - Quota committer
//! - Metrics collector and its background refresher
//! - HTTP API
//!
//! Each feature runs its store-backed implementation when enabled in the
//! config (or forced on by a development switch) and a no-op one otherwise.

pub mod config;
pub mod serve;
pub mod services;

pub use config::DaemonConfig;
pub use services::Services;
