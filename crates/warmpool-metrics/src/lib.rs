//! warmpool-metrics: observability for the prebuilt workspace pool.
//!
//! Keeps a cached copy of the raw prebuild metric rows and the global
//! snapshot, refreshed in the background, and turns it into labeled
//! counters and gauges on demand. Scrapes never touch the store.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── background_fetch() → update_state() every interval, bounded by a timeout
//!   ├── track_resource_replacement() / register_hard_limited_presets()
//!   │     / set_reconciliation_paused() ← reconciliation engine
//!   └── collect() → Vec<Metric> from the cached state
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod collector;
pub mod desc;
pub mod error;
pub mod prometheus;

pub use collector::{
    DEFAULT_UPDATE_INTERVAL, DEFAULT_UPDATE_TIMEOUT, MetricsCollector, MetricsState,
    PrebuildMetricsSource,
};
pub use desc::{Desc, Metric, MetricKind};
pub use error::FetchError;
pub use prometheus::render_prometheus;
