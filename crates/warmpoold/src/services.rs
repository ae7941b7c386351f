//! Mode selection: store-backed or no-op implementation per seam.

use std::sync::Arc;

use tracing::info;

use warmpool_api::ApiState;
use warmpool_metrics::MetricsCollector;
use warmpool_prebuilds::{
    Claimer, NoopClaimer, NoopSnapshotter, StateSnapshotter, StoreClaimer, StoreSnapshotter,
};
use warmpool_quota::{NoopCommitter, QuotaCommitter, StoreCommitter};
use warmpool_state::StateStore;

use crate::config::DaemonConfig;

/// The seams the HTTP layer and background tasks run against.
#[derive(Clone)]
pub struct Services {
    pub claimer: Arc<dyn Claimer>,
    pub committer: Arc<dyn QuotaCommitter>,
    pub metrics: Arc<MetricsCollector>,
    /// Whether the metrics refresher should run.
    pub prebuilds_enabled: bool,
}

impl Services {
    /// Pick implementations once, from the already-resolved config.
    pub fn build(store: &StateStore, config: &DaemonConfig) -> Self {
        let (claimer, snapshotter): (Arc<dyn Claimer>, Arc<dyn StateSnapshotter>) =
            if config.prebuilds.enabled {
                (
                    Arc::new(StoreClaimer::new(store.clone())),
                    Arc::new(StoreSnapshotter::new(store.clone())),
                )
            } else {
                (Arc::new(NoopClaimer), Arc::new(NoopSnapshotter))
            };

        let committer: Arc<dyn QuotaCommitter> = if config.quotas.enabled {
            Arc::new(StoreCommitter::new(store.clone()))
        } else {
            Arc::new(NoopCommitter)
        };

        let metrics = Arc::new(MetricsCollector::new(Arc::new(store.clone()), snapshotter));

        info!(
            prebuilds = config.prebuilds.enabled,
            quotas = config.quotas.enabled,
            "services wired"
        );

        Self {
            claimer,
            committer,
            metrics,
            prebuilds_enabled: config.prebuilds.enabled,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            claimer: Arc::clone(&self.claimer),
            committer: Arc::clone(&self.committer),
            metrics: Arc::clone(&self.metrics),
        }
    }
}
