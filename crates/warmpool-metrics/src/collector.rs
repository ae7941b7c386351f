//! Metrics collector: cached prebuild pool state for scrapes.
//!
//! Building the state needs a full store scan, so it is done on a timer by
//! [`MetricsCollector::background_fetch`] and the result is swapped in whole.
//! Scrapes only read the last cached value. A failed or timed-out refresh
//! keeps the previous value. A fetch that outlives its timeout keeps
//! running on the blocking pool, and no new fetch starts until it ends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use warmpool_prebuilds::{GlobalSnapshot, PresetKey, StateSnapshotter};
use warmpool_state::{PrebuildMetricsRow, StateResult, StateStore};

use crate::desc::{self, Desc, Metric};
use crate::error::FetchError;

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

type FetchHandle = JoinHandle<Result<MetricsState, FetchError>>;

/// Source of the raw per-preset counter rows.
pub trait PrebuildMetricsSource: Send + Sync {
    fn prebuild_metrics(&self) -> StateResult<Vec<PrebuildMetricsRow>>;
}

impl PrebuildMetricsSource for StateStore {
    fn prebuild_metrics(&self) -> StateResult<Vec<PrebuildMetricsRow>> {
        StateStore::prebuild_metrics(self)
    }
}

/// Everything one refresh produced. Replaced as a unit, never edited.
#[derive(Debug, Clone)]
pub struct MetricsState {
    pub prebuild_metrics: Vec<PrebuildMetricsRow>,
    pub snapshot: GlobalSnapshot,
    pub created_at: DateTime<Utc>,
}

pub struct MetricsCollector {
    metrics_source: Arc<dyn PrebuildMetricsSource>,
    snapshotter: Arc<dyn StateSnapshotter>,
    latest_state: RwLock<Option<Arc<MetricsState>>>,
    /// A fetch abandoned by its timeout that may still be scanning the store.
    abandoned_fetch: Mutex<Option<FetchHandle>>,
    /// Resource replacements observed at claim time, per preset.
    replacements: Mutex<BTreeMap<PresetKey, u64>>,
    /// Hard-limit flags as last registered by the reconciliation engine.
    hard_limited: Mutex<HashMap<PresetKey, bool>>,
    reconciliation_paused: AtomicBool,
    refresh_failures: AtomicU64,
}

impl MetricsCollector {
    pub fn new(
        metrics_source: Arc<dyn PrebuildMetricsSource>,
        snapshotter: Arc<dyn StateSnapshotter>,
    ) -> Self {
        Self {
            metrics_source,
            snapshotter,
            latest_state: RwLock::new(None),
            abandoned_fetch: Mutex::new(None),
            replacements: Mutex::new(BTreeMap::new()),
            hard_limited: Mutex::new(HashMap::new()),
            reconciliation_paused: AtomicBool::new(false),
            refresh_failures: AtomicU64::new(0),
        }
    }

    /// Every metric family this collector can emit.
    pub fn describe(&self) -> Vec<&'static Desc> {
        desc::ALL.to_vec()
    }

    /// The cached state, if a refresh has ever succeeded.
    pub fn state(&self) -> Option<Arc<MetricsState>> {
        self.latest_state.read().clone()
    }

    /// Fetch fresh metric rows and a snapshot, then swap them in.
    ///
    /// The store calls run on the blocking pool. On error or timeout the
    /// cached state is left untouched. While a timed-out fetch is still
    /// running this fails with [`FetchError::InFlight`] without touching the
    /// store. A result is only stored if this future runs to completion.
    pub async fn update_state(&self, timeout: Duration) -> Result<(), FetchError> {
        {
            let mut abandoned = self.abandoned_fetch.lock();
            if abandoned.as_ref().is_some_and(|h| !h.is_finished()) {
                return Err(FetchError::InFlight);
            }
            *abandoned = None;
        }

        let start = Instant::now();
        let source = Arc::clone(&self.metrics_source);
        let snapshotter = Arc::clone(&self.snapshotter);

        let mut fetch = tokio::task::spawn_blocking(move || -> Result<MetricsState, FetchError> {
            let prebuild_metrics = source.prebuild_metrics().map_err(FetchError::Query)?;
            let snapshot = snapshotter.snapshot_state().map_err(FetchError::Snapshot)?;
            Ok(MetricsState {
                prebuild_metrics,
                snapshot,
                created_at: Utc::now(),
            })
        });

        let state = match tokio::time::timeout(timeout, &mut fetch).await {
            Err(_) => {
                *self.abandoned_fetch.lock() = Some(fetch);
                return Err(FetchError::Timeout(timeout));
            }
            Ok(Err(join)) => return Err(FetchError::Join(join.to_string())),
            Ok(Ok(result)) => result?,
        };

        debug!(
            duration_secs = start.elapsed().as_secs_f64(),
            rows = state.prebuild_metrics.len(),
            presets = state.snapshot.presets.len(),
            "fetched prebuilds metrics state"
        );
        *self.latest_state.write() = Some(Arc::new(state));
        Ok(())
    }

    /// Refresh once immediately, then every `interval`, until shutdown.
    ///
    /// Failures are logged and counted; they never end the loop. Shutdown
    /// also abandons a refresh in progress, which then stores nothing. A
    /// zero `interval` falls back to [`DEFAULT_UPDATE_INTERVAL`].
    pub async fn background_fetch(
        &self,
        interval: Duration,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = if interval.is_zero() {
            warn!(
                default_secs = DEFAULT_UPDATE_INTERVAL.as_secs(),
                "zero metrics refresh interval, using default"
            );
            DEFAULT_UPDATE_INTERVAL
        } else {
            interval
        };
        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = timeout.as_secs(),
            "prebuilds metrics refresher started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                result = self.update_state(timeout) => match result {
                    Ok(()) => {}
                    Err(e @ FetchError::InFlight) => {
                        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "skipping prebuilds metrics refresh");
                    }
                    Err(e) => {
                        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                        error!(error = %e, "failed to update prebuilds metrics state");
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("prebuilds metrics refresher shutting down");
    }

    /// Number of refreshes that failed or were skipped since start.
    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failures.load(Ordering::Relaxed)
    }

    /// Count one claim whose resources had to be replaced.
    pub fn track_resource_replacement(
        &self,
        organization_name: &str,
        template_name: &str,
        preset_name: &str,
    ) {
        let key = PresetKey::new(organization_name, template_name, preset_name);
        // Only that a replacement happened matters, not how many resources.
        *self.replacements.lock().entry(key).or_insert(0) += 1;
    }

    /// Replace the hard-limit flags wholesale.
    pub fn register_hard_limited_presets(&self, flags: HashMap<PresetKey, bool>) {
        *self.hard_limited.lock() = flags;
    }

    pub fn set_reconciliation_paused(&self, paused: bool) {
        self.reconciliation_paused.store(paused, Ordering::Relaxed);
    }

    /// Produce every current sample from the cached state.
    ///
    /// Never blocks on the store and never fails. Before the first
    /// successful refresh only the paused gauge and a zero last-updated
    /// gauge are reported.
    pub fn collect(&self) -> Vec<Metric> {
        let mut out = Vec::new();

        let paused = if self.reconciliation_paused.load(Ordering::Relaxed) {
            1.0
        } else {
            0.0
        };
        out.push(Metric::unlabeled(&desc::RECONCILIATION_PAUSED, paused));

        let Some(state) = self.state() else {
            warn!("prebuilds metrics requested before the first successful refresh");
            out.push(Metric::unlabeled(&desc::METRICS_LAST_UPDATED, 0.0));
            return out;
        };

        // Raw rows keep history for presets that are deleted or superseded.
        for row in &state.prebuild_metrics {
            let key = PresetKey::new(
                row.organization_name.clone(),
                row.template_name.clone(),
                row.preset_name.clone(),
            );
            out.push(Metric::for_preset(&desc::CREATED_TOTAL, key.clone(), row.created_count as f64));
            out.push(Metric::for_preset(&desc::FAILED_TOTAL, key.clone(), row.failed_count as f64));
            out.push(Metric::for_preset(&desc::CLAIMED_TOTAL, key, row.claimed_count as f64));
        }

        for (key, count) in self.replacements.lock().iter() {
            out.push(Metric::for_preset(
                &desc::RESOURCE_REPLACEMENTS_TOTAL,
                key.clone(),
                *count as f64,
            ));
        }

        for preset in &state.snapshot.presets {
            if !preset.using_active_version || preset.deleted {
                continue;
            }
            let view = match state.snapshot.filter_by_preset(preset.id) {
                Ok(view) => view,
                Err(e) => {
                    error!(error = %e, preset_id = %preset.id, "failed to filter by preset");
                    continue;
                }
            };
            let rs = view.calculate_state();
            let key = PresetKey::from(preset);
            out.push(Metric::for_preset(&desc::DESIRED, key.clone(), f64::from(rs.desired)));
            out.push(Metric::for_preset(&desc::RUNNING, key.clone(), f64::from(rs.actual)));
            out.push(Metric::for_preset(&desc::ELIGIBLE, key, f64::from(rs.eligible)));
        }

        let mut limited: Vec<(PresetKey, bool)> = self
            .hard_limited
            .lock()
            .iter()
            .map(|(key, limited)| (key.clone(), *limited))
            .collect();
        limited.sort();
        for (key, limited) in limited {
            let value = if limited { 1.0 } else { 0.0 };
            out.push(Metric::for_preset(&desc::PRESET_HARD_LIMITED, key, value));
        }

        out.push(Metric::unlabeled(
            &desc::METRICS_LAST_UPDATED,
            state.created_at.timestamp() as f64,
        ));
        out
    }
}
