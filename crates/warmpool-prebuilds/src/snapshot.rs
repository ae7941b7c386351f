//! Global snapshot: a point-in-time view of every preset and prebuild.
//!
//! A `GlobalSnapshot` is built from one read transaction and never mutated
//! afterwards. Per-preset views are borrowed filters over it; nothing here
//! goes back to the store.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use warmpool_state::{JobStatus, PrebuildBuildRow, PrebuildRow, SnapshotRows, StateStore, TemplatePresetRow};

use crate::error::{PrebuildsError, PrebuildsResult};

/// Label triple identifying a preset in exported metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PresetKey {
    pub organization_name: String,
    pub template_name: String,
    pub preset_name: String,
}

impl PresetKey {
    pub fn new(
        organization_name: impl Into<String>,
        template_name: impl Into<String>,
        preset_name: impl Into<String>,
    ) -> Self {
        Self {
            organization_name: organization_name.into(),
            template_name: template_name.into(),
            preset_name: preset_name.into(),
        }
    }
}

impl From<&TemplatePresetRow> for PresetKey {
    fn from(preset: &TemplatePresetRow) -> Self {
        Self::new(
            preset.organization_name.clone(),
            preset.template_name.clone(),
            preset.name.clone(),
        )
    }
}

impl std::fmt::Display for PresetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.organization_name, self.template_name, self.preset_name
        )
    }
}

/// Immutable aggregate of all presets, pooled prebuilds and prebuild builds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalSnapshot {
    pub presets: Vec<TemplatePresetRow>,
    pub running_prebuilds: Vec<PrebuildRow>,
    /// Prebuild-initiated builds, newest first.
    pub build_history: Vec<PrebuildBuildRow>,
}

impl GlobalSnapshot {
    pub fn new(rows: SnapshotRows) -> Self {
        Self {
            presets: rows.presets,
            running_prebuilds: rows.prebuilds,
            build_history: rows.builds,
        }
    }

    /// Narrow the snapshot to a single preset.
    ///
    /// Prebuilds whose preset is not in the snapshot are never reachable
    /// from here; they only show up in raw metric rows.
    pub fn filter_by_preset(&self, preset_id: Uuid) -> PrebuildsResult<PresetSnapshot<'_>> {
        let preset = self
            .presets
            .iter()
            .find(|p| p.id == preset_id)
            .ok_or(PrebuildsError::PresetNotFound(preset_id))?;

        let prebuilds = self
            .running_prebuilds
            .iter()
            .filter(|p| p.preset_id == preset_id)
            .collect();

        let is_hard_limited = preset
            .failure_hard_limit
            .is_some_and(|limit| self.recent_builds_all_failed(preset_id, limit));

        Ok(PresetSnapshot {
            preset,
            prebuilds,
            is_hard_limited,
        })
    }

    /// Hard-limit flag for every preset in the snapshot, keyed by label triple.
    pub fn hard_limited_presets(&self) -> HashMap<PresetKey, bool> {
        self.presets
            .iter()
            .filter_map(|p| {
                let snapshot = self.filter_by_preset(p.id).ok()?;
                Some((PresetKey::from(p), snapshot.is_hard_limited))
            })
            .collect()
    }

    /// True when the `limit` most recent prebuild builds of the preset all failed.
    fn recent_builds_all_failed(&self, preset_id: Uuid, limit: u32) -> bool {
        if limit == 0 {
            return false;
        }
        let limit = limit as usize;
        let recent: Vec<&PrebuildBuildRow> = self
            .build_history
            .iter()
            .filter(|b| b.preset_id == preset_id)
            .take(limit)
            .collect();
        recent.len() == limit && recent.iter().all(|b| b.job_status == JobStatus::Failed)
    }
}

/// One preset's slice of a [`GlobalSnapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct PresetSnapshot<'a> {
    pub preset: &'a TemplatePresetRow,
    pub prebuilds: Vec<&'a PrebuildRow>,
    pub is_hard_limited: bool,
}

/// Source of global snapshots.
pub trait StateSnapshotter: Send + Sync {
    fn snapshot_state(&self) -> PrebuildsResult<GlobalSnapshot>;
}

/// Builds snapshots from the state store.
#[derive(Clone)]
pub struct StoreSnapshotter {
    store: StateStore,
}

impl StoreSnapshotter {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl StateSnapshotter for StoreSnapshotter {
    fn snapshot_state(&self) -> PrebuildsResult<GlobalSnapshot> {
        let rows = self.store.snapshot_rows().map_err(PrebuildsError::Snapshot)?;
        debug!(
            presets = rows.presets.len(),
            prebuilds = rows.prebuilds.len(),
            builds = rows.builds.len(),
            "global snapshot assembled"
        );
        Ok(GlobalSnapshot::new(rows))
    }
}

/// Always returns an empty snapshot; used when prebuilds are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSnapshotter;

impl StateSnapshotter for NoopSnapshotter {
    fn snapshot_state(&self) -> PrebuildsResult<GlobalSnapshot> {
        Ok(GlobalSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use warmpool_state::WorkspacePhase;

    #[test]
    fn filter_by_unknown_preset_is_not_found() {
        let snapshot = GlobalSnapshot::new(SnapshotRows {
            presets: vec![preset_row("large", 1)],
            ..Default::default()
        });
        let missing = Uuid::new_v4();

        let err = snapshot.filter_by_preset(missing).unwrap_err();
        assert!(matches!(err, PrebuildsError::PresetNotFound(id) if id == missing));
    }

    #[test]
    fn filter_by_preset_keeps_only_its_prebuilds() {
        let large = preset_row("large", 2);
        let small = preset_row("small", 1);
        let snapshot = GlobalSnapshot::new(SnapshotRows {
            prebuilds: vec![
                prebuild_row(&large, WorkspacePhase::RunningEligible, 0),
                prebuild_row(&small, WorkspacePhase::RunningEligible, 1),
                prebuild_row(&large, WorkspacePhase::Provisioning, 2),
            ],
            presets: vec![large.clone(), small],
            builds: vec![],
        });

        let view = snapshot.filter_by_preset(large.id).unwrap();
        assert_eq!(view.preset.id, large.id);
        assert_eq!(view.prebuilds.len(), 2);
        assert!(view.prebuilds.iter().all(|p| p.preset_id == large.id));
    }

    #[test]
    fn hard_limited_after_consecutive_failures() {
        let mut preset = preset_row("large", 1);
        preset.failure_hard_limit = Some(3);
        let snapshot = GlobalSnapshot::new(SnapshotRows {
            builds: vec![
                build_row(&preset, 4, JobStatus::Failed),
                build_row(&preset, 3, JobStatus::Failed),
                build_row(&preset, 2, JobStatus::Failed),
                build_row(&preset, 1, JobStatus::Succeeded),
            ],
            presets: vec![preset.clone()],
            prebuilds: vec![],
        });

        assert!(snapshot.filter_by_preset(preset.id).unwrap().is_hard_limited);
    }

    #[test]
    fn recent_success_clears_hard_limit() {
        let mut preset = preset_row("large", 1);
        preset.failure_hard_limit = Some(2);
        let snapshot = GlobalSnapshot::new(SnapshotRows {
            builds: vec![
                build_row(&preset, 3, JobStatus::Succeeded),
                build_row(&preset, 2, JobStatus::Failed),
                build_row(&preset, 1, JobStatus::Failed),
            ],
            presets: vec![preset.clone()],
            prebuilds: vec![],
        });

        assert!(!snapshot.filter_by_preset(preset.id).unwrap().is_hard_limited);
    }

    #[test]
    fn too_few_failures_or_no_limit_is_not_hard_limited() {
        let mut limited = preset_row("limited", 1);
        limited.failure_hard_limit = Some(3);
        let mut unlimited = preset_row("unlimited", 1);
        unlimited.failure_hard_limit = None;
        let mut zero = preset_row("zero", 1);
        zero.failure_hard_limit = Some(0);

        let mut builds = vec![
            build_row(&limited, 2, JobStatus::Failed),
            build_row(&limited, 1, JobStatus::Failed),
        ];
        for n in (1..=5).rev() {
            builds.push(build_row(&unlimited, n, JobStatus::Failed));
            builds.push(build_row(&zero, n, JobStatus::Failed));
        }
        let snapshot = GlobalSnapshot::new(SnapshotRows {
            presets: vec![limited.clone(), unlimited.clone(), zero.clone()],
            prebuilds: vec![],
            builds,
        });

        let flags = snapshot.hard_limited_presets();
        assert_eq!(flags.len(), 3);
        assert!(flags.values().all(|limited| !limited));
    }

    #[test]
    fn hard_limited_presets_keyed_by_labels() {
        let mut preset = preset_row("large", 1);
        preset.failure_hard_limit = Some(1);
        let snapshot = GlobalSnapshot::new(SnapshotRows {
            builds: vec![build_row(&preset, 1, JobStatus::Failed)],
            presets: vec![preset],
            prebuilds: vec![],
        });

        let flags = snapshot.hard_limited_presets();
        assert_eq!(flags.get(&PresetKey::new("acme", "docker", "large")), Some(&true));
    }

    #[test]
    fn store_snapshotter_reads_store_rows() {
        let f = StoreFixture::new(2);
        f.add_prebuild(WorkspacePhase::RunningEligible, 0);

        let snapshot = StoreSnapshotter::new(f.store.clone()).snapshot_state().unwrap();
        assert_eq!(snapshot.presets.len(), 1);
        assert_eq!(snapshot.running_prebuilds.len(), 1);
    }

    #[test]
    fn noop_snapshotter_is_empty() {
        let snapshot = NoopSnapshotter.snapshot_state().unwrap();
        assert_eq!(snapshot, GlobalSnapshot::default());
    }
}
