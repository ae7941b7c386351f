//! Reconciliation state: desired vs. actual vs. eligible per preset.

use serde::Serialize;

use warmpool_state::WorkspacePhase;

use crate::snapshot::PresetSnapshot;

/// Counts the reconciliation engine uses to decide what to create or destroy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationState {
    /// Target pool size; 0 for deleted or superseded presets.
    pub desired: u32,
    /// Prebuilds provisioning or running, ready or not.
    pub actual: u32,
    /// Subset of `actual` that can be claimed right now.
    pub eligible: u32,
    /// `actual` beyond `desired`.
    pub extraneous: u32,
    /// Prebuilds still provisioning (included in `actual`).
    pub starting: u32,
    /// Prebuilds being torn down (not included in `actual`).
    pub deleting: u32,
}

impl PresetSnapshot<'_> {
    /// Derive the preset's reconciliation state. Pure; never fails.
    ///
    /// In-flight builds count toward the target so that outstanding work is
    /// not provisioned twice.
    pub fn calculate_state(&self) -> ReconciliationState {
        let desired = if self.preset.using_active_version && !self.preset.deleted {
            self.preset.desired_instances
        } else {
            0
        };

        let mut state = ReconciliationState {
            desired,
            ..Default::default()
        };
        for prebuild in &self.prebuilds {
            if prebuild.phase.counts_toward_target() {
                state.actual += 1;
            }
            match prebuild.phase {
                WorkspacePhase::RunningEligible => state.eligible += 1,
                WorkspacePhase::Provisioning => state.starting += 1,
                WorkspacePhase::Deleting => state.deleting += 1,
                _ => {}
            }
        }
        state.extraneous = state.actual.saturating_sub(state.desired);
        state
    }
}
