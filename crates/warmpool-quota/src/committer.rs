//! Quota committers: the build-start admission gate.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use warmpool_state::{StateError, StateStore};

use crate::error::{QuotaError, QuotaResult};

/// A build asking to start at the given daily cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitQuotaRequest {
    pub build_id: String,
    pub daily_cost: i32,
}

/// The admission decision and the figures it was based on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitQuotaResponse {
    pub ok: bool,
    /// Consumption before this build.
    pub credits_consumed: i64,
    pub budget: i64,
    /// Echo of the requested daily cost, admitted or not.
    pub daily_cost_increase: i32,
}

/// Decides whether a workspace build may start.
pub trait QuotaCommitter: Send + Sync {
    fn commit_quota(&self, request: &CommitQuotaRequest) -> QuotaResult<CommitQuotaResponse>;
}

/// Enforces per-user, per-organization budgets from the state store.
#[derive(Clone)]
pub struct StoreCommitter {
    store: StateStore,
}

impl StoreCommitter {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl QuotaCommitter for StoreCommitter {
    fn commit_quota(&self, request: &CommitQuotaRequest) -> QuotaResult<CommitQuotaResponse> {
        let build_id = Uuid::parse_str(&request.build_id)
            .map_err(|e| QuotaError::Validation(format!("build id {:?}: {e}", request.build_id)))?;
        if request.daily_cost < 0 {
            return Err(QuotaError::Validation(format!(
                "daily cost must not be negative, got {}",
                request.daily_cost
            )));
        }
        let daily_cost = request.daily_cost;

        let (consumed, budget, permit) = self.store.in_tx(|tx| -> QuotaResult<(i64, i64, bool)> {
            let build = tx
                .workspace_build_by_id(build_id)?
                .ok_or_else(|| StateError::NotFound(format!("build {build_id}")))?;
            let workspace = tx
                .workspace_by_id(build.workspace_id)?
                .ok_or_else(|| StateError::NotFound(format!("workspace {}", build.workspace_id)))?;

            let consumed = tx.quota_consumed_for_user(workspace.owner_id, workspace.organization_id)?;
            let budget = tx.quota_allowance_for_user(workspace.owner_id, workspace.organization_id)?;

            // Without a previous build there is nothing to net against.
            let mut net_increase = true;
            let previous = match build.build_number.checked_sub(1) {
                Some(number) if number > 0 => tx.workspace_build_by_number(workspace.id, number)?,
                _ => None,
            };
            if let Some(prev) = previous {
                net_increase = daily_cost >= prev.daily_cost;
                debug!(
                    prev_cost = prev.daily_cost,
                    next_cost = daily_cost,
                    net_increase,
                    "previous build cost"
                );
            }

            let new_consumed = consumed + i64::from(daily_cost);
            if new_consumed > budget && net_increase {
                debug!(
                    prev_consumed = consumed,
                    next_consumed = new_consumed,
                    budget,
                    "over quota, rejecting"
                );
                return Ok((consumed, budget, false));
            }

            Ok((consumed, budget, true))
        })?;

        Ok(CommitQuotaResponse {
            ok: permit,
            credits_consumed: consumed,
            budget,
            daily_cost_increase: daily_cost,
        })
    }
}

/// Admits every build; used when quotas are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCommitter;

impl QuotaCommitter for NoopCommitter {
    fn commit_quota(&self, request: &CommitQuotaRequest) -> QuotaResult<CommitQuotaResponse> {
        Ok(CommitQuotaResponse {
            ok: true,
            credits_consumed: 0,
            budget: 0,
            daily_cost_increase: request.daily_cost,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use warmpool_state::*;

    struct Ledger {
        store: StateStore,
        org: Uuid,
        owner: Uuid,
        template: Uuid,
    }

    /// An owner with `budget` allowance and other workspaces costing `consumed`.
    fn ledger(consumed: i32, budget: i64) -> Ledger {
        let store = StateStore::open_in_memory().unwrap();
        let org = Uuid::new_v4();
        let owner = Uuid::new_v4();
        store
            .put_group(&GroupRow {
                id: org,
                organization_id: org,
                quota_allowance: budget,
                members: vec![],
            })
            .unwrap();
        let l = Ledger {
            store,
            org,
            owner,
            template: Uuid::new_v4(),
        };
        let other = l.workspace();
        l.build(&other, 1, consumed);
        l
    }

    impl Ledger {
        fn workspace(&self) -> WorkspaceRow {
            let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
            let ws = WorkspaceRow {
                id: Uuid::new_v4(),
                owner_id: self.owner,
                organization_id: self.org,
                template_id: self.template,
                preset_id: None,
                name: "ws".to_string(),
                phase: WorkspacePhase::RunningEligible,
                autostart_schedule: None,
                next_start_at: None,
                ttl_ms: None,
                deleted: false,
                created_at: now,
                updated_at: now,
            };
            self.store.put_workspace(&ws).unwrap();
            ws
        }

        fn build(&self, ws: &WorkspaceRow, number: u32, cost: i32) -> WorkspaceBuildRow {
            let build = WorkspaceBuildRow {
                id: Uuid::new_v4(),
                workspace_id: ws.id,
                build_number: number,
                initiator_id: self.owner,
                daily_cost: cost,
                job_status: JobStatus::Pending,
                created_at: ws.created_at,
            };
            self.store.put_build(&build).unwrap();
            build
        }

        fn commit(&self, build: &WorkspaceBuildRow, daily_cost: i32) -> QuotaResult<CommitQuotaResponse> {
            StoreCommitter::new(self.store.clone()).commit_quota(&CommitQuotaRequest {
                build_id: build.id.to_string(),
                daily_cost,
            })
        }
    }

    #[test]
    fn first_build_over_budget_is_rejected() {
        let l = ledger(80, 100);
        let ws = l.workspace();
        let first = l.build(&ws, 1, 0);

        let resp = l.commit(&first, 30).unwrap();
        assert_eq!(
            resp,
            CommitQuotaResponse {
                ok: false,
                credits_consumed: 80,
                budget: 100,
                daily_cost_increase: 30,
            }
        );
    }

    #[test]
    fn cheaper_rebuild_is_admitted_over_budget() {
        let l = ledger(80, 100);
        let ws = l.workspace();
        l.build(&ws, 1, 40);
        let second = l.build(&ws, 2, 0);

        let resp = l.commit(&second, 30).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.credits_consumed, 80);
        assert_eq!(resp.budget, 100);
        assert_eq!(resp.daily_cost_increase, 30);
    }

    #[test]
    fn exactly_at_budget_is_admitted() {
        let l = ledger(70, 100);
        let ws = l.workspace();
        let first = l.build(&ws, 1, 0);

        assert!(l.commit(&first, 30).unwrap().ok);
    }

    #[test]
    fn equal_cost_rebuild_counts_as_increase() {
        let l = ledger(80, 100);
        let ws = l.workspace();
        l.build(&ws, 1, 30);
        let second = l.build(&ws, 2, 0);

        assert!(!l.commit(&second, 30).unwrap().ok);
    }

    #[test]
    fn more_expensive_rebuild_within_budget_is_admitted() {
        let l = ledger(10, 100);
        let ws = l.workspace();
        l.build(&ws, 1, 20);
        let second = l.build(&ws, 2, 0);

        let resp = l.commit(&second, 50).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.credits_consumed, 10);
    }

    #[test]
    fn skipped_build_number_is_treated_as_first() {
        let l = ledger(80, 100);
        let ws = l.workspace();
        l.build(&ws, 1, 90);
        let third = l.build(&ws, 3, 0);

        // No build 2 to net against.
        assert!(!l.commit(&third, 30).unwrap().ok);
    }

    #[test]
    fn malformed_build_id_is_validation_error() {
        let l = ledger(0, 100);
        let err = StoreCommitter::new(l.store.clone())
            .commit_quota(&CommitQuotaRequest {
                build_id: "not-a-uuid".to_string(),
                daily_cost: 1,
            })
            .unwrap_err();
        assert!(matches!(err, QuotaError::Validation(_)));
    }

    #[test]
    fn negative_cost_is_validation_error() {
        let l = ledger(0, 100);
        let ws = l.workspace();
        let first = l.build(&ws, 1, 0);
        assert!(matches!(l.commit(&first, -5), Err(QuotaError::Validation(_))));
    }

    #[test]
    fn unknown_build_is_store_not_found() {
        let l = ledger(0, 100);
        let err = StoreCommitter::new(l.store.clone())
            .commit_quota(&CommitQuotaRequest {
                build_id: Uuid::new_v4().to_string(),
                daily_cost: 1,
            })
            .unwrap_err();
        assert!(matches!(err, QuotaError::Store(e) if e.is_not_found()));
    }

    #[test]
    fn commit_does_not_write_cost() {
        let l = ledger(0, 100);
        let ws = l.workspace();
        let first = l.build(&ws, 1, 0);

        assert!(l.commit(&first, 25).unwrap().ok);
        assert_eq!(l.store.get_build(first.id).unwrap().unwrap().daily_cost, 0);
    }

    #[test]
    fn noop_committer_admits_everything() {
        let resp = NoopCommitter
            .commit_quota(&CommitQuotaRequest {
                build_id: "anything".to_string(),
                daily_cost: 1_000,
            })
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.daily_cost_increase, 1_000);
    }
}
