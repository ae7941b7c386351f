//! Domain types for the WarmPool state store.
//!
//! These types represent the persisted state of templates, presets,
//! workspaces, builds and quota groups, along with the flattened rows
//! returned by the store's multi-table queries. All persisted types are
//! serializable to/from JSON for storage in redb tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The reserved user that owns every prebuilt workspace until it is claimed.
pub const PREBUILDS_SYSTEM_USER_ID: Uuid = Uuid::from_u128(0xc42f_df75_3097_471c_8c33_fb52_454d_81c0);

// ── Template ──────────────────────────────────────────────────────

/// A workspace template and the version new workspaces are built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateRow {
    pub id: Uuid,
    pub name: String,
    pub organization_id: Uuid,
    pub organization_name: String,
    /// Version that presets must be bound to in order to be reconciled.
    pub active_version_id: Uuid,
}

// ── Preset ────────────────────────────────────────────────────────

/// A template + parameter-set combination that prebuilds are created for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresetRow {
    pub id: Uuid,
    pub template_id: Uuid,
    pub template_version_id: Uuid,
    pub name: String,
    /// Target pool size.
    pub desired_instances: u32,
    /// Consecutive failed prebuild builds after which creation halts.
    pub failure_hard_limit: Option<u32>,
    /// Soft-deleted presets keep their history but are wound down.
    pub deleted: bool,
}

// ── Workspace ─────────────────────────────────────────────────────

/// Lifecycle phase of a workspace, as reported by the provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspacePhase {
    Provisioning,
    RunningNotReady,
    RunningEligible,
    Claimed,
    Failed,
    Deleting,
}

impl WorkspacePhase {
    /// Phases that count toward a preset's desired instance count.
    pub fn counts_toward_target(self) -> bool {
        matches!(
            self,
            WorkspacePhase::Provisioning
                | WorkspacePhase::RunningNotReady
                | WorkspacePhase::RunningEligible
        )
    }
}

/// A workspace; prebuilt when owned by [`PREBUILDS_SYSTEM_USER_ID`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub organization_id: Uuid,
    pub template_id: Uuid,
    pub preset_id: Option<Uuid>,
    pub name: String,
    pub phase: WorkspacePhase,
    pub autostart_schedule: Option<String>,
    pub next_start_at: Option<DateTime<Utc>>,
    /// Time-to-live in milliseconds.
    pub ttl_ms: Option<i64>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkspaceRow {
    /// Whether the workspace still belongs to the prebuild pool.
    pub fn is_prebuild(&self) -> bool {
        self.owner_id == PREBUILDS_SYSTEM_USER_ID
    }
}

// ── Build ─────────────────────────────────────────────────────────

/// Status of the provisioner job behind a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

/// One build of a workspace. Build numbers start at 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceBuildRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub build_number: u32,
    pub initiator_id: Uuid,
    pub daily_cost: i32,
    pub job_status: JobStatus,
    pub created_at: DateTime<Utc>,
}

// ── Quota group ───────────────────────────────────────────────────

/// A group contributing quota allowance to its members.
///
/// The group whose id equals its organization id is the organization's
/// "everyone" group and applies to all users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub quota_allowance: i64,
    pub members: Vec<Uuid>,
}

impl GroupRow {
    pub fn is_everyone_group(&self) -> bool {
        self.id == self.organization_id
    }

    pub fn applies_to(&self, user_id: Uuid) -> bool {
        self.is_everyone_group() || self.members.contains(&user_id)
    }
}

// ── Query rows ────────────────────────────────────────────────────

/// A preset joined with its template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplatePresetRow {
    pub id: Uuid,
    pub name: String,
    pub template_id: Uuid,
    pub template_name: String,
    pub template_version_id: Uuid,
    pub organization_id: Uuid,
    pub organization_name: String,
    pub desired_instances: u32,
    pub failure_hard_limit: Option<u32>,
    pub using_active_version: bool,
    pub deleted: bool,
}

/// A non-deleted workspace still owned by the prebuild pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrebuildRow {
    pub workspace_id: Uuid,
    pub preset_id: Uuid,
    pub template_id: Uuid,
    pub phase: WorkspacePhase,
    pub created_at: DateTime<Utc>,
}

/// A build initiated by the prebuilds user, attributed to its preset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrebuildBuildRow {
    pub preset_id: Uuid,
    pub workspace_id: Uuid,
    pub build_number: u32,
    pub job_status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// Everything the global snapshot is assembled from, read in one transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotRows {
    pub presets: Vec<TemplatePresetRow>,
    pub prebuilds: Vec<PrebuildRow>,
    /// Newest first.
    pub builds: Vec<PrebuildBuildRow>,
}

/// Lifetime prebuild counters for one template/preset/organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrebuildMetricsRow {
    pub template_name: String,
    pub preset_name: String,
    pub organization_name: String,
    pub created_count: u64,
    pub failed_count: u64,
    pub claimed_count: u64,
}

/// Values written onto a prebuilt workspace when it is claimed.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimPrebuildParams {
    pub new_user_id: Uuid,
    pub new_name: String,
    pub now: DateTime<Utc>,
    pub preset_id: Uuid,
    pub autostart_schedule: Option<String>,
    pub next_start_at: Option<DateTime<Utc>>,
    pub ttl_ms: Option<i64>,
}

impl WorkspaceBuildRow {
    /// Build the composite key for the builds table.
    pub fn table_key(&self) -> String {
        build_key(self.workspace_id, self.build_number)
    }
}

/// Composite key for a build; zero padding keeps builds in build order.
pub fn build_key(workspace_id: Uuid, build_number: u32) -> String {
    format!("{workspace_id}:{build_number:010}")
}
