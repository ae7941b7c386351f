//! StateStore: redb-backed state persistence for WarmPool.
//!
//! Provides typed CRUD operations over templates, presets, workspaces,
//! builds and groups, and the transactional queries the prebuild pool and
//! the quota gate rely on. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableHandle, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(row: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(row).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Deserialize every row of a table, in key order.
fn scan<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<Vec<T>> {
    let mut rows = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        rows.push(decode(value.value())?);
    }
    Ok(rows)
}

fn lookup<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [TEMPLATES, PRESETS, WORKSPACES, BUILDS, GROUPS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_row<T: Serialize>(&self, def: JsonTable, key: &str, row: &T) -> StateResult<()> {
        let value = encode(row)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_row<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        lookup(&table, key)
    }

    fn list_rows<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        scan(&table)
    }

    /// Read-modify-write a single row inside one write transaction.
    fn update_row<T, F>(&self, def: JsonTable, key: &str, apply: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            match lookup::<T>(&table, key)? {
                Some(mut row) => {
                    apply(&mut row);
                    table
                        .insert(key, encode(&row)?.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(row)
                }
                None => None,
            }
        };
        match updated {
            Some(row) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(row)
            }
            None => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(StateError::NotFound(format!("{}/{key}", def.name())))
            }
        }
    }

    // ── Templates ──────────────────────────────────────────────────

    /// Insert or update a template.
    pub fn put_template(&self, template: &TemplateRow) -> StateResult<()> {
        self.put_row(TEMPLATES, &template.id.to_string(), template)?;
        debug!(template_id = %template.id, "template stored");
        Ok(())
    }

    pub fn get_template(&self, id: Uuid) -> StateResult<Option<TemplateRow>> {
        self.get_row(TEMPLATES, &id.to_string())
    }

    pub fn list_templates(&self) -> StateResult<Vec<TemplateRow>> {
        self.list_rows(TEMPLATES)
    }

    // ── Presets ────────────────────────────────────────────────────

    /// Insert or update a preset.
    pub fn put_preset(&self, preset: &PresetRow) -> StateResult<()> {
        self.put_row(PRESETS, &preset.id.to_string(), preset)?;
        debug!(preset_id = %preset.id, "preset stored");
        Ok(())
    }

    pub fn get_preset(&self, id: Uuid) -> StateResult<Option<PresetRow>> {
        self.get_row(PRESETS, &id.to_string())
    }

    pub fn list_presets(&self) -> StateResult<Vec<PresetRow>> {
        self.list_rows(PRESETS)
    }

    // ── Workspaces ─────────────────────────────────────────────────

    /// Insert or update a workspace.
    pub fn put_workspace(&self, workspace: &WorkspaceRow) -> StateResult<()> {
        self.put_row(WORKSPACES, &workspace.id.to_string(), workspace)
    }

    pub fn get_workspace(&self, id: Uuid) -> StateResult<Option<WorkspaceRow>> {
        self.get_row(WORKSPACES, &id.to_string())
    }

    pub fn list_workspaces(&self) -> StateResult<Vec<WorkspaceRow>> {
        self.list_rows(WORKSPACES)
    }

    /// Move a workspace to a new lifecycle phase (provisioner callback).
    pub fn set_workspace_phase(
        &self,
        id: Uuid,
        phase: WorkspacePhase,
        now: DateTime<Utc>,
    ) -> StateResult<WorkspaceRow> {
        let row = self.update_row(WORKSPACES, &id.to_string(), |ws: &mut WorkspaceRow| {
            ws.phase = phase;
            ws.updated_at = now;
        })?;
        debug!(workspace_id = %id, ?phase, "workspace phase updated");
        Ok(row)
    }

    /// Soft-delete a workspace. Its builds are kept for accounting.
    pub fn mark_workspace_deleted(&self, id: Uuid, now: DateTime<Utc>) -> StateResult<WorkspaceRow> {
        self.update_row(WORKSPACES, &id.to_string(), |ws: &mut WorkspaceRow| {
            ws.deleted = true;
            ws.updated_at = now;
        })
    }

    // ── Builds ─────────────────────────────────────────────────────

    /// Insert or update a workspace build.
    pub fn put_build(&self, build: &WorkspaceBuildRow) -> StateResult<()> {
        self.put_row(BUILDS, &build.table_key(), build)
    }

    /// All builds of a workspace, in build order.
    pub fn list_builds_for_workspace(&self, workspace_id: Uuid) -> StateResult<Vec<WorkspaceBuildRow>> {
        let prefix = format!("{workspace_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BUILDS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    /// Get a build by its id.
    pub fn get_build(&self, build_id: Uuid) -> StateResult<Option<WorkspaceBuildRow>> {
        let builds: Vec<WorkspaceBuildRow> = self.list_rows(BUILDS)?;
        Ok(builds.into_iter().find(|b| b.id == build_id))
    }

    /// Persist the daily cost of an admitted build.
    pub fn set_build_daily_cost(&self, build_id: Uuid, daily_cost: i32) -> StateResult<WorkspaceBuildRow> {
        let build = self
            .get_build(build_id)?
            .ok_or_else(|| StateError::NotFound(format!("build {build_id}")))?;
        self.update_row(BUILDS, &build.table_key(), |b: &mut WorkspaceBuildRow| {
            b.daily_cost = daily_cost;
        })
    }

    // ── Groups ─────────────────────────────────────────────────────

    /// Insert or update a quota group.
    pub fn put_group(&self, group: &GroupRow) -> StateResult<()> {
        self.put_row(GROUPS, &group.id.to_string(), group)
    }

    pub fn list_groups(&self) -> StateResult<Vec<GroupRow>> {
        self.list_rows(GROUPS)
    }

    // ── Prebuild queries ───────────────────────────────────────────

    /// Read presets, pooled prebuilds and prebuild build history in one
    /// read transaction, so the result is a single point in time.
    pub fn snapshot_rows(&self) -> StateResult<SnapshotRows> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let templates: Vec<TemplateRow> =
            scan(&txn.open_table(TEMPLATES).map_err(map_err!(Table))?)?;
        let presets: Vec<PresetRow> = scan(&txn.open_table(PRESETS).map_err(map_err!(Table))?)?;
        let workspaces: Vec<WorkspaceRow> =
            scan(&txn.open_table(WORKSPACES).map_err(map_err!(Table))?)?;
        let builds: Vec<WorkspaceBuildRow> =
            scan(&txn.open_table(BUILDS).map_err(map_err!(Table))?)?;

        let templates: HashMap<Uuid, TemplateRow> =
            templates.into_iter().map(|t| (t.id, t)).collect();

        let mut preset_rows = Vec::with_capacity(presets.len());
        for preset in presets {
            let Some(template) = templates.get(&preset.template_id) else {
                debug!(preset_id = %preset.id, "preset without template skipped");
                continue;
            };
            preset_rows.push(TemplatePresetRow {
                id: preset.id,
                name: preset.name,
                template_id: template.id,
                template_name: template.name.clone(),
                template_version_id: preset.template_version_id,
                organization_id: template.organization_id,
                organization_name: template.organization_name.clone(),
                desired_instances: preset.desired_instances,
                failure_hard_limit: preset.failure_hard_limit,
                using_active_version: preset.template_version_id == template.active_version_id,
                deleted: preset.deleted,
            });
        }

        let workspace_presets: HashMap<Uuid, Uuid> = workspaces
            .iter()
            .filter_map(|ws| ws.preset_id.map(|p| (ws.id, p)))
            .collect();

        let prebuilds = workspaces
            .iter()
            .filter(|ws| ws.is_prebuild() && !ws.deleted)
            .filter_map(|ws| {
                Some(PrebuildRow {
                    workspace_id: ws.id,
                    preset_id: ws.preset_id?,
                    template_id: ws.template_id,
                    phase: ws.phase,
                    created_at: ws.created_at,
                })
            })
            .collect();

        let mut prebuild_builds: Vec<PrebuildBuildRow> = builds
            .into_iter()
            .filter(|b| b.initiator_id == PREBUILDS_SYSTEM_USER_ID)
            .filter_map(|b| {
                Some(PrebuildBuildRow {
                    preset_id: *workspace_presets.get(&b.workspace_id)?,
                    workspace_id: b.workspace_id,
                    build_number: b.build_number,
                    job_status: b.job_status,
                    created_at: b.created_at,
                })
            })
            .collect();
        prebuild_builds.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.build_number.cmp(&a.build_number))
        });

        Ok(SnapshotRows {
            presets: preset_rows,
            prebuilds,
            builds: prebuild_builds,
        })
    }

    /// Hand the oldest running-eligible prebuild of a preset to a user.
    ///
    /// Runs in one write transaction; redb serializes writers, so concurrent
    /// callers can never be handed the same workspace. Returns
    /// [`StateError::NotFound`] when the preset has no eligible prebuild.
    pub fn claim_prebuilt_workspace(&self, params: &ClaimPrebuildParams) -> StateResult<WorkspaceRow> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed = {
            let mut table = txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
            let workspaces: Vec<WorkspaceRow> = scan(&table)?;
            let candidate = workspaces
                .into_iter()
                .filter(|ws| {
                    ws.is_prebuild()
                        && !ws.deleted
                        && ws.preset_id == Some(params.preset_id)
                        && ws.phase == WorkspacePhase::RunningEligible
                })
                .min_by_key(|ws| (ws.created_at, ws.id));

            match candidate {
                Some(mut ws) => {
                    ws.owner_id = params.new_user_id;
                    ws.name = params.new_name.clone();
                    ws.autostart_schedule = params.autostart_schedule.clone();
                    ws.next_start_at = params.next_start_at;
                    ws.ttl_ms = params.ttl_ms;
                    ws.phase = WorkspacePhase::Claimed;
                    ws.updated_at = params.now;
                    table
                        .insert(ws.id.to_string().as_str(), encode(&ws)?.as_slice())
                        .map_err(map_err!(Write))?;
                    Some(ws)
                }
                None => None,
            }
        };

        match claimed {
            Some(ws) => {
                txn.commit().map_err(map_err!(Transaction))?;
                debug!(workspace_id = %ws.id, preset_id = %params.preset_id, "prebuild claimed");
                Ok(ws)
            }
            None => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(StateError::NotFound(format!(
                    "claimable prebuild for preset {}",
                    params.preset_id
                )))
            }
        }
    }

    /// Lifetime created/failed/claimed counts per template, preset and
    /// organization. Includes presets that are deleted, superseded or gone.
    pub fn prebuild_metrics(&self) -> StateResult<Vec<PrebuildMetricsRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let templates: Vec<TemplateRow> =
            scan(&txn.open_table(TEMPLATES).map_err(map_err!(Table))?)?;
        let presets: Vec<PresetRow> = scan(&txn.open_table(PRESETS).map_err(map_err!(Table))?)?;
        let workspaces: Vec<WorkspaceRow> =
            scan(&txn.open_table(WORKSPACES).map_err(map_err!(Table))?)?;
        let builds: Vec<WorkspaceBuildRow> =
            scan(&txn.open_table(BUILDS).map_err(map_err!(Table))?)?;

        let templates: HashMap<Uuid, TemplateRow> =
            templates.into_iter().map(|t| (t.id, t)).collect();
        let presets: HashMap<Uuid, PresetRow> = presets.into_iter().map(|p| (p.id, p)).collect();
        let first_builds: HashMap<Uuid, WorkspaceBuildRow> = builds
            .into_iter()
            .filter(|b| b.build_number == 1)
            .map(|b| (b.workspace_id, b))
            .collect();

        let mut counters: BTreeMap<(String, String, String), (u64, u64, u64)> = BTreeMap::new();
        for ws in &workspaces {
            let Some(preset_id) = ws.preset_id else {
                continue;
            };
            let Some(first) = first_builds.get(&ws.id) else {
                continue;
            };
            if first.initiator_id != PREBUILDS_SYSTEM_USER_ID {
                continue;
            }

            let template = templates.get(&ws.template_id);
            let template_name = template
                .map(|t| t.name.clone())
                .unwrap_or_else(|| ws.template_id.to_string());
            let organization_name = template
                .map(|t| t.organization_name.clone())
                .unwrap_or_else(|| ws.organization_id.to_string());
            let preset_name = presets
                .get(&preset_id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| preset_id.to_string());

            let entry = counters
                .entry((template_name, preset_name, organization_name))
                .or_default();
            entry.0 += 1;
            if first.job_status == JobStatus::Failed {
                entry.1 += 1;
            }
            if !ws.is_prebuild() {
                entry.2 += 1;
            }
        }

        Ok(counters
            .into_iter()
            .map(
                |((template_name, preset_name, organization_name), (created, failed, claimed))| {
                    PrebuildMetricsRow {
                        template_name,
                        preset_name,
                        organization_name,
                        created_count: created,
                        failed_count: failed,
                        claimed_count: claimed,
                    }
                },
            )
            .collect())
    }

    // ── Transactions ───────────────────────────────────────────────

    /// Run `f` inside one serializable write transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and is aborted otherwise.
    pub fn in_tx<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&QuotaTx<'_>) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = f(&QuotaTx { txn: &txn });
        match result {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }
}

/// Reads available inside [`StateStore::in_tx`].
pub struct QuotaTx<'a> {
    txn: &'a WriteTransaction,
}

impl QuotaTx<'_> {
    fn rows<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        scan(&table)
    }

    pub fn workspace_build_by_id(&self, build_id: Uuid) -> StateResult<Option<WorkspaceBuildRow>> {
        let builds: Vec<WorkspaceBuildRow> = self.rows(BUILDS)?;
        Ok(builds.into_iter().find(|b| b.id == build_id))
    }

    pub fn workspace_by_id(&self, workspace_id: Uuid) -> StateResult<Option<WorkspaceRow>> {
        let table = self.txn.open_table(WORKSPACES).map_err(map_err!(Table))?;
        lookup(&table, &workspace_id.to_string())
    }

    pub fn workspace_build_by_number(
        &self,
        workspace_id: Uuid,
        build_number: u32,
    ) -> StateResult<Option<WorkspaceBuildRow>> {
        let table = self.txn.open_table(BUILDS).map_err(map_err!(Table))?;
        lookup(&table, &build_key(workspace_id, build_number))
    }

    /// Sum of the latest build's daily cost over the owner's non-deleted
    /// workspaces in the organization.
    pub fn quota_consumed_for_user(&self, owner_id: Uuid, organization_id: Uuid) -> StateResult<i64> {
        let workspaces: Vec<WorkspaceRow> = self.rows(WORKSPACES)?;
        let builds: Vec<WorkspaceBuildRow> = self.rows(BUILDS)?;

        let mut latest: HashMap<Uuid, (u32, i32)> = HashMap::new();
        for build in builds {
            let entry = latest.entry(build.workspace_id).or_insert((0, 0));
            if build.build_number >= entry.0 {
                *entry = (build.build_number, build.daily_cost);
            }
        }

        Ok(workspaces
            .iter()
            .filter(|ws| ws.owner_id == owner_id && ws.organization_id == organization_id && !ws.deleted)
            .filter_map(|ws| latest.get(&ws.id))
            .map(|(_, cost)| i64::from(*cost))
            .sum())
    }

    /// Sum of the allowances of every group in the organization that applies
    /// to the user.
    pub fn quota_allowance_for_user(&self, user_id: Uuid, organization_id: Uuid) -> StateResult<i64> {
        let groups: Vec<GroupRow> = self.rows(GROUPS)?;
        Ok(groups
            .iter()
            .filter(|g| g.organization_id == organization_id && g.applies_to(user_id))
            .map(|g| g.quota_allowance)
            .sum())
    }
}
