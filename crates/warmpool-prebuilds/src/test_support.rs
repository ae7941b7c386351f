//! Shared fixtures for unit tests.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use warmpool_state::*;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn preset_row(name: &str, desired: u32) -> TemplatePresetRow {
    TemplatePresetRow {
        id: Uuid::new_v4(),
        name: name.to_string(),
        template_id: Uuid::new_v4(),
        template_name: "docker".to_string(),
        template_version_id: Uuid::new_v4(),
        organization_id: Uuid::new_v4(),
        organization_name: "acme".to_string(),
        desired_instances: desired,
        failure_hard_limit: None,
        using_active_version: true,
        deleted: false,
    }
}

pub fn prebuild_row(preset: &TemplatePresetRow, phase: WorkspacePhase, created: i64) -> PrebuildRow {
    PrebuildRow {
        workspace_id: Uuid::new_v4(),
        preset_id: preset.id,
        template_id: preset.template_id,
        phase,
        created_at: at(created),
    }
}

pub fn build_row(preset: &TemplatePresetRow, build_number: u32, job_status: JobStatus) -> PrebuildBuildRow {
    PrebuildBuildRow {
        preset_id: preset.id,
        workspace_id: Uuid::new_v4(),
        build_number,
        job_status,
        created_at: at(i64::from(build_number)),
    }
}

/// A store holding one template with one active preset.
pub struct StoreFixture {
    pub store: StateStore,
    pub template: TemplateRow,
    pub preset: PresetRow,
}

impl StoreFixture {
    pub fn new(desired: u32) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let template = TemplateRow {
            id: Uuid::new_v4(),
            name: "docker".to_string(),
            organization_id: Uuid::new_v4(),
            organization_name: "acme".to_string(),
            active_version_id: Uuid::new_v4(),
        };
        let preset = PresetRow {
            id: Uuid::new_v4(),
            template_id: template.id,
            template_version_id: template.active_version_id,
            name: "large".to_string(),
            desired_instances: desired,
            failure_hard_limit: None,
            deleted: false,
        };
        store.put_template(&template).unwrap();
        store.put_preset(&preset).unwrap();
        Self {
            store,
            template,
            preset,
        }
    }

    pub fn add_prebuild(&self, phase: WorkspacePhase, created: i64) -> WorkspaceRow {
        let ws = WorkspaceRow {
            id: Uuid::new_v4(),
            owner_id: PREBUILDS_SYSTEM_USER_ID,
            organization_id: self.template.organization_id,
            template_id: self.template.id,
            preset_id: Some(self.preset.id),
            name: format!("prebuild-{created}"),
            phase,
            autostart_schedule: None,
            next_start_at: None,
            ttl_ms: None,
            deleted: false,
            created_at: at(created),
            updated_at: at(created),
        };
        self.store.put_workspace(&ws).unwrap();
        ws
    }
}
