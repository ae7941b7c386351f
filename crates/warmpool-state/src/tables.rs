//! redb table definitions for the WarmPool state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every table: string key, JSON value.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Templates keyed by `{template_id}`.
pub const TEMPLATES: JsonTable = TableDefinition::new("templates");

/// Presets keyed by `{preset_id}`.
pub const PRESETS: JsonTable = TableDefinition::new("presets");

/// Workspaces keyed by `{workspace_id}`.
pub const WORKSPACES: JsonTable = TableDefinition::new("workspaces");

/// Workspace builds keyed by `{workspace_id}:{build_number:010}`.
pub const BUILDS: JsonTable = TableDefinition::new("workspace_builds");

/// Quota groups keyed by `{group_id}`.
pub const GROUPS: JsonTable = TableDefinition::new("groups");
