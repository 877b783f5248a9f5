//! Conversion of stores written by earlier layouts.
//!
//! There is no version number on disk. Each generation is recognised by the
//! columns it left behind and converted in order, oldest first:
//!
//! 1. `memories.project` / `tasks.project` held a container *name* instead of
//!    an id, and `projects.name` itself was stored as typed.
//! 2. `tasks` had no `parent_id`. Column reconciliation adds it, which makes
//!    every existing task top-level, so nothing is left to do here.
//! 3. `active_context` held the identity text, a preferences blob and a
//!    global summary; `projects` held a per-container summary.
//!
//! Every step checks before it writes and drops its source columns when done,
//! so a converted store has nothing left to detect.

use memory_vault_schemas::{
    normalize_name, ContainerId, KnowledgeId, KnowledgeType, MaturityStatus, PermissionLevel,
};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::database::{now, Database};
use crate::error::{Result, StoreError};
use crate::settings::{SETTING_DEFAULT_PERMISSION, SETTING_PERMISSION_BYPASS, SETTING_SEARCH_LIMIT};

/// Setting key that keeps the unconverted preferences blob
pub const LEGACY_PREFERENCES_KEY: &str = "legacy.preferences";

/// Dotted preference path -> setting key
const PREFERENCE_PATHS: &[(&str, &str)] = &[
    ("permissions.default", SETTING_DEFAULT_PERMISSION),
    ("permissions.bypass", SETTING_PERMISSION_BYPASS),
    ("search.limit", SETTING_SEARCH_LIMIT),
    ("display.language", "language"),
    ("display.timezone", "timezone"),
];

/// What a schema pass changed
#[derive(Debug, Clone, Default)]
pub struct MigrationStats {
    pub tables_created: usize,
    pub columns_added: usize,
    pub containers_renamed: usize,
    pub containers_merged: usize,
    pub containers_linked: usize,
    pub records_relinked: usize,
    pub identity_migrated: bool,
    pub settings_migrated: usize,
    pub summaries_migrated: usize,
    pub legacy_columns_dropped: usize,
}

impl MigrationStats {
    pub fn is_noop(&self) -> bool {
        self.tables_created == 0
            && self.columns_added == 0
            && self.containers_renamed == 0
            && self.containers_merged == 0
            && self.containers_linked == 0
            && self.records_relinked == 0
            && !self.identity_migrated
            && self.settings_migrated == 0
            && self.summaries_migrated == 0
            && self.legacy_columns_dropped == 0
    }
}

/// Run every legacy conversion whose source is still present
pub(crate) fn migrate_legacy(db: &Database, stats: &mut MigrationStats) -> Result<()> {
    normalize_container_names(db, stats).map_err(StoreError::migration("container names"))?;
    for table in ["memories", "tasks"] {
        link_named_containers(db, table, stats).map_err(StoreError::migration("link containers"))?;
    }

    migrate_identity(db, stats).map_err(StoreError::migration("identity"))?;
    migrate_preferences(db, stats).map_err(StoreError::migration("preferences"))?;
    migrate_summaries(db, stats).map_err(StoreError::migration("summaries"))?;

    Ok(())
}

/// Rewrite stored container names to their normalized form. A row whose
/// normalized name is already taken is folded into the row holding it.
fn normalize_container_names(db: &Database, stats: &mut MigrationStats) -> Result<()> {
    let rows: Vec<(String, String)> = {
        let mut stmt = db
            .conn()
            .prepare("SELECT id, name FROM projects ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    for (id, name) in rows {
        let normalized = normalize_name(&name);
        if normalized.is_empty() || normalized == name {
            continue;
        }

        let holder: Option<String> = db
            .conn()
            .query_row(
                "SELECT id FROM projects WHERE name = ?1 AND id != ?2",
                params![normalized, id],
                |row| row.get(0),
            )
            .optional()?;

        match holder {
            None => {
                db.conn().execute(
                    "UPDATE projects SET name = ?1 WHERE id = ?2",
                    params![normalized, id],
                )?;
                stats.containers_renamed += 1;
                debug!("  container '{}' -> '{}'", name, normalized);
            }
            Some(target) => {
                merge_container(db, &id, &target)?;
                stats.containers_merged += 1;
                info!("Merged container '{}' into '{}' ({})", name, normalized, target);
            }
        }
    }

    Ok(())
}

/// Move everything filed under `from` to `into`, then remove `from`
fn merge_container(db: &Database, from: &str, into: &str) -> Result<()> {
    for table in ["memories", "tasks", "active_context"] {
        db.conn().execute(
            &format!("UPDATE {} SET project_id = ?1 WHERE project_id = ?2", table),
            params![into, from],
        )?;
    }

    if db.has_column("projects", "summary")? {
        let summary: Option<String> = db.conn().query_row(
            "SELECT summary FROM projects WHERE id = ?1",
            params![from],
            |row| row.get(0),
        )?;

        if let Some(summary) = summary.filter(|s| !s.trim().is_empty()) {
            db.conn().execute(
                "UPDATE projects SET summary = CASE
                     WHEN summary IS NULL OR trim(summary) = '' THEN ?1
                     ELSE summary || char(10) || char(10) || ?1
                 END
                 WHERE id = ?2",
                params![summary, into],
            )?;
        }
    }

    db.conn()
        .execute("DELETE FROM projects WHERE id = ?1", params![from])?;
    Ok(())
}

fn link_named_containers(db: &Database, table: &str, stats: &mut MigrationStats) -> Result<()> {
    if !db.has_column(table, "project")? {
        return Ok(());
    }

    info!("Linking {} rows to containers by name", table);

    let names: Vec<String> = {
        let mut stmt = db.conn().prepare(&format!(
            "SELECT DISTINCT project FROM {}
             WHERE project IS NOT NULL AND trim(project) != '' AND project_id IS NULL",
            table
        ))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        names
    };

    for name in names {
        let container_id = db.get_or_create_container(&name)?;
        let relinked = db.conn().execute(
            &format!(
                "UPDATE {} SET project_id = ?1 WHERE project = ?2 AND project_id IS NULL",
                table
            ),
            params![container_id.0, name],
        )?;

        stats.containers_linked += 1;
        stats.records_relinked += relinked;
        debug!("  {} '{}' -> {} ({} rows)", table, name, container_id, relinked);
    }

    db.drop_column(table, "project")?;
    stats.legacy_columns_dropped += 1;
    Ok(())
}

fn migrate_identity(db: &Database, stats: &mut MigrationStats) -> Result<()> {
    if !db.has_column("active_context", "identity")? {
        return Ok(());
    }

    let text: Option<String> = db
        .conn()
        .query_row("SELECT identity FROM active_context WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();

    if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
        let existing: Option<String> = db
            .conn()
            .query_row(
                "SELECT id FROM memories WHERE kind = 'identity' AND content = ?1
                 ORDER BY rowid LIMIT 1",
                params![text],
                |row| row.get(0),
            )
            .optional()?;

        let identity_id = match existing {
            Some(id) => KnowledgeId(id),
            None => {
                let item = db.insert_knowledge(
                    None,
                    KnowledgeType::Identity,
                    "Identity",
                    &text,
                    &[],
                    MaturityStatus::Proven,
                    PermissionLevel::Guarded,
                )?;
                stats.identity_migrated = true;
                item.id
            }
        };

        db.conn().execute(
            "UPDATE active_context SET identity_id = ?1, updated_at = ?2
             WHERE id = 1 AND identity_id IS NULL",
            params![identity_id.0, now()],
        )?;
        info!("Legacy identity converted to {}", identity_id);
    }

    db.drop_column("active_context", "identity")?;
    stats.legacy_columns_dropped += 1;
    Ok(())
}

fn migrate_preferences(db: &Database, stats: &mut MigrationStats) -> Result<()> {
    if !db.has_column("active_context", "preferences")? {
        return Ok(());
    }

    let raw: Option<String> = db
        .conn()
        .query_row(
            "SELECT preferences FROM active_context WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    if let Some(raw) = raw.filter(|r| !r.trim().is_empty()) {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => {
                let mut flat = Vec::new();
                flatten_preferences("", &value, &mut flat);

                for (path, value) in flat {
                    let Some((_, key)) = PREFERENCE_PATHS.iter().find(|(p, _)| *p == path) else {
                        debug!("Unmapped legacy preference {}", path);
                        continue;
                    };
                    if db.set_setting_if_absent(key, &value)? {
                        stats.settings_migrated += 1;
                        debug!("  {} -> {}", path, key);
                    }
                }
            }
            Err(e) => warn!("Legacy preferences are not JSON, keeping raw copy only: {}", e),
        }

        if db.set_setting_if_absent(LEGACY_PREFERENCES_KEY, &raw)? {
            stats.settings_migrated += 1;
        }
    }

    db.drop_column("active_context", "preferences")?;
    stats.legacy_columns_dropped += 1;
    Ok(())
}

/// Leaf values keyed by their dotted path. Strings are kept unquoted.
fn flatten_preferences(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_preferences(&path, child, out);
            }
        }
        Value::Null => {}
        Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

fn migrate_summaries(db: &Database, stats: &mut MigrationStats) -> Result<()> {
    if db.has_column("active_context", "summary")? {
        let summary: Option<String> = db
            .conn()
            .query_row("SELECT summary FROM active_context WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if let Some(summary) = summary {
            if insert_summary(db, None, &summary)? {
                stats.summaries_migrated += 1;
            }
        }

        db.drop_column("active_context", "summary")?;
        stats.legacy_columns_dropped += 1;
    }

    if db.has_column("projects", "summary")? {
        let summaries: Vec<(String, String)> = {
            let mut stmt = db.conn().prepare(
                "SELECT id, summary FROM projects
                 WHERE summary IS NOT NULL AND trim(summary) != ''
                 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        for (id, summary) in summaries {
            if insert_summary(db, Some(&ContainerId(id)), &summary)? {
                stats.summaries_migrated += 1;
            }
        }

        db.drop_column("projects", "summary")?;
        stats.legacy_columns_dropped += 1;
    }

    Ok(())
}

/// Session context for the scope unless it already has one
fn insert_summary(db: &Database, container_id: Option<&ContainerId>, summary: &str) -> Result<bool> {
    if summary.trim().is_empty() || db.find_session_context(container_id)?.is_some() {
        return Ok(false);
    }

    db.insert_knowledge(
        container_id,
        KnowledgeType::SessionContext,
        "Session context",
        summary,
        &[],
        MaturityStatus::Draft,
        PermissionLevel::Open,
    )?;
    Ok(true)
}
