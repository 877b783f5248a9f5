use memory_vault_schemas::{
    generate_container_id, normalize_name, Container, ContainerId, ContainerRef, ContainerStatus,
    PermissionLevel,
};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info, warn};

use crate::database::{now, parse_column, Database};
use crate::error::{EntityKind, Result, StoreError};
use crate::guard::{GuardAction, Guardable, Guarded, GuardedEntity, PermissionGuard};

const CONTAINER_COLUMNS: &str =
    "id, name, description, stack, status, permission, default_permission, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewContainer {
    pub name: String,
    pub description: Option<String>,
    pub stack: Option<String>,
    pub permission: Option<PermissionLevel>,
    pub default_permission: Option<PermissionLevel>,
}

/// Fields left as `None` are not touched
#[derive(Debug, Clone, Default)]
pub struct ContainerPatch {
    pub description: Option<String>,
    pub stack: Option<String>,
    pub default_permission: Option<PermissionLevel>,
}

impl Guardable for Container {
    fn guarded_entity(&self) -> GuardedEntity {
        GuardedEntity {
            id: self.id.0.clone(),
            display_name: self.name.clone(),
            kind: EntityKind::Container,
            permission: self.permission,
        }
    }
}

pub(crate) fn row_to_container(row: &Row) -> rusqlite::Result<Container> {
    let status: String = row.get(4)?;
    let permission: String = row.get(5)?;
    let default_permission: Option<String> = row.get(6)?;

    Ok(Container {
        id: ContainerId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        stack: row.get(3)?,
        status: parse_column(4, &status)?,
        permission: parse_column(5, &permission)?,
        default_permission: default_permission
            .map(|raw| parse_column(6, &raw))
            .transpose()?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    /// Create a container; the name is stored normalized and must be unused
    pub fn create_container(&self, new: &NewContainer) -> Result<Container> {
        let name = normalize_name(&new.name);
        if name.is_empty() {
            return Err(StoreError::required("name"));
        }

        if self.load_container_by_name(&name)?.is_some() {
            return Err(StoreError::invalid(
                "name",
                format!("a container named '{}' already exists", name),
            ));
        }

        let id = generate_container_id();
        let now = now();
        let permission = new.permission.unwrap_or(PermissionLevel::Open);

        self.conn().execute(
            "INSERT INTO projects (id, name, description, stack, status, permission,
                                   default_permission, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.0,
                name,
                new.description,
                new.stack,
                ContainerStatus::Active.as_str(),
                permission.as_str(),
                new.default_permission.map(|p| p.as_str()),
                now,
                now
            ],
        )?;

        info!("Created container: {} ({})", name, id.0);
        self.require_container(&id)
    }

    /// Get or create a container by (normalized) name, returning its ID
    pub(crate) fn get_or_create_container(&self, name: &str) -> Result<ContainerId> {
        let normalized = normalize_name(name);
        if let Some(existing) = self.load_container_by_name(&normalized)? {
            return Ok(existing.id);
        }

        let created = self.create_container(&NewContainer {
            name: normalized,
            ..NewContainer::default()
        })?;
        Ok(created.id)
    }

    pub(crate) fn load_container(&self, id: &ContainerId) -> Result<Option<Container>> {
        let container = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM projects WHERE id = ?1", CONTAINER_COLUMNS),
                params![id.0],
                row_to_container,
            )
            .optional()?;
        Ok(container)
    }

    pub(crate) fn load_container_by_name(&self, name: &str) -> Result<Option<Container>> {
        let container = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM projects WHERE name = ?1", CONTAINER_COLUMNS),
                params![normalize_name(name)],
                row_to_container,
            )
            .optional()?;
        Ok(container)
    }

    /// Container by id, ignoring visibility. Internal lookups only.
    pub(crate) fn require_container(&self, id: &ContainerId) -> Result<Container> {
        self.load_container(id)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Container, id.0.clone()))
    }

    /// Container by id; locked containers are reported as PermissionDenied
    pub fn get_container(&self, id: &ContainerId) -> Result<Container> {
        let container = self.require_container(id)?;
        container.guarded_entity().ensure_visible()?;
        Ok(container)
    }

    /// Container by name; locked containers are reported as PermissionDenied
    pub fn find_container(&self, name: &str) -> Result<Container> {
        let container = self
            .load_container_by_name(name)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Container, normalize_name(name)))?;
        container.guarded_entity().ensure_visible()?;
        Ok(container)
    }

    /// Visible containers, most recently updated first
    pub fn list_containers(&self, include_deleted: bool, limit: usize) -> Result<Vec<Container>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM projects
             WHERE permission != 'locked' AND (?1 OR status != 'deleted')
             ORDER BY updated_at DESC, name ASC
             LIMIT ?2",
            CONTAINER_COLUMNS
        ))?;

        let containers = stmt
            .query_map(params![include_deleted, limit as i64], row_to_container)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(containers)
    }

    pub(crate) fn container_ref(&self, id: &ContainerId) -> Result<Option<ContainerRef>> {
        Ok(self.load_container(id)?.map(|c| ContainerRef {
            id: c.id,
            name: c.name,
        }))
    }

    pub async fn update_container(
        &self,
        guard: &PermissionGuard,
        id: &ContainerId,
        patch: &ContainerPatch,
    ) -> Result<Guarded<Container>> {
        let container = self.require_container(id)?;

        guard
            .guarded_action(self, &container.guarded_entity(), GuardAction::Update, || {
                self.conn().execute(
                    "UPDATE projects
                     SET description = COALESCE(?1, description),
                         stack = COALESCE(?2, stack),
                         default_permission = COALESCE(?3, default_permission),
                         updated_at = ?4
                     WHERE id = ?5",
                    params![
                        patch.description,
                        patch.stack,
                        patch.default_permission.map(|p| p.as_str()),
                        now(),
                        id.0
                    ],
                )?;
                debug!("Updated container {}", id.0);
                self.require_container(id)
            })
            .await
    }

    /// Lifecycle change. `Deleted` is the soft delete: rows stay, the
    /// container drops out of listings and cannot be entered. Hard removal
    /// is only available through [`Database::admin`].
    pub async fn set_container_status(
        &self,
        guard: &PermissionGuard,
        id: &ContainerId,
        status: ContainerStatus,
    ) -> Result<Guarded<Container>> {
        let container = self.require_container(id)?;
        let action = match status {
            ContainerStatus::Archived | ContainerStatus::Deleted => GuardAction::Archive,
            _ => GuardAction::Update,
        };

        guard
            .guarded_action(self, &container.guarded_entity(), action, || {
                self.conn().execute(
                    "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), now(), id.0],
                )?;

                if status == ContainerStatus::Deleted {
                    let cleared = self.conn().execute(
                        "UPDATE active_context SET project_id = NULL, updated_at = ?1
                         WHERE id = 1 AND project_id = ?2",
                        params![now(), id.0],
                    )?;
                    if cleared > 0 {
                        info!("Left scope of soft-deleted container {}", container.name);
                    }
                }

                info!("Container {} is now {}", container.name, status);
                self.require_container(id)
            })
            .await
    }

    pub async fn set_container_permission(
        &self,
        guard: &PermissionGuard,
        id: &ContainerId,
        permission: PermissionLevel,
    ) -> Result<Guarded<Container>> {
        let container = self.require_container(id)?;

        guard
            .guarded_action(
                self,
                &container.guarded_entity(),
                GuardAction::SetPermission,
                || {
                    self.conn().execute(
                        "UPDATE projects SET permission = ?1, updated_at = ?2 WHERE id = ?3",
                        params![permission.as_str(), now(), id.0],
                    )?;

                    if permission == PermissionLevel::Locked {
                        let cleared = self.conn().execute(
                            "UPDATE active_context SET project_id = NULL, updated_at = ?1
                             WHERE id = 1 AND project_id = ?2",
                            params![now(), id.0],
                        )?;
                        if cleared > 0 {
                            info!("Left scope of locked container {}", container.name);
                        }
                    }

                    self.require_container(id)
                },
            )
            .await
    }

    /// Privileged operations that never pass through the permission guard
    pub fn admin(&self) -> AdminOps<'_> {
        AdminOps { db: self }
    }
}

/// Out-of-band administration. Not reachable from guarded operations.
pub struct AdminOps<'a> {
    db: &'a Database,
}

impl AdminOps<'_> {
    /// Hard-delete a container and, through cascades, every knowledge item
    /// and work item filed under it. Returns the number of knowledge items
    /// and work items removed.
    pub fn purge_container(&self, id: &ContainerId) -> Result<(usize, usize)> {
        let container = self.db.require_container(id)?;
        let conn = self.db.conn();

        let knowledge: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE project_id = ?1",
            params![id.0],
            |row| row.get(0),
        )?;
        let work_items: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE project_id = ?1",
            params![id.0],
            |row| row.get(0),
        )?;

        conn.execute("DELETE FROM projects WHERE id = ?1", params![id.0])?;

        warn!(
            "Purged container {} ({}) with {} knowledge items and {} work items",
            container.name, id.0, knowledge, work_items
        );
        Ok((knowledge as usize, work_items as usize))
    }
}
