//! The persisted context pointer and the [`Scope`] value derived from it.
//!
//! Nothing here caches: every call reads the pointer row again, since other
//! processes may have moved it in between.

use memory_vault_schemas::{
    Container, ContainerId, ContainerRef, ContainerStatus, ContextPointer, KnowledgeId,
    KnowledgeType,
};
use rusqlite::params;
use serde::Serialize;
use tracing::info;

use crate::database::{now, Database};
use crate::error::{Result, StoreError};
use crate::guard::Guardable;
use crate::tasks::WorkItemCounts;

/// The active container (or global) at the start of one external request.
/// Passed explicitly into every scoped operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Scope {
    pub container: Option<ContainerRef>,
    pub identity_id: Option<KnowledgeId>,
}

impl Scope {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn is_global(&self) -> bool {
        self.container.is_none()
    }

    pub fn container_id(&self) -> Option<&ContainerId> {
        self.container.as_ref().map(|c| &c.id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub id: KnowledgeId,
    pub title: String,
}

/// Returned when a container becomes active
#[derive(Debug, Clone, Serialize)]
pub struct ScopeSummary {
    pub container: Container,
    pub identity: Option<IdentitySummary>,
    pub work_items: WorkItemCounts,
    pub knowledge_count: usize,
}

/// Returned when the scope goes back to global
#[derive(Debug, Clone, Serialize)]
pub struct GlobalSummary {
    pub identity: Option<IdentitySummary>,
    pub work_items: WorkItemCounts,
    pub knowledge_count: usize,
    /// Most recently updated containers, bounded by the configured limit
    pub containers: Vec<Container>,
    pub container_count: usize,
}

impl Database {
    pub fn load_context_pointer(&self) -> Result<ContextPointer> {
        let pointer = self.conn().query_row(
            "SELECT project_id, identity_id, updated_at FROM active_context WHERE id = 1",
            [],
            |row| {
                Ok(ContextPointer {
                    container_id: row.get::<_, Option<String>>(0)?.map(ContainerId),
                    identity_id: row.get::<_, Option<String>>(1)?.map(KnowledgeId),
                    updated_at: row.get(2)?,
                })
            },
        )?;
        Ok(pointer)
    }

    /// Current scope, read fresh from the pointer row
    pub fn load_scope(&self) -> Result<Scope> {
        let pointer = self.load_context_pointer()?;

        let container = match &pointer.container_id {
            Some(id) => self.container_ref(id)?,
            None => None,
        };

        Ok(Scope {
            container,
            identity_id: pointer.identity_id,
        })
    }

    /// Make a container the active scope.
    ///
    /// Locked containers are PermissionDenied; soft-deleted ones cannot be
    /// entered.
    pub fn enter_scope(&self, name: &str) -> Result<ScopeSummary> {
        let container = self.find_container(name)?;
        if container.status == ContainerStatus::Deleted {
            return Err(StoreError::invalid(
                "container",
                format!("'{}' has been deleted and cannot be entered", container.name),
            ));
        }

        self.conn().execute(
            "UPDATE active_context SET project_id = ?1, updated_at = ?2 WHERE id = 1",
            params![container.id.0, now()],
        )?;
        info!("Entered scope {}", container.name);

        let identity = match self.find_identity(Some(&container.id))? {
            Some(item) => Some(IdentitySummary {
                id: item.id,
                title: item.title,
            }),
            None => self.active_identity()?,
        };

        Ok(ScopeSummary {
            work_items: self.count_work_items(Some(&container.id))?,
            knowledge_count: self.count_knowledge(Some(&container.id))?,
            identity,
            container,
        })
    }

    /// Clear the active container and summarize the whole store
    pub fn exit_scope(&self) -> Result<GlobalSummary> {
        self.conn().execute(
            "UPDATE active_context SET project_id = NULL, updated_at = ?1 WHERE id = 1",
            params![now()],
        )?;
        info!("Returned to global scope");

        let container_count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM projects WHERE permission != 'locked' AND status != 'deleted'",
            [],
            |row| row.get(0),
        )?;

        Ok(GlobalSummary {
            identity: self.active_identity()?,
            work_items: self.count_all_work_items()?,
            knowledge_count: self.count_all_knowledge()?,
            containers: self.list_containers(false, self.config().container_list_limit)?,
            container_count: container_count as usize,
        })
    }

    /// Point the active identity at a visible identity item
    pub fn set_active_identity(&self, id: &KnowledgeId) -> Result<()> {
        let item = self.get_knowledge(id)?;
        if item.kind != KnowledgeType::Identity {
            return Err(StoreError::invalid(
                "identity",
                format!("{} is a {}, not an identity item", id, item.kind),
            ));
        }

        self.conn().execute(
            "UPDATE active_context SET identity_id = ?1, updated_at = ?2 WHERE id = 1",
            params![id.0, now()],
        )?;
        info!("Active identity set to {}", id);
        Ok(())
    }

    /// Identity the pointer refers to, unless it has since been locked
    fn active_identity(&self) -> Result<Option<IdentitySummary>> {
        let Some(id) = self.load_context_pointer()?.identity_id else {
            return Ok(None);
        };

        let item = self.require_knowledge(&id)?;
        if item.guarded_entity().ensure_visible().is_err() {
            return Ok(None);
        }

        Ok(Some(IdentitySummary {
            id: item.id,
            title: item.title,
        }))
    }
}
