//! Work items with unbounded nesting. A child always lives in its parent's
//! container; work items are not permission guarded.

use memory_vault_schemas::{
    generate_work_item_id, ContainerId, Priority, WorkItem, WorkItemId, WorkStatus,
};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use tracing::{debug, info};

use crate::context::Scope;
use crate::database::{now, parse_column, Database};
use crate::error::{EntityKind, Result, StoreError};

const WORK_ITEM_COLUMNS: &str =
    "id, project_id, parent_id, title, description, priority, status, created_at, updated_at";

/// Ids of a work item and everything below it
const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (
        SELECT id FROM tasks WHERE id = ?1
        UNION
        SELECT t.id FROM tasks t JOIN subtree s ON t.parent_id = s.id
    )";

#[derive(Debug, Clone, Default)]
pub struct NewWorkItem {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub parent_id: Option<WorkItemId>,
    /// Ignored when `parent_id` is set
    pub container: Option<String>,
}

impl NewWorkItem {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn child_of(parent: &WorkItemId, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            parent_id: Some(parent.clone()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkItemPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<WorkStatus>,
}

/// Listing modes. Top-level means "no parent", whatever the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItemFilter {
    Children(WorkItemId),
    TopLevelIn(ContainerId),
    TopLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkItemCounts {
    pub todo: usize,
    pub in_progress: usize,
    pub done: usize,
    pub cancelled: usize,
}

impl WorkItemCounts {
    pub fn total(&self) -> usize {
        self.todo + self.in_progress + self.done + self.cancelled
    }

    /// Work not yet finished or dropped
    pub fn open(&self) -> usize {
        self.todo + self.in_progress
    }

    fn add(&mut self, status: WorkStatus, count: usize) {
        match status {
            WorkStatus::Todo => self.todo += count,
            WorkStatus::InProgress => self.in_progress += count,
            WorkStatus::Done => self.done += count,
            WorkStatus::Cancelled => self.cancelled += count,
        }
    }
}

fn row_to_work_item(row: &Row) -> rusqlite::Result<WorkItem> {
    let priority: String = row.get(5)?;
    let status: String = row.get(6)?;

    Ok(WorkItem {
        id: WorkItemId(row.get(0)?),
        container_id: row.get::<_, Option<String>>(1)?.map(ContainerId),
        parent_id: row.get::<_, Option<String>>(2)?.map(WorkItemId),
        title: row.get(3)?,
        description: row.get(4)?,
        priority: parse_column(5, &priority)?,
        status: parse_column(6, &status)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    /// Create a work item.
    ///
    /// With a parent, the container is copied from the parent and any
    /// container name given is ignored. Otherwise a named container must
    /// exist. With neither, the item goes into the active scope, or floats
    /// when the scope is global.
    pub fn create_work_item(&self, scope: &Scope, new: &NewWorkItem) -> Result<WorkItem> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(StoreError::required("title"));
        }

        let container_id = match (&new.parent_id, &new.container) {
            (Some(parent_id), _) => {
                let parent = self.get_work_item(parent_id)?;
                if new.container.is_some() {
                    debug!("Ignoring container name for child of {}", parent_id);
                }
                parent.container_id
            }
            (None, Some(name)) => Some(self.find_container(name)?.id),
            (None, None) => scope.container_id().cloned(),
        };

        let id = generate_work_item_id();
        let now = now();

        self.conn().execute(
            "INSERT INTO tasks (id, project_id, parent_id, title, description, priority, status,
                                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id.0,
                container_id.as_ref().map(|c| c.0.as_str()),
                new.parent_id.as_ref().map(|p| p.0.as_str()),
                title,
                new.description,
                new.priority.unwrap_or(Priority::Medium).as_str(),
                WorkStatus::Todo.as_str(),
                now,
                now
            ],
        )?;

        info!("Created work item: {} ({})", title, id);
        self.get_work_item(&id)
    }

    pub fn get_work_item(&self, id: &WorkItemId) -> Result<WorkItem> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", WORK_ITEM_COLUMNS),
                params![id.0],
                row_to_work_item,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(EntityKind::WorkItem, id.0.clone()))
    }

    pub fn update_work_item(&self, id: &WorkItemId, patch: &WorkItemPatch) -> Result<WorkItem> {
        self.get_work_item(id)?;

        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(StoreError::required("title"));
            }
        }

        self.conn().execute(
            "UPDATE tasks
             SET title = COALESCE(?1, title),
                 description = COALESCE(?2, description),
                 priority = COALESCE(?3, priority),
                 status = COALESCE(?4, status),
                 updated_at = ?5
             WHERE id = ?6",
            params![
                patch.title.as_deref().map(str::trim),
                patch.description,
                patch.priority.map(|p| p.as_str()),
                patch.status.map(|s| s.as_str()),
                now(),
                id.0
            ],
        )?;

        debug!("Updated work item {}", id);
        self.get_work_item(id)
    }

    /// Delete a work item and its whole subtree. Returns the number of rows
    /// removed, the item itself included.
    pub fn delete_work_item(&self, id: &WorkItemId) -> Result<usize> {
        self.get_work_item(id)?;

        // Counted up front: rows removed by a cascade are not reported as
        // changes of the DELETE itself
        let removed: i64 = self.conn().query_row(
            &format!("{} SELECT COUNT(*) FROM subtree", SUBTREE_CTE),
            params![id.0],
            |row| row.get(0),
        )?;

        self.conn().execute(
            &format!(
                "{} DELETE FROM tasks WHERE id IN (SELECT id FROM subtree)",
                SUBTREE_CTE
            ),
            params![id.0],
        )?;
        let removed = removed as usize;

        info!("Deleted work item {} ({} rows)", id, removed);
        Ok(removed)
    }

    /// Every descendant of `id`, excluding `id` itself
    pub fn descendant_ids(&self, id: &WorkItemId) -> Result<Vec<WorkItemId>> {
        let mut stmt = self.conn().prepare(&format!(
            "{} SELECT id FROM subtree WHERE id != ?1",
            SUBTREE_CTE
        ))?;

        let ids = stmt
            .query_map(params![id.0], |row| row.get::<_, String>(0).map(WorkItemId))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ids)
    }

    /// Oldest first
    pub fn list_work_items(&self, filter: &WorkItemFilter) -> Result<Vec<WorkItem>> {
        let (condition, arg) = match filter {
            WorkItemFilter::Children(parent) => ("parent_id = ?1", Some(parent.0.as_str())),
            WorkItemFilter::TopLevelIn(container) => {
                ("parent_id IS NULL AND project_id = ?1", Some(container.0.as_str()))
            }
            WorkItemFilter::TopLevel => ("parent_id IS NULL AND ?1 IS NULL", None),
        };

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM tasks WHERE {} ORDER BY created_at ASC, rowid ASC",
            WORK_ITEM_COLUMNS, condition
        ))?;

        let items = stmt
            .query_map(params![arg], row_to_work_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// Work items in a scope by status (`None` = floating items only)
    pub fn count_work_items(&self, container_id: Option<&ContainerId>) -> Result<WorkItemCounts> {
        self.count_work_items_where(
            "WHERE project_id IS ?1",
            container_id.map(|c| c.0.as_str()),
        )
    }

    /// Work items across the whole store by status
    pub fn count_all_work_items(&self) -> Result<WorkItemCounts> {
        self.count_work_items_where("WHERE ?1 IS NULL", None)
    }

    fn count_work_items_where(&self, condition: &str, arg: Option<&str>) -> Result<WorkItemCounts> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT status, COUNT(*) FROM tasks {} GROUP BY status",
            condition
        ))?;

        let rows = stmt
            .query_map(params![arg], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((parse_column::<WorkStatus>(0, &status)?, count as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut counts = WorkItemCounts::default();
        for (status, count) in rows {
            counts.add(status, count);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::NewContainer;
    use memory_vault_schemas::ContainerRef;

    fn container(db: &Database, name: &str) -> ContainerId {
        db.create_container(&NewContainer {
            name: name.to_string(),
            ..NewContainer::default()
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_child_inherits_parent_container() {
        let db = Database::open_in_memory().unwrap();
        let beta = container(&db, "beta");
        let other = container(&db, "other");

        let parent = db
            .create_work_item(
                &Scope::global(),
                &NewWorkItem {
                    container: Some("beta".into()),
                    ..NewWorkItem::new("Parent")
                },
            )
            .unwrap();

        let mut child = NewWorkItem::child_of(&parent.id, "Child");
        child.container = Some("other".into());
        let scope = Scope {
            container: Some(ContainerRef {
                id: other.clone(),
                name: "other".into(),
            }),
            identity_id: None,
        };
        let child = db.create_work_item(&scope, &child).unwrap();

        assert_eq!(child.container_id, Some(beta));
        assert_eq!(child.parent_id, Some(parent.id));
    }

    #[test]
    fn test_missing_parent_or_container_is_not_found() {
        let db = Database::open_in_memory().unwrap();

        let err = db
            .create_work_item(
                &Scope::global(),
                &NewWorkItem::child_of(&WorkItemId("task_missing".into()), "Orphan"),
            )
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let err = db
            .create_work_item(
                &Scope::global(),
                &NewWorkItem {
                    container: Some("nowhere".into()),
                    ..NewWorkItem::new("Lost")
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_floating_item_without_scope() {
        let db = Database::open_in_memory().unwrap();
        let item = db
            .create_work_item(&Scope::global(), &NewWorkItem::new("Floating"))
            .unwrap();
        assert!(item.container_id.is_none());
        assert_eq!(item.priority, Priority::Medium);
        assert_eq!(item.status, WorkStatus::Todo);
    }

    #[test]
    fn test_delete_removes_deep_chain() {
        let db = Database::open_in_memory().unwrap();
        let root = db
            .create_work_item(&Scope::global(), &NewWorkItem::new("Root"))
            .unwrap();

        let mut parent = root.id.clone();
        for depth in 0..50 {
            parent = db
                .create_work_item(
                    &Scope::global(),
                    &NewWorkItem::child_of(&parent, format!("Level {depth}")),
                )
                .unwrap()
                .id;
        }
        db.create_work_item(&Scope::global(), &NewWorkItem::child_of(&root.id, "Sibling"))
            .unwrap();
        let keep = db
            .create_work_item(&Scope::global(), &NewWorkItem::new("Unrelated"))
            .unwrap();

        assert_eq!(db.descendant_ids(&root.id).unwrap().len(), 51);
        assert_eq!(db.delete_work_item(&root.id).unwrap(), 52);

        let remaining: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
        assert!(db.get_work_item(&keep.id).is_ok());
    }

    #[test]
    fn test_delete_without_foreign_keys_still_removes_subtree() {
        let db = Database::open_in_memory().unwrap();
        let root = db
            .create_work_item(&Scope::global(), &NewWorkItem::new("Root"))
            .unwrap();
        let child = db
            .create_work_item(&Scope::global(), &NewWorkItem::child_of(&root.id, "Child"))
            .unwrap();
        db.create_work_item(&Scope::global(), &NewWorkItem::child_of(&child.id, "Grandchild"))
            .unwrap();

        db.conn().pragma_update(None, "foreign_keys", false).unwrap();
        assert_eq!(db.delete_work_item(&root.id).unwrap(), 3);
    }

    #[test]
    fn test_list_modes() {
        let db = Database::open_in_memory().unwrap();
        let alpha = container(&db, "alpha");

        let in_alpha = db
            .create_work_item(
                &Scope::global(),
                &NewWorkItem {
                    container: Some("alpha".into()),
                    ..NewWorkItem::new("In alpha")
                },
            )
            .unwrap();
        let floating = db
            .create_work_item(&Scope::global(), &NewWorkItem::new("Floating"))
            .unwrap();
        let child = db
            .create_work_item(&Scope::global(), &NewWorkItem::child_of(&in_alpha.id, "Child"))
            .unwrap();

        let children = db
            .list_work_items(&WorkItemFilter::Children(in_alpha.id.clone()))
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);

        let top_alpha = db.list_work_items(&WorkItemFilter::TopLevelIn(alpha)).unwrap();
        assert_eq!(top_alpha.len(), 1);
        assert_eq!(top_alpha[0].id, in_alpha.id);

        let top: Vec<_> = db
            .list_work_items(&WorkItemFilter::TopLevel)
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(top, vec![in_alpha.id, floating.id]);
    }

    #[test]
    fn test_update_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let alpha = container(&db, "alpha");
        let scope = Scope {
            container: Some(ContainerRef {
                id: alpha.clone(),
                name: "alpha".into(),
            }),
            identity_id: None,
        };

        let a = db.create_work_item(&scope, &NewWorkItem::new("A")).unwrap();
        db.create_work_item(&scope, &NewWorkItem::new("B")).unwrap();
        db.create_work_item(&Scope::global(), &NewWorkItem::new("C")).unwrap();

        let updated = db
            .update_work_item(
                &a.id,
                &WorkItemPatch {
                    status: Some(WorkStatus::Done),
                    priority: Some(Priority::High),
                    ..WorkItemPatch::default()
                },
            )
            .unwrap();
        assert_eq!(updated.status, WorkStatus::Done);
        assert_eq!(updated.title, "A");

        let counts = db.count_work_items(Some(&alpha)).unwrap();
        assert_eq!(counts.done, 1);
        assert_eq!(counts.todo, 1);
        assert_eq!(counts.open(), 1);
        assert_eq!(db.count_work_items(None).unwrap().total(), 1);
        assert_eq!(db.count_all_work_items().unwrap().total(), 3);
    }
}
