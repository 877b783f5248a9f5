use memory_vault_schemas::{
    generate_knowledge_id, generate_tag_id, normalize_name, Container, ContainerId,
    KnowledgeId, KnowledgeItem, KnowledgeType, MaturityStatus, PermissionLevel, RelationKind,
};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

use crate::context::Scope;
use crate::database::{json_error, now, parse_column, Database};
use crate::error::{EntityKind, Result, StoreError};
use crate::guard::{
    resolve_permission, GuardAction, GuardPath, Guardable, Guarded, GuardedEntity,
    PermissionGuard,
};

const KNOWLEDGE_COLUMNS: &str =
    "id, project_id, kind, title, content, category_path, status, permission, created_at, updated_at";

/// Where a new knowledge item is filed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScopeTarget {
    /// The active container, or global when none is active
    #[default]
    Active,
    Global,
    Named(String),
}

#[derive(Debug, Clone)]
pub struct NewKnowledge {
    pub kind: KnowledgeType,
    pub title: String,
    pub content: String,
    pub target: ScopeTarget,
    pub category_path: Vec<String>,
    pub status: Option<MaturityStatus>,
    pub permission: Option<PermissionLevel>,
    pub tags: Vec<String>,
}

impl NewKnowledge {
    pub fn new(kind: KnowledgeType, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            content: content.into(),
            target: ScopeTarget::Active,
            category_path: Vec::new(),
            status: None,
            permission: None,
            tags: Vec::new(),
        }
    }
}

/// Fields left as `None` are not touched; `tags` replaces the whole set
#[derive(Debug, Clone, Default)]
pub struct KnowledgePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category_path: Option<Vec<String>>,
    pub status: Option<MaturityStatus>,
    pub tags: Option<Vec<String>>,
}

/// A related item as seen from one endpoint
#[derive(Debug, Clone)]
pub struct RelatedKnowledge {
    pub item: KnowledgeItem,
    pub kind: RelationKind,
}

impl Guardable for KnowledgeItem {
    fn guarded_entity(&self) -> GuardedEntity {
        GuardedEntity {
            id: self.id.0.clone(),
            display_name: self.title.clone(),
            kind: EntityKind::Knowledge,
            permission: self.permission,
        }
    }
}

fn row_to_knowledge(row: &Row) -> rusqlite::Result<KnowledgeItem> {
    let kind: String = row.get(2)?;
    let category_json: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    let permission: String = row.get(7)?;

    let category_path: Vec<String> = match category_json {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(json_error)?,
        _ => Vec::new(),
    };

    Ok(KnowledgeItem {
        id: KnowledgeId(row.get(0)?),
        container_id: row.get::<_, Option<String>>(1)?.map(ContainerId),
        kind: parse_column(2, &kind)?,
        title: row.get(3)?,
        content: row.get(4)?,
        category_path,
        status: parse_column(6, &status)?,
        permission: parse_column(7, &permission)?,
        tags: Vec::new(),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn clean_path(segments: &[String]) -> Vec<String> {
    segments
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn encode_path(segments: &[String]) -> Result<Option<String>> {
    let cleaned = clean_path(segments);
    if cleaned.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(&cleaned)?))
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(StoreError::required(field))
    } else {
        Ok(())
    }
}

impl Database {
    /// Store a knowledge item.
    ///
    /// Scratchpad items are always open. A session-context item is unique
    /// per scope: if one already exists there it is updated in place,
    /// through the guard, instead of inserting a second row.
    pub async fn save_knowledge(
        &self,
        guard: &PermissionGuard,
        scope: &Scope,
        new: &NewKnowledge,
    ) -> Result<Guarded<KnowledgeItem>> {
        require_text("title", &new.title)?;
        require_text("content", &new.content)?;

        let container = self.resolve_target(scope, &new.target)?;
        let container_id = container.as_ref().map(|c| c.id.clone());

        if new.kind == KnowledgeType::SessionContext {
            if let Some(existing) = self.find_session_context(container_id.as_ref())? {
                debug!("Session context exists for scope, updating {}", existing.id);
                let patch = KnowledgePatch {
                    title: Some(new.title.clone()),
                    content: Some(new.content.clone()),
                    category_path: Some(new.category_path.clone()),
                    status: new.status,
                    tags: Some(new.tags.clone()),
                };
                return guard
                    .guarded_action(self, &existing.guarded_entity(), GuardAction::Update, || {
                        self.apply_patch(&existing.id, &patch)
                    })
                    .await;
            }
        }

        let permission = if new.kind == KnowledgeType::Scratchpad {
            PermissionLevel::Open
        } else {
            resolve_permission(
                self,
                new.permission,
                container.as_ref().and_then(|c| c.default_permission),
            )?
        };

        let tx = self.conn().unchecked_transaction()?;
        let item = self.insert_knowledge(
            container_id.as_ref(),
            new.kind,
            &new.title,
            &new.content,
            &new.category_path,
            new.status.unwrap_or(MaturityStatus::Draft),
            permission,
        )?;
        self.replace_tags(&item.id, &new.tags)?;
        tx.commit()?;

        Ok(Guarded {
            value: self.require_knowledge(&item.id)?,
            path: GuardPath::Direct,
        })
    }

    fn resolve_target(&self, scope: &Scope, target: &ScopeTarget) -> Result<Option<Container>> {
        match target {
            ScopeTarget::Global => Ok(None),
            ScopeTarget::Named(name) => Ok(Some(self.find_container(name)?)),
            ScopeTarget::Active => match &scope.container {
                Some(active) => Ok(Some(self.require_container(&active.id)?)),
                None => Ok(None),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert_knowledge(
        &self,
        container_id: Option<&ContainerId>,
        kind: KnowledgeType,
        title: &str,
        content: &str,
        category_path: &[String],
        status: MaturityStatus,
        permission: PermissionLevel,
    ) -> Result<KnowledgeItem> {
        let id = generate_knowledge_id();
        let now = now();
        let permission = if kind == KnowledgeType::Scratchpad {
            PermissionLevel::Open
        } else {
            permission
        };

        self.conn().execute(
            "INSERT INTO memories (id, project_id, kind, title, content, category_path,
                                   status, permission, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.0,
                container_id.map(|c| c.0.as_str()),
                kind.as_str(),
                title.trim(),
                content,
                encode_path(category_path)?,
                status.as_str(),
                permission.as_str(),
                now,
                now
            ],
        )?;

        info!("Inserted knowledge item: {} (kind: {})", id, kind);
        self.require_knowledge(&id)
    }

    /// The session-context item of a scope (`None` = global), if any
    pub(crate) fn find_session_context(
        &self,
        container_id: Option<&ContainerId>,
    ) -> Result<Option<KnowledgeItem>> {
        let item = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM memories
                     WHERE kind = 'session_context' AND project_id IS ?1
                     ORDER BY updated_at DESC, rowid DESC
                     LIMIT 1",
                    KNOWLEDGE_COLUMNS
                ),
                params![container_id.map(|c| c.0.as_str())],
                row_to_knowledge,
            )
            .optional()?;
        Ok(item)
    }

    /// Most recently updated visible identity item filed in a scope
    pub(crate) fn find_identity(
        &self,
        container_id: Option<&ContainerId>,
    ) -> Result<Option<KnowledgeItem>> {
        let item = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM memories
                     WHERE kind = 'identity' AND project_id IS ?1 AND permission != 'locked'
                     ORDER BY updated_at DESC, rowid DESC
                     LIMIT 1",
                    KNOWLEDGE_COLUMNS
                ),
                params![container_id.map(|c| c.0.as_str())],
                row_to_knowledge,
            )
            .optional()?;
        Ok(item)
    }

    fn load_knowledge(&self, id: &KnowledgeId) -> Result<Option<KnowledgeItem>> {
        let item = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM memories WHERE id = ?1", KNOWLEDGE_COLUMNS),
                params![id.0],
                row_to_knowledge,
            )
            .optional()?;

        match item {
            Some(mut item) => {
                item.tags = self.knowledge_tags(&item.id)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    /// Knowledge item by id, ignoring visibility. Internal lookups only.
    pub(crate) fn require_knowledge(&self, id: &KnowledgeId) -> Result<KnowledgeItem> {
        self.load_knowledge(id)?
            .ok_or_else(|| StoreError::not_found(EntityKind::Knowledge, id.0.clone()))
    }

    /// Knowledge item by id. Locked items are PermissionDenied.
    pub fn get_knowledge(&self, id: &KnowledgeId) -> Result<KnowledgeItem> {
        let item = self.require_knowledge(id)?;
        item.guarded_entity().ensure_visible()?;
        Ok(item)
    }

    pub async fn update_knowledge(
        &self,
        guard: &PermissionGuard,
        id: &KnowledgeId,
        patch: &KnowledgePatch,
    ) -> Result<Guarded<KnowledgeItem>> {
        let item = self.require_knowledge(id)?;

        guard
            .guarded_action(self, &item.guarded_entity(), GuardAction::Update, || {
                self.apply_patch(id, patch)
            })
            .await
    }

    fn apply_patch(&self, id: &KnowledgeId, patch: &KnowledgePatch) -> Result<KnowledgeItem> {
        if let Some(title) = &patch.title {
            require_text("title", title)?;
        }
        if let Some(content) = &patch.content {
            require_text("content", content)?;
        }

        let (replace_path, category_json) = match &patch.category_path {
            Some(path) => (true, encode_path(path)?),
            None => (false, None),
        };

        let tx = self.conn().unchecked_transaction()?;
        self.conn().execute(
            "UPDATE memories
             SET title = COALESCE(?1, title),
                 content = COALESCE(?2, content),
                 category_path = CASE WHEN ?3 THEN ?4 ELSE category_path END,
                 status = COALESCE(?5, status),
                 updated_at = ?6
             WHERE id = ?7",
            params![
                patch.title.as_deref().map(str::trim),
                patch.content,
                replace_path,
                category_json,
                patch.status.map(|s| s.as_str()),
                now(),
                id.0
            ],
        )?;

        if let Some(tags) = &patch.tags {
            self.replace_tags(id, tags)?;
        }
        tx.commit()?;

        debug!("Updated knowledge item {}", id);
        self.require_knowledge(id)
    }

    pub async fn delete_knowledge(
        &self,
        guard: &PermissionGuard,
        id: &KnowledgeId,
    ) -> Result<Guarded<()>> {
        let item = self.require_knowledge(id)?;

        guard
            .guarded_action(self, &item.guarded_entity(), GuardAction::Delete, || {
                self.conn()
                    .execute("DELETE FROM memories WHERE id = ?1", params![id.0])?;
                info!("Deleted knowledge item {}", id);
                Ok(())
            })
            .await
    }

    /// Change an item's permission level. Scratchpad items stay open
    /// whatever level is requested.
    pub async fn set_knowledge_permission(
        &self,
        guard: &PermissionGuard,
        id: &KnowledgeId,
        level: PermissionLevel,
    ) -> Result<Guarded<KnowledgeItem>> {
        let item = self.require_knowledge(id)?;
        let level = if item.kind == KnowledgeType::Scratchpad {
            PermissionLevel::Open
        } else {
            level
        };

        guard
            .guarded_action(
                self,
                &item.guarded_entity(),
                GuardAction::SetPermission,
                || {
                    self.conn().execute(
                        "UPDATE memories SET permission = ?1, updated_at = ?2 WHERE id = ?3",
                        params![level.as_str(), now(), id.0],
                    )?;
                    self.require_knowledge(id)
                },
            )
            .await
    }

    /// Add tags to an item, keeping the ones it already has
    pub async fn tag_knowledge(
        &self,
        guard: &PermissionGuard,
        id: &KnowledgeId,
        tags: &[String],
    ) -> Result<Guarded<KnowledgeItem>> {
        let item = self.require_knowledge(id)?;

        guard
            .guarded_action(self, &item.guarded_entity(), GuardAction::Update, || {
                let tx = self.conn().unchecked_transaction()?;
                for tag in tags {
                    self.attach_tag(id, tag)?;
                }
                self.conn().execute(
                    "UPDATE memories SET updated_at = ?1 WHERE id = ?2",
                    params![now(), id.0],
                )?;
                tx.commit()?;
                self.require_knowledge(id)
            })
            .await
    }

    pub fn knowledge_tags(&self, id: &KnowledgeId) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT t.name FROM tags t
             JOIN memory_tags mt ON mt.tag_id = t.id
             WHERE mt.memory_id = ?1
             ORDER BY t.name",
        )?;

        let tags = stmt
            .query_map(params![id.0], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(tags)
    }

    fn replace_tags(&self, id: &KnowledgeId, tags: &[String]) -> Result<()> {
        self.conn()
            .execute("DELETE FROM memory_tags WHERE memory_id = ?1", params![id.0])?;
        for tag in tags {
            self.attach_tag(id, tag)?;
        }
        Ok(())
    }

    fn attach_tag(&self, id: &KnowledgeId, raw: &str) -> Result<()> {
        let name = normalize_name(raw);
        if name.is_empty() {
            return Ok(());
        }

        let existing: Option<String> = self
            .conn()
            .query_row(
                "SELECT id FROM tags WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let tag_id = match existing {
            Some(tag_id) => tag_id,
            None => {
                let tag_id = generate_tag_id();
                self.conn().execute(
                    "INSERT INTO tags (id, name) VALUES (?1, ?2)",
                    params![tag_id.0, name],
                )?;
                debug!("Created tag: {} ({})", name, tag_id);
                tag_id.0
            }
        };

        self.conn().execute(
            "INSERT OR IGNORE INTO memory_tags (memory_id, tag_id) VALUES (?1, ?2)",
            params![id.0, tag_id],
        )?;
        Ok(())
    }

    /// Link two visible items. The edge is symmetric in intent: relating
    /// B to A after A to B changes nothing.
    pub fn relate_knowledge(
        &self,
        source: &KnowledgeId,
        target: &KnowledgeId,
        kind: RelationKind,
    ) -> Result<bool> {
        if source == target {
            return Err(StoreError::invalid("relation", "an item cannot relate to itself"));
        }

        self.get_knowledge(source)?;
        self.get_knowledge(target)?;

        let existing: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM memory_relations
                 WHERE (source_id = ?1 AND target_id = ?2) OR (source_id = ?2 AND target_id = ?1)",
                params![source.0, target.0],
                |row| row.get(0),
            )
            .optional()?;

        if existing.is_some() {
            debug!("Relation already exists: {} - {}", source, target);
            return Ok(false);
        }

        self.conn().execute(
            "INSERT INTO memory_relations (source_id, target_id, relation_type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![source.0, target.0, kind.as_str(), now()],
        )?;

        info!("Created relation: {} -{}-> {}", source, kind, target);
        Ok(true)
    }

    pub fn unrelate_knowledge(&self, a: &KnowledgeId, b: &KnowledgeId) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM memory_relations
             WHERE (source_id = ?1 AND target_id = ?2) OR (source_id = ?2 AND target_id = ?1)",
            params![a.0, b.0],
        )?;
        Ok(removed > 0)
    }

    /// Items related to `id` in either direction; locked items are left out
    pub fn related_knowledge(&self, id: &KnowledgeId) -> Result<Vec<RelatedKnowledge>> {
        self.get_knowledge(id)?;

        let columns = KNOWLEDGE_COLUMNS
            .split(", ")
            .map(|c| format!("m.{}", c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {}, r.relation_type FROM memory_relations r
             JOIN memories m
               ON m.id = CASE WHEN r.source_id = ?1 THEN r.target_id ELSE r.source_id END
             WHERE (r.source_id = ?1 OR r.target_id = ?1) AND m.permission != 'locked'
             ORDER BY m.updated_at DESC",
            columns
        ))?;

        let related = stmt
            .query_map(params![id.0], |row| {
                let kind: String = row.get(10)?;
                Ok(RelatedKnowledge {
                    item: row_to_knowledge(row)?,
                    kind: parse_column(10, &kind)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(related)
    }

    /// Visible knowledge items in a scope (`None` = global only)
    pub fn count_knowledge(&self, container_id: Option<&ContainerId>) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM memories WHERE project_id IS ?1 AND permission != 'locked'",
            params![container_id.map(|c| c.0.as_str())],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Visible knowledge items across the whole store
    pub fn count_all_knowledge(&self) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM memories WHERE permission != 'locked'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::NewContainer;
    use crate::guard::AutoConfirm;
    use memory_vault_schemas::ContainerRef;
    use std::sync::Arc;

    fn approving() -> PermissionGuard {
        PermissionGuard::new(Arc::new(AutoConfirm::approve()))
    }

    fn scoped_to(container: &Container) -> Scope {
        Scope {
            container: Some(ContainerRef {
                id: container.id.clone(),
                name: container.name.clone(),
            }),
            identity_id: None,
        }
    }

    #[tokio::test]
    async fn test_failed_tag_replacement_rolls_back_patch() {
        let db = Database::open_in_memory().unwrap();
        let guard = approving();

        let mut new = NewKnowledge::new(KnowledgeType::Decision, "Use WAL", "Single writer");
        new.tags = vec!["sqlite".into()];
        let saved = db.save_knowledge(&guard, &Scope::global(), &new).await.unwrap().value;

        db.conn()
            .execute_batch(
                "CREATE TEMP TRIGGER reject_tags BEFORE INSERT ON memory_tags
                 BEGIN SELECT RAISE(ABORT, 'tag table unavailable'); END;",
            )
            .unwrap();

        let patch = KnowledgePatch {
            title: Some("Use rollback journal".into()),
            tags: Some(vec!["journal".into()]),
            ..KnowledgePatch::default()
        };
        let err = db.update_knowledge(&guard, &saved.id, &patch).await.unwrap_err();
        assert_eq!(err.code(), "OPERATION_ERROR");

        let after = db.get_knowledge(&saved.id).unwrap();
        assert_eq!(after.title, "Use WAL");
        assert_eq!(after.tags, vec!["sqlite"]);

        let mut second = NewKnowledge::new(KnowledgeType::Note, "Tagged note", "body");
        second.tags = vec!["anything".into()];
        assert!(db.save_knowledge(&guard, &Scope::global(), &second).await.is_err());
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM memories WHERE title = 'Tagged note'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_save_and_get_knowledge() {
        let db = Database::open_in_memory().unwrap();
        let guard = approving();

        let mut new = NewKnowledge::new(KnowledgeType::Pattern, "Retry with jitter", "Back off exponentially");
        new.category_path = vec!["Networking".into(), " ".into(), "Resilience".into()];
        new.tags = vec!["HTTP".into(), "retries".into()];

        let saved = db.save_knowledge(&guard, &Scope::global(), &new).await.unwrap().value;
        assert_eq!(saved.permission, PermissionLevel::Guarded);
        assert_eq!(saved.status, MaturityStatus::Draft);
        assert_eq!(saved.category_path, vec!["Networking", "Resilience"]);
        assert_eq!(saved.tags, vec!["http", "retries"]);
        assert!(saved.container_id.is_none());

        let loaded = db.get_knowledge(&saved.id).unwrap();
        assert_eq!(loaded.title, "Retry with jitter");
    }

    #[tokio::test]
    async fn test_required_fields() {
        let db = Database::open_in_memory().unwrap();
        let new = NewKnowledge::new(KnowledgeType::Note, "  ", "body");
        let err = db.save_knowledge(&approving(), &Scope::global(), &new).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_container_default_permission_applies() {
        let db = Database::open_in_memory().unwrap();
        let container = db
            .create_container(&NewContainer {
                name: "alpha".into(),
                default_permission: Some(PermissionLevel::ReadOnly),
                ..NewContainer::default()
            })
            .unwrap();

        let new = NewKnowledge::new(KnowledgeType::Decision, "Use SQLite", "Single file store");
        let saved = db
            .save_knowledge(&approving(), &scoped_to(&container), &new)
            .await
            .unwrap()
            .value;
        assert_eq!(saved.permission, PermissionLevel::ReadOnly);
        assert_eq!(saved.container_id, Some(container.id));
    }

    #[tokio::test]
    async fn test_scratchpad_always_open() {
        let db = Database::open_in_memory().unwrap();
        let guard = approving();

        let mut new = NewKnowledge::new(KnowledgeType::Scratchpad, "Scratch", "temp notes");
        new.permission = Some(PermissionLevel::Locked);
        let saved = db.save_knowledge(&guard, &Scope::global(), &new).await.unwrap().value;
        assert_eq!(saved.permission, PermissionLevel::Open);

        let changed = db
            .set_knowledge_permission(&guard, &saved.id, PermissionLevel::ReadOnly)
            .await
            .unwrap()
            .value;
        assert_eq!(changed.permission, PermissionLevel::Open);
    }

    #[tokio::test]
    async fn test_session_context_unique_per_scope() {
        let db = Database::open_in_memory().unwrap();
        let guard = approving();
        let container = db
            .create_container(&NewContainer {
                name: "alpha".into(),
                ..NewContainer::default()
            })
            .unwrap();

        let first = NewKnowledge::new(KnowledgeType::SessionContext, "Session", "Working on parser");
        let second = NewKnowledge::new(KnowledgeType::SessionContext, "Session", "Parser done, on codegen");

        let a = db.save_knowledge(&guard, &Scope::global(), &first).await.unwrap().value;
        let b = db.save_knowledge(&guard, &Scope::global(), &second).await.unwrap().value;
        assert_eq!(a.id, b.id);
        assert_eq!(b.content, "Parser done, on codegen");

        let c = db.save_knowledge(&guard, &scoped_to(&container), &first).await.unwrap().value;
        assert_ne!(c.id, a.id);

        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE kind = 'session_context'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_locked_item_hidden_and_immutable() {
        let db = Database::open_in_memory().unwrap();
        let guard = approving();

        let mut new = NewKnowledge::new(KnowledgeType::Insight, "Secret", "classified");
        new.permission = Some(PermissionLevel::Locked);
        let saved = db.save_knowledge(&guard, &Scope::global(), &new).await.unwrap().value;

        let err = db.get_knowledge(&saved.id).unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
        assert!(!err.to_string().contains("classified"));

        let err = db.delete_knowledge(&guard, &saved.id).await.unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
        assert_eq!(db.count_all_knowledge().unwrap(), 0);
        assert!(db.require_knowledge(&saved.id).is_ok());
    }

    #[tokio::test]
    async fn test_relations_are_symmetric_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        let guard = PermissionGuard::new(Arc::new(AutoConfirm::approve()));
        let mut a = NewKnowledge::new(KnowledgeType::Skill, "Profiling", "Use perf");
        a.permission = Some(PermissionLevel::Open);
        let mut b = NewKnowledge::new(KnowledgeType::Note, "Flamegraphs", "inferno");
        b.permission = Some(PermissionLevel::Open);

        let a = db.save_knowledge(&guard, &Scope::global(), &a).await.unwrap().value;
        let b = db.save_knowledge(&guard, &Scope::global(), &b).await.unwrap().value;

        assert!(db.relate_knowledge(&a.id, &b.id, RelationKind::Uses).unwrap());
        assert!(!db.relate_knowledge(&b.id, &a.id, RelationKind::RelatedTo).unwrap());

        let from_b = db.related_knowledge(&b.id).unwrap();
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b[0].item.id, a.id);
        assert_eq!(from_b[0].kind, RelationKind::Uses);

        db.delete_knowledge(&guard, &b.id).await.unwrap();
        assert!(db.related_knowledge(&a.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tag_knowledge_keeps_existing() {
        let db = Database::open_in_memory().unwrap();
        let guard = approving();
        let mut new = NewKnowledge::new(KnowledgeType::Note, "Tagged", "body");
        new.tags = vec!["rust".into()];
        let saved = db.save_knowledge(&guard, &Scope::global(), &new).await.unwrap().value;

        let tagged = db
            .tag_knowledge(&guard, &saved.id, &["Async IO".to_string(), "rust".to_string()])
            .await
            .unwrap()
            .value;
        assert_eq!(tagged.tags, vec!["async-io", "rust"]);
    }
}
