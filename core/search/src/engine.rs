use memory_vault_schemas::{
    ContainerId, ContainerRef, KnowledgeId, KnowledgeType, MaturityStatus, UnknownVariant,
};
use memory_vault_store::{
    fold_case, Database, Result, Scope, SettingsReader, SETTING_SEARCH_LIMIT,
};
use rusqlite::types::Type;
use rusqlite::{named_params, Row};
use serde::Serialize;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::grouping::{group_fallback, FallbackGroup};

/// One matching knowledge item. Content is not carried.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: KnowledgeId,
    pub kind: KnowledgeType,
    pub title: String,
    pub status: MaturityStatus,
    pub container: Option<ContainerRef>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchResults {
    /// No active container: one scan over everything
    Global { hits: Vec<SearchHit> },
    /// Active container first, everything else grouped after it
    Scoped {
        scope_name: String,
        in_scope: Vec<SearchHit>,
        fallback: Vec<FallbackGroup>,
    },
}

impl SearchResults {
    pub fn total(&self) -> usize {
        match self {
            SearchResults::Global { hits } => hits.len(),
            SearchResults::Scoped {
                in_scope, fallback, ..
            } => in_scope.len() + fallback.iter().map(|g| g.hits.len()).sum::<usize>(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Which rows one scan may see
#[derive(Debug, Clone, Copy)]
enum Region<'a> {
    Everywhere,
    Inside(&'a ContainerId),
    Outside(&'a ContainerId),
}

impl Region<'_> {
    fn clause(&self) -> &'static str {
        match self {
            Region::Everywhere => ":container IS NULL",
            Region::Inside(_) => "m.project_id = :container",
            Region::Outside(_) => "(m.project_id IS NULL OR m.project_id != :container)",
        }
    }

    fn container(&self) -> Option<&str> {
        match self {
            Region::Everywhere => None,
            Region::Inside(id) | Region::Outside(id) => Some(id.0.as_str()),
        }
    }
}

/// Escape `\`, `%` and `_` for use with `LIKE ... ESCAPE '\'`
pub fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_label<T>(index: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn row_to_hit(row: &Row) -> rusqlite::Result<SearchHit> {
    let kind: String = row.get(1)?;
    let status: String = row.get(3)?;
    let container_id: Option<String> = row.get(4)?;
    let container_name: Option<String> = row.get(5)?;

    Ok(SearchHit {
        id: KnowledgeId(row.get(0)?),
        kind: parse_label(1, &kind)?,
        title: row.get(2)?,
        status: parse_label(3, &status)?,
        container: container_id.zip(container_name).map(|(id, name)| ContainerRef {
            id: ContainerId(id),
            name,
        }),
        updated_at: row.get(6)?,
    })
}

/// Knowledge lookup that splits results around the active scope.
///
/// Locked items never appear, nor do items filed under a locked container.
/// The two scans of a scoped search are independent reads; rows changed
/// between them are not reconciled.
pub struct ScopedSearch<'a> {
    db: &'a Database,
}

impl<'a> ScopedSearch<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Per-scan cap: the `search_limit` setting, else the configured default
    pub fn limit(&self) -> Result<usize> {
        if let Some(raw) = self.db.get_setting(SETTING_SEARCH_LIMIT)? {
            match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => return Ok(limit),
                _ => warn!("Ignoring {} setting '{}'", SETTING_SEARCH_LIMIT, raw),
            }
        }
        Ok(self.db.config().search_limit)
    }

    /// Search visible knowledge. `query` matches title, content, category
    /// path and tag names, case-insensitively; an empty query matches all.
    pub fn find(
        &self,
        scope: &Scope,
        query: Option<&str>,
        kind: Option<KnowledgeType>,
    ) -> Result<SearchResults> {
        let limit = self.limit()?;
        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(&fold_case(q))));

        debug!(
            "Searching {:?} (kind: {:?}, scope: {:?}, limit: {})",
            query,
            kind,
            scope.container.as_ref().map(|c| c.name.as_str()),
            limit
        );

        let results = match &scope.container {
            None => SearchResults::Global {
                hits: self.scan(Region::Everywhere, pattern.as_deref(), kind, limit)?,
            },
            Some(active) => {
                let in_scope = self.scan(Region::Inside(&active.id), pattern.as_deref(), kind, limit)?;
                let outside = self.scan(Region::Outside(&active.id), pattern.as_deref(), kind, limit)?;
                SearchResults::Scoped {
                    scope_name: active.name.clone(),
                    in_scope,
                    fallback: group_fallback(outside),
                }
            }
        };

        debug!("Found {} results", results.total());
        Ok(results)
    }

    fn scan(
        &self,
        region: Region<'_>,
        pattern: Option<&str>,
        kind: Option<KnowledgeType>,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let sql = format!(
            "SELECT m.id, m.kind, m.title, m.status, m.project_id, p.name, m.updated_at
             FROM memories m
             LEFT JOIN projects p ON p.id = m.project_id
             WHERE m.permission != 'locked'
               AND (p.id IS NULL OR p.permission != 'locked')
               AND {}
               AND (:kind IS NULL OR m.kind = :kind)
               AND (:pattern IS NULL
                    OR fold(m.title) LIKE :pattern ESCAPE '\\'
                    OR fold(m.content) LIKE :pattern ESCAPE '\\'
                    OR EXISTS (
                        SELECT 1 FROM json_each(
                            CASE WHEN json_valid(m.category_path) THEN m.category_path ELSE '[]' END
                        ) seg
                        WHERE seg.type = 'text' AND fold(seg.value) LIKE :pattern ESCAPE '\\'
                    )
                    OR EXISTS (
                        SELECT 1 FROM memory_tags mt
                        JOIN tags t ON t.id = mt.tag_id
                        WHERE mt.memory_id = m.id AND fold(t.name) LIKE :pattern ESCAPE '\\'
                    ))
             ORDER BY m.updated_at DESC, m.rowid DESC
             LIMIT :limit",
            region.clause()
        );

        let mut stmt = self.db.conn().prepare(&sql)?;
        let hits = stmt
            .query_map(
                named_params! {
                    ":container": region.container(),
                    ":kind": kind.map(|k| k.as_str()),
                    ":pattern": pattern,
                    ":limit": limit as i64,
                },
                row_to_hit,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(hits)
    }
}
