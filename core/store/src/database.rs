use chrono::{SecondsFormat, Utc};
use memory_vault_schemas::UnknownVariant;
use rusqlite::types::Type;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::migration::{self, MigrationStats};

/// Columns every current-generation table must carry. Used to reconcile
/// stores written by an older layout: anything missing is added with the
/// given definition, which must be valid for `ALTER TABLE ADD COLUMN`.
const CURRENT_COLUMNS: &[(&str, &[(&str, &str)])] = &[
    (
        "projects",
        &[
            ("description", "TEXT"),
            ("stack", "TEXT"),
            ("status", "TEXT NOT NULL DEFAULT 'active'"),
            ("permission", "TEXT NOT NULL DEFAULT 'open'"),
            ("default_permission", "TEXT"),
            ("created_at", "TEXT NOT NULL DEFAULT ''"),
            ("updated_at", "TEXT NOT NULL DEFAULT ''"),
        ],
    ),
    (
        "memories",
        &[
            ("project_id", "TEXT REFERENCES projects(id) ON DELETE CASCADE"),
            ("kind", "TEXT NOT NULL DEFAULT 'note'"),
            ("title", "TEXT NOT NULL DEFAULT ''"),
            ("content", "TEXT NOT NULL DEFAULT ''"),
            ("category_path", "TEXT"),
            ("status", "TEXT NOT NULL DEFAULT 'draft'"),
            ("permission", "TEXT NOT NULL DEFAULT 'guarded'"),
            ("created_at", "TEXT NOT NULL DEFAULT ''"),
            ("updated_at", "TEXT NOT NULL DEFAULT ''"),
        ],
    ),
    (
        "tasks",
        &[
            ("project_id", "TEXT REFERENCES projects(id) ON DELETE CASCADE"),
            ("parent_id", "TEXT REFERENCES tasks(id) ON DELETE CASCADE"),
            ("description", "TEXT"),
            ("priority", "TEXT NOT NULL DEFAULT 'medium'"),
            ("status", "TEXT NOT NULL DEFAULT 'todo'"),
            ("created_at", "TEXT NOT NULL DEFAULT ''"),
            ("updated_at", "TEXT NOT NULL DEFAULT ''"),
        ],
    ),
    (
        "active_context",
        &[
            ("project_id", "TEXT REFERENCES projects(id) ON DELETE SET NULL"),
            ("identity_id", "TEXT REFERENCES memories(id) ON DELETE SET NULL"),
            ("updated_at", "TEXT"),
        ],
    ),
];

/// Single-writer handle on the knowledge store file.
///
/// Opening a second `Database` on the same file from another process is not
/// detected; the store assumes one writer at a time.
pub struct Database {
    conn: Connection,
    config: StoreConfig,
}

impl Database {
    /// Open the store at `path` with default settings and bring the schema
    /// up to date
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(StoreConfig::at(path.as_ref()))
    }

    /// Open the store described by `config` and bring the schema up to date.
    /// A `Migration` error means the file was left untouched and the caller
    /// must not continue.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.db_path)?;
        Self::from_connection(conn, config)
    }

    /// Store backed by a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, StoreConfig::at(":memory:"))
    }

    fn from_connection(conn: Connection, config: StoreConfig) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        register_functions(&conn)?;

        let db = Self { conn, config };
        let stats = db.ensure_schema()?;

        if stats.is_noop() {
            debug!("Schema already current");
        } else {
            info!("Schema updated: {:?}", stats);
        }

        info!("Database initialized");
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create missing tables, reconcile columns, convert legacy data and
    /// create indexes. Safe on every start: a second run changes nothing.
    /// Runs as one transaction so a failure leaves the previous state intact.
    pub fn ensure_schema(&self) -> Result<MigrationStats> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| StoreError::migration("begin")(e.into()))?;

        let mut stats = MigrationStats::default();

        self.create_tables(&mut stats)
            .map_err(StoreError::migration("create tables"))?;
        self.reconcile_columns(&mut stats)
            .map_err(StoreError::migration("reconcile columns"))?;
        migration::migrate_legacy(self, &mut stats)?;
        self.create_indexes()
            .map_err(StoreError::migration("create indexes"))?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO active_context (id, project_id, identity_id, updated_at)
                 VALUES (1, NULL, NULL, ?1)",
                params![now()],
            )
            .map_err(|e| StoreError::migration("context pointer")(e.into()))?;

        tx.commit()
            .map_err(|e| StoreError::migration("commit")(e.into()))?;

        Ok(stats)
    }

    /// Check if a table exists
    pub(crate) fn has_table(&self, table: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Check if a column exists in a table
    pub(crate) fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self.columns(table)?.iter().any(|c| c == column))
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let query = format!("PRAGMA table_info({})", table);
        let mut stmt = self.conn.prepare(&query)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// Drop a column along with any explicit index that covers it
    pub(crate) fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        let indexes: Vec<(String, String)> = {
            let mut stmt = self.conn.prepare(&format!("PRAGMA index_list({})", table))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(3)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        for (index, origin) in indexes {
            if origin != "c" {
                continue;
            }
            let covered: Vec<Option<String>> = {
                let mut stmt = self.conn.prepare(&format!("PRAGMA index_info({})", index))?;
                let names = stmt
                    .query_map([], |row| row.get::<_, Option<String>>(2))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                names
            };
            if covered.iter().any(|name| name.as_deref() == Some(column)) {
                self.conn
                    .execute(&format!("DROP INDEX IF EXISTS {}", index), [])?;
            }
        }

        self.conn
            .execute(&format!("ALTER TABLE {} DROP COLUMN {}", table, column), [])?;
        debug!("Dropped legacy column {}.{}", table, column);
        Ok(())
    }

    /// Create all tables
    fn create_tables(&self, stats: &mut MigrationStats) -> Result<()> {
        const TABLES: &[(&str, &str)] = &[
            (
                "projects",
                "CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT,
                    stack TEXT,
                    status TEXT NOT NULL DEFAULT 'active',
                    permission TEXT NOT NULL DEFAULT 'open',
                    default_permission TEXT,
                    created_at TEXT NOT NULL DEFAULT '',
                    updated_at TEXT NOT NULL DEFAULT ''
                )",
            ),
            (
                "memories",
                "CREATE TABLE IF NOT EXISTS memories (
                    id TEXT PRIMARY KEY,
                    project_id TEXT REFERENCES projects(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL DEFAULT 'note',
                    title TEXT NOT NULL DEFAULT '',
                    content TEXT NOT NULL DEFAULT '',
                    category_path TEXT,
                    status TEXT NOT NULL DEFAULT 'draft',
                    permission TEXT NOT NULL DEFAULT 'guarded',
                    created_at TEXT NOT NULL DEFAULT '',
                    updated_at TEXT NOT NULL DEFAULT ''
                )",
            ),
            (
                "tags",
                "CREATE TABLE IF NOT EXISTS tags (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                )",
            ),
            (
                "memory_tags",
                "CREATE TABLE IF NOT EXISTS memory_tags (
                    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                    tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                    PRIMARY KEY (memory_id, tag_id)
                )",
            ),
            (
                "memory_relations",
                "CREATE TABLE IF NOT EXISTS memory_relations (
                    source_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                    target_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
                    relation_type TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (source_id, target_id)
                )",
            ),
            (
                "tasks",
                "CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    project_id TEXT REFERENCES projects(id) ON DELETE CASCADE,
                    parent_id TEXT REFERENCES tasks(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    priority TEXT NOT NULL DEFAULT 'medium',
                    status TEXT NOT NULL DEFAULT 'todo',
                    created_at TEXT NOT NULL DEFAULT '',
                    updated_at TEXT NOT NULL DEFAULT ''
                )",
            ),
            (
                "settings",
                "CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )",
            ),
            (
                "active_context",
                "CREATE TABLE IF NOT EXISTS active_context (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    project_id TEXT REFERENCES projects(id) ON DELETE SET NULL,
                    identity_id TEXT REFERENCES memories(id) ON DELETE SET NULL,
                    updated_at TEXT
                )",
            ),
        ];

        for (table, ddl) in TABLES {
            if !self.has_table(table)? {
                self.conn.execute(ddl, [])?;
                stats.tables_created += 1;
                debug!("Created table {}", table);
            }
        }

        Ok(())
    }

    /// Add current columns missing from tables written by older layouts,
    /// then backfill the ones whose neutral default is not meaningful
    fn reconcile_columns(&self, stats: &mut MigrationStats) -> Result<()> {
        for (table, columns) in CURRENT_COLUMNS {
            let existing = self.columns(table)?;
            for (column, definition) in columns.iter() {
                if existing.iter().any(|c| c == column) {
                    continue;
                }

                self.conn.execute(
                    &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
                    [],
                )?;
                stats.columns_added += 1;
                info!("Added column {}.{}", table, column);

                match (*table, *column) {
                    (_, "updated_at") if existing.iter().any(|c| c == "created_at") => {
                        self.conn.execute(
                            &format!(
                                "UPDATE {} SET updated_at = created_at WHERE updated_at = '' OR updated_at IS NULL",
                                table
                            ),
                            [],
                        )?;
                    }
                    ("memories", "title") if existing.iter().any(|c| c == "content") => {
                        self.conn.execute(
                            "UPDATE memories SET title = trim(substr(content, 1, 80)) WHERE title = ''",
                            [],
                        )?;
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Indexes for performance; created after reconciliation so every
    /// indexed column exists
    fn create_indexes(&self) -> Result<()> {
        const INDEXES: &[&str] = &[
            "CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project_id)",
            "CREATE INDEX IF NOT EXISTS idx_memories_kind ON memories(kind)",
            "CREATE INDEX IF NOT EXISTS idx_memories_updated ON memories(updated_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_memories_permission ON memories(permission)",
            "CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_id)",
            "CREATE INDEX IF NOT EXISTS idx_relations_target ON memory_relations(target_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status)",
        ];

        for ddl in INDEXES {
            self.conn.execute(ddl, [])?;
        }

        debug!("Database indexes initialized");
        Ok(())
    }
}

/// Case folding used for text matching. Stored text goes through the same
/// function in SQL as `fold(...)`, so both sides of a comparison agree
/// beyond ASCII.
pub fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "fold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| fold_case(&t)))
        },
    )
}

/// Current time as stored in every timestamp column
pub(crate) fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored closed-enum label, surfacing bad values as a conversion
/// failure on that column
pub(crate) fn parse_column<T>(index: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownVariant>,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

pub(crate) fn json_error(err: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}
