//! Store configuration with environment variable overrides
//!
//! Runtime policy (bypass, default permission, search cap) lives in the
//! `settings` table; this only covers what must be known before the store
//! is open, plus defaults for values the settings table may override.

use std::env;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const DEFAULT_CONTAINER_LIST_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite file backing the store
    pub db_path: PathBuf,
    /// Per-scan cap when the `search_limit` setting is absent
    pub search_limit: usize,
    /// Containers listed in the global-mode summary
    pub container_list_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            container_list_limit: DEFAULT_CONTAINER_LIST_LIMIT,
        }
    }
}

impl StoreConfig {
    /// Config rooted at an explicit file, everything else default
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Load from environment variables:
    /// - MEMORY_VAULT_DB: database file
    /// - MEMORY_VAULT_SEARCH_LIMIT: per-scan result cap
    /// - MEMORY_VAULT_CONTAINER_LIST_LIMIT: containers shown in global summaries
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var("MEMORY_VAULT_DB") {
            if !path.trim().is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }

        if let Some(limit) = parse_limit("MEMORY_VAULT_SEARCH_LIMIT") {
            config.search_limit = limit;
        }

        if let Some(limit) = parse_limit("MEMORY_VAULT_CONTAINER_LIST_LIMIT") {
            config.container_list_limit = limit;
        }

        config
    }
}

fn parse_limit(var: &str) -> Option<usize> {
    let raw = env::var(var).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(limit) if limit > 0 => Some(limit),
        _ => {
            warn!("Ignoring invalid {}='{}', using default", var, raw);
            None
        }
    }
}

fn default_db_path() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".memory-vault").join("vault.db")
}
