//! Key/value settings. The permission guard and search only ever read them;
//! writes are administrative.

use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use tracing::info;

use crate::database::{now, Database};
use crate::error::Result;

pub const SETTING_PERMISSION_BYPASS: &str = "permission_bypass";
pub const SETTING_DEFAULT_PERMISSION: &str = "default_permission";
pub const SETTING_SEARCH_LIMIT: &str = "search_limit";

/// Read path of the settings store
pub trait SettingsReader {
    fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// True for the usual spellings of an enabled flag
    fn flag_enabled(&self, key: &str) -> Result<bool> {
        Ok(self
            .get_setting(key)?
            .map(|value| {
                matches!(
                    value.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false))
    }
}

impl SettingsReader for Database {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

/// In-memory settings, for hosts that keep policy outside the store
impl SettingsReader for HashMap<String, String> {
    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key).cloned())
    }
}

impl Database {
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now()],
        )?;

        info!("Setting {} updated", key);
        Ok(())
    }

    /// Insert only when the key is absent. Returns true if a row was written.
    pub(crate) fn set_setting_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now()],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }
}
