//! Expense Store
//!
//! SQLite-backed persistence for expenses, business purposes, channel links,
//! delegation grants and the bot conversation log.
//!
//! Every read and write that touches user data takes the owning account id
//! explicitly; there is no ambient "current user".

mod categories;
mod channels;
mod conversation;
mod expenses;
mod schema;

pub use expenses::DuplicateReceipt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Business purposes every account can use; seeded on open, never removable
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "Food",
    "Office Supplies",
    "Other",
    "Transportation",
    "Travel",
    "Utilities",
];

/// Expense store with SQLite backend
pub struct ExpenseStore {
    conn: Mutex<Connection>,
}

impl ExpenseStore {
    /// Open or create the store database
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .context("Failed to set database pragmas")?;

        let store = Self::init(conn, DEFAULT_CATEGORIES)?;
        info!("Expense store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory store seeded with the default categories
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_categories(DEFAULT_CATEGORIES)
    }

    /// In-memory store seeded with a custom default category set
    pub fn open_in_memory_with_categories(defaults: &[&str]) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::init(conn, defaults)
    }

    fn init(conn: Connection, defaults: &[&str]) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate().context("Database migration failed")?;
        store.seed_default_categories(defaults)?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;

        let has_version_table: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            [],
            |row| row.get(0),
        )?;

        if !has_version_table {
            conn.execute_batch(schema::SCHEMA_V1)?;
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::CURRENT_VERSION],
            )?;
            return Ok(());
        }

        let current: i32 = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        for &(from_version, sql) in schema::MIGRATIONS {
            if current <= from_version {
                conn.execute_batch(sql)?;
            }
        }

        if current < schema::CURRENT_VERSION {
            conn.execute(
                "UPDATE schema_version SET version = ?1",
                params![schema::CURRENT_VERSION],
            )?;
        }

        Ok(())
    }

    fn seed_default_categories(&self, defaults: &[&str]) -> Result<()> {
        let conn = self.conn()?;
        let now = now_millis();
        for name in defaults {
            conn.execute(
                "INSERT OR IGNORE INTO business_purposes (id, name, is_default, created_by, created_at, updated_at)
                 VALUES (?1, ?2, 1, NULL, ?3, ?3)",
                params![uuid::Uuid::new_v4().to_string(), name, now],
            )?;
        }
        Ok(())
    }

    /// Lock the connection; a poisoned lock is reported as an error
    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Expense store lock poisoned: {}", e))
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Parse a TEXT column into a typed value inside a row mapper
pub(crate) fn parse_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid value {:?}: {}", raw, e).into(),
        )
    })
}
