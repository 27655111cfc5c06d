//! Durable connection status storage using SQLite.
//!
//! One row per workspace holds the JSON-encoded [`ConnectionStatus`]. This is
//! the only state that survives a process restart; tokens and secrets are
//! never written here.

use super::status::ConnectionStatus;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Connection status storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE connection_status (
///     workspace TEXT PRIMARY KEY,
///     status_json TEXT NOT NULL,   -- serialized ConnectionStatus
///     updated_at TEXT NOT NULL     -- ISO 8601 timestamp
/// );
/// ```
pub struct StatusStore {
    conn: Mutex<Connection>,
}

impl StatusStore {
    /// Creates or opens a status store. `":memory:"` gives a throwaway store.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open status database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS connection_status (
                workspace TEXT PRIMARY KEY,
                status_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create connection_status table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Status store lock poisoned"))
    }

    /// Loads the status for `workspace`, if one was saved.
    pub fn load(&self, workspace: &str) -> Result<Option<ConnectionStatus>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT status_json FROM connection_status WHERE workspace = ?1")
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![workspace])
            .context("Failed to execute query")?;

        match rows.next().context("Failed to read row")? {
            Some(row) => {
                let json: String = row.get(0)?;
                let status = serde_json::from_str(&json)
                    .context("Failed to parse stored connection status")?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    /// Saves (upserts) the status for `workspace`.
    pub fn save(&self, workspace: &str, status: &ConnectionStatus) -> Result<()> {
        let json = serde_json::to_string(status).context("Failed to serialize status")?;
        let now = Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                r#"
                INSERT INTO connection_status (workspace, status_json, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(workspace) DO UPDATE SET
                    status_json = excluded.status_json,
                    updated_at = excluded.updated_at
                "#,
                params![workspace, json, now],
            )
            .context("Failed to store connection status")?;

        Ok(())
    }

    /// Removes the status for `workspace`. Returns whether a row existed.
    pub fn clear(&self, workspace: &str) -> Result<bool> {
        let rows_affected = self
            .conn()?
            .execute(
                "DELETE FROM connection_status WHERE workspace = ?1",
                params![workspace],
            )
            .context("Failed to delete connection status")?;

        Ok(rows_affected > 0)
    }

    /// Lists every workspace with a stored status.
    pub fn list_workspaces(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT workspace FROM connection_status ORDER BY workspace")
            .context("Failed to prepare query")?;

        let workspaces = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(workspaces)
    }
}
