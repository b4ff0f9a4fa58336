//! SQLite-backed checkpoint store.
//!
//! Each operation opens its own connection and the database runs in WAL
//! mode, so a listing from one process proceeds while another is writing a
//! checkpoint.

use super::CheckpointStore;
use crate::checkpoint::{Checkpoint, CheckpointSummary, timestamp_key};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable store in a single SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    path: PathBuf,
}

impl SqliteCheckpointStore {
    /// Open or create the database at `path`.
    ///
    /// Creates the parent directory and schema if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self { path };
        let conn = store.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                instance_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                description TEXT NOT NULL,
                package_count INTEGER NOT NULL,
                service_count INTEGER NOT NULL,
                user_count INTEGER NOT NULL,
                file_count INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_instance_created
                ON checkpoints(instance_name, created_at);
            ",
        )?;
        Ok(store)
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

fn parse_timestamp(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            message: format!("bad created_at '{}': {}", raw, e),
        })
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let body = serde_json::to_string(checkpoint)?;
        let summary = checkpoint.summary();
        let conn = self.connect()?;
        let inserted = conn.execute(
            "INSERT INTO checkpoints
                (id, instance_name, created_at, description,
                 package_count, service_count, user_count, file_count, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                summary.id,
                summary.instance_name,
                timestamp_key(summary.created_at),
                summary.description,
                summary.package_count as i64,
                summary.service_count as i64,
                summary.user_count as i64,
                summary.file_count as i64,
                body,
            ],
        );
        match inserted {
            Ok(_) => {
                log::debug!("Stored checkpoint {}", checkpoint.id);
                Ok(())
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::Duplicate(checkpoint.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.connect()?;
        let body: Option<String> = conn
            .query_row("SELECT body FROM checkpoints WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;

        body.map(|body| {
            serde_json::from_str(&body).map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    fn list(&self, instance: &str) -> Result<Vec<CheckpointSummary>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, description,
                    package_count, service_count, user_count, file_count
             FROM checkpoints
             WHERE instance_name = ?1
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([instance], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    [
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ],
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, created_at, description, counts)| {
                let created_at = parse_timestamp(&id, &created_at)?;
                Ok(CheckpointSummary {
                    instance_name: instance.to_string(),
                    created_at,
                    description,
                    package_count: counts[0] as usize,
                    service_count: counts[1] as usize,
                    user_count: counts[2] as usize,
                    file_count: counts[3] as usize,
                    id,
                })
            })
            .collect()
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM checkpoints WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }
}
