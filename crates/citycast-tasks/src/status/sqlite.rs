use std::path::Path;

use chrono::{DateTime, Utc};
use citycast_core::{RusqliteErrorExt, StorageError};
use rusqlite::{params, Connection, OptionalExtension};

use super::{check_transition, StatusBackend, StatusError, StatusResult};
use crate::task::{RegionBuckets, TaskFailure, TaskId, TaskRecord, TaskStatus};

/// Durable task status storage in a single SQLite file
pub struct SqliteStatusStore {
    conn: Connection,
}

impl SqliteStatusStore {
    /// Open or create the database, creating parent directories as needed
    pub fn open(path: &Path) -> StatusResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::ConnectionFailed(format!("{}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path).map_err(RusqliteErrorExt::into_storage_error)?;
        let store = Self { conn };
        store.init_schema()?;

        tracing::debug!("Task status database ready at {}", path.display());
        Ok(store)
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> StatusResult<Self> {
        let conn = Connection::open_in_memory().map_err(RusqliteErrorExt::into_storage_error)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StatusResult<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                result TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);",
            )
            .map_err(RusqliteErrorExt::into_storage_error)?;
        Ok(())
    }

    fn current_status(&self, id: &TaskId) -> StatusResult<Option<TaskStatus>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(RusqliteErrorExt::into_storage_error)?;

        raw.map(|s| s.parse::<TaskStatus>().map_err(StatusError::Payload))
            .transpose()
    }

    /// Apply a transition guarded on the status we just read, so a concurrent
    /// writer cannot slip a second terminal state in between.
    fn transition(
        &self,
        id: &TaskId,
        next: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> StatusResult<()> {
        let current = self.current_status(id)?;
        check_transition(id, current, next)?;

        let from = current.map(|s| s.as_str()).unwrap_or_default();
        let changed = self
            .conn
            .execute(
                "UPDATE tasks SET status = ?1, result = ?2, error = ?3, updated_at = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    next.as_str(),
                    result,
                    error,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    from
                ],
            )
            .map_err(RusqliteErrorExt::into_storage_error)?;

        if changed == 0 {
            let now = self.current_status(id)?;
            check_transition(id, now, next)?;
            return Err(StorageError::WriteFailed(format!("status update for {} was lost", id)).into());
        }
        Ok(())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StatusResult<String> {
    serde_json::to_string(value).map_err(|e| StatusError::Payload(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(raw: Option<String>) -> StatusResult<Option<T>> {
    raw.map(|s| serde_json::from_str(&s).map_err(|e| StatusError::Payload(e.to_string())))
        .transpose()
}

fn parse_time(raw: &str) -> StatusResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StatusError::Payload(format!("bad timestamp {}: {}", raw, e)))
}

impl StatusBackend for SqliteStatusStore {
    fn enqueue(&self, id: &TaskId) -> StatusResult<()> {
        let record = TaskRecord::pending(*id);
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO tasks (id, status, result, error, created_at, updated_at)
                 VALUES (?1, ?2, NULL, NULL, ?3, ?4)",
                params![
                    id.to_string(),
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339()
                ],
            )
            .map_err(RusqliteErrorExt::into_storage_error)?;

        if inserted == 0 {
            return Err(StatusError::AlreadyExists(*id));
        }
        Ok(())
    }

    fn set_running(&self, id: &TaskId) -> StatusResult<()> {
        self.transition(id, TaskStatus::Running, None, None)
    }

    fn set_success(&self, id: &TaskId, result: &RegionBuckets) -> StatusResult<()> {
        self.transition(id, TaskStatus::Success, Some(encode(result)?), None)
    }

    fn set_failure(&self, id: &TaskId, error: &TaskFailure) -> StatusResult<()> {
        self.transition(id, TaskStatus::Failure, None, Some(encode(error)?))
    }

    fn get(&self, id: &TaskId) -> StatusResult<Option<TaskRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT status, result, error, created_at, updated_at FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(RusqliteErrorExt::into_storage_error)?;

        let Some((status, result, error, created_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(TaskRecord {
            id: *id,
            status: status.parse().map_err(StatusError::Payload)?,
            result: decode(result)?,
            error: decode(error)?,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        }))
    }

    fn exists(&self, id: &TaskId) -> StatusResult<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(RusqliteErrorExt::into_storage_error)?;
        Ok(count > 0)
    }
}
