//! Task status storage.
//!
//! `StatusBackend` is the synchronous contract a backing store implements
//! (SQLite, in-memory). `StatusStore` wraps a backend with async methods so
//! the orchestrator never blocks the runtime on storage I/O.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use citycast_core::StorageError;
use parking_lot::Mutex;
use thiserror::Error;

use crate::task::{RegionBuckets, TaskFailure, TaskId, TaskRecord, TaskStatus, TaskStatusReport};

pub use memory::MemoryStatusStore;
pub use sqlite::SqliteStatusStore;

/// Errors that can occur during status store operations.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The id was never enqueued.
    #[error("Task not found: {0}")]
    UnknownTask(TaskId),

    /// The id is already registered.
    #[error("Task already exists: {0}")]
    AlreadyExists(TaskId),

    /// The lifecycle does not allow this change.
    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Backing store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Stored payload could not be encoded or decoded.
    #[error("Status payload error: {0}")]
    Payload(String),
}

/// Result type for status store operations.
pub type StatusResult<T> = Result<T, StatusError>;

/// Contract for task status backends.
///
/// Implementations must reject transitions the lifecycle forbids, so a task
/// reaches exactly one terminal status.
pub trait StatusBackend: Send {
    /// Register a new task as PENDING.
    fn enqueue(&self, id: &TaskId) -> StatusResult<()>;

    /// Move a PENDING task to RUNNING.
    fn set_running(&self, id: &TaskId) -> StatusResult<()>;

    /// Move a RUNNING task to SUCCESS with its region buckets.
    fn set_success(&self, id: &TaskId, result: &RegionBuckets) -> StatusResult<()>;

    /// Move a RUNNING task to FAILURE with the triggering error.
    fn set_failure(&self, id: &TaskId, error: &TaskFailure) -> StatusResult<()>;

    /// Fetch the stored record, `None` if the id was never enqueued.
    fn get(&self, id: &TaskId) -> StatusResult<Option<TaskRecord>>;

    /// Explicit existence check against the backing store.
    fn exists(&self, id: &TaskId) -> StatusResult<bool> {
        Ok(self.get(id)?.is_some())
    }
}

/// Shared check used by backends before applying a transition.
pub(crate) fn check_transition(
    id: &TaskId,
    current: Option<TaskStatus>,
    next: TaskStatus,
) -> StatusResult<()> {
    match current {
        None => Err(StatusError::UnknownTask(*id)),
        Some(from) if from.can_transition_to(next) => Ok(()),
        Some(from) => Err(StatusError::InvalidTransition {
            id: *id,
            from,
            to: next,
        }),
    }
}

/// Async status store client over one of the supported backends.
#[derive(Clone)]
pub enum StatusStore {
    /// Durable SQLite storage.
    Sqlite(Arc<Mutex<SqliteStatusStore>>),

    /// Process-local storage, lost on exit.
    Memory(Arc<MemoryStatusStore>),
}

impl StatusStore {
    pub fn sqlite(store: SqliteStatusStore) -> Self {
        Self::Sqlite(Arc::new(Mutex::new(store)))
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(MemoryStatusStore::new()))
    }

    async fn with_backend<T, F>(&self, op: F) -> StatusResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StatusBackend) -> StatusResult<T> + Send + 'static,
    {
        match self {
            Self::Sqlite(store) => {
                let store = Arc::clone(store);
                tokio::task::spawn_blocking(move || op(&*store.lock()))
                    .await
                    .map_err(|e| {
                        StatusError::Storage(StorageError::QueryFailed(format!(
                            "status worker failed: {}",
                            e
                        )))
                    })?
            }
            Self::Memory(store) => op(store.as_ref()),
        }
    }

    pub async fn enqueue(&self, id: &TaskId) -> StatusResult<()> {
        let id = *id;
        self.with_backend(move |b| b.enqueue(&id)).await
    }

    pub async fn set_running(&self, id: &TaskId) -> StatusResult<()> {
        let id = *id;
        self.with_backend(move |b| b.set_running(&id)).await
    }

    pub async fn set_success(&self, id: &TaskId, result: &RegionBuckets) -> StatusResult<()> {
        let id = *id;
        let result = result.clone();
        self.with_backend(move |b| b.set_success(&id, &result)).await
    }

    pub async fn set_failure(&self, id: &TaskId, error: &TaskFailure) -> StatusResult<()> {
        let id = *id;
        let error = error.clone();
        self.with_backend(move |b| b.set_failure(&id, &error)).await
    }

    /// Status, payload and existence of a task in one answer.
    pub async fn get_status(&self, id: &TaskId) -> StatusResult<TaskStatusReport> {
        let id = *id;
        self.with_backend(move |b| {
            if !b.exists(&id)? {
                return Ok(TaskStatusReport::missing());
            }
            Ok(b.get(&id)?
                .map(TaskStatusReport::from)
                .unwrap_or_else(TaskStatusReport::missing))
        })
        .await
    }
}
