//! Caller-facing task API: submit, poll, query region history.

use std::io;
use std::sync::Arc;

use citycast_weather::ResultRecord;
use thiserror::Error;
use tokio_util::task::TaskTracker;

use crate::orchestrator::Orchestrator;
use crate::results::{ReadError, ResultStore};
use crate::status::{StatusError, StatusStore};
use crate::task::{TaskId, TaskView};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Task service is shutting down")]
    ShuttingDown,

    #[error("Task service was opened read-only")]
    ReadOnly,

    #[error(transparent)]
    Status(#[from] StatusError),
}

#[derive(Clone)]
pub struct TaskService {
    /// Absent for a read-only service
    orchestrator: Option<Arc<Orchestrator>>,
    status: StatusStore,
    results: ResultStore,
    tracker: TaskTracker,
}

impl TaskService {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            status: orchestrator.status_store().clone(),
            results: orchestrator.result_store().clone(),
            orchestrator: Some(Arc::new(orchestrator)),
            tracker: TaskTracker::new(),
        }
    }

    /// A service that answers status and region queries but refuses
    /// submissions. Needs neither a provider nor the mapping tables.
    pub fn reader(status: StatusStore, results: ResultStore) -> Self {
        Self {
            orchestrator: None,
            status,
            results,
            tracker: TaskTracker::new(),
        }
    }

    /// Register a task as PENDING and start its pipeline in the background.
    ///
    /// Returns as soon as the task is recorded; city validity plays no part.
    pub async fn submit(&self, cities: Vec<String>) -> Result<TaskId, ServiceError> {
        let orchestrator = self.orchestrator.as_ref().ok_or(ServiceError::ReadOnly)?;
        if self.tracker.is_closed() {
            return Err(ServiceError::ShuttingDown);
        }

        let id = TaskId::new();
        self.status.enqueue(&id).await?;
        tracing::info!("Task {} submitted with {} cities", id, cities.len());

        let orchestrator = Arc::clone(orchestrator);
        self.tracker.spawn(async move {
            if let Err(e) = orchestrator.run(id, cities).await {
                tracing::error!("Task {} could not record its status: {}", id, e);
            }
        });

        Ok(id)
    }

    pub async fn status(&self, id: &TaskId) -> Result<TaskView, ServiceError> {
        let report = self.status.get_status(id).await?;
        Ok(TaskView::from(report))
    }

    /// Status lookup by a caller-supplied id; malformed ids are unknown
    pub async fn status_by_str(&self, raw: &str) -> Result<TaskView, ServiceError> {
        match TaskId::parse(raw) {
            Some(id) => self.status(&id).await,
            None => Ok(TaskView::Unknown),
        }
    }

    pub async fn region_results(&self, region: &str) -> Result<Vec<ResultRecord>, ReadError> {
        let store = self.results.clone();
        let region = region.to_string();
        let root = store.root().to_path_buf();

        tokio::task::spawn_blocking(move || store.list_region_results(&region))
            .await
            .map_err(|e| ReadError::Io {
                path: root,
                source: io::Error::other(e.to_string()),
            })?
    }

    /// Number of submitted tasks whose pipeline has not finished
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait for every in-flight task to finish
    pub async fn shutdown(&self) {
        self.tracker.close();
        let pending = self.in_flight();
        if pending > 0 {
            tracing::info!("Waiting for {} in-flight tasks", pending);
        }
        self.tracker.wait().await;
    }
}
