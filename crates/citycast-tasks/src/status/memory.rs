use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use super::{check_transition, StatusBackend, StatusError, StatusResult};
use crate::task::{RegionBuckets, TaskFailure, TaskId, TaskRecord, TaskStatus};

/// Process-local status storage
#[derive(Default)]
pub struct MemoryStatusStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    fn transition(
        &self,
        id: &TaskId,
        next: TaskStatus,
        apply: impl FnOnce(&mut TaskRecord),
    ) -> StatusResult<()> {
        // Check and write under one lock so terminal states cannot race.
        let mut tasks = self.tasks.write();
        let record = tasks.get_mut(id);
        check_transition(id, record.as_ref().map(|r| r.status), next)?;

        if let Some(record) = record {
            record.status = next;
            record.updated_at = Utc::now();
            apply(record);
        }
        Ok(())
    }
}

impl StatusBackend for MemoryStatusStore {
    fn enqueue(&self, id: &TaskId) -> StatusResult<()> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(id) {
            return Err(StatusError::AlreadyExists(*id));
        }
        tasks.insert(*id, TaskRecord::pending(*id));
        Ok(())
    }

    fn set_running(&self, id: &TaskId) -> StatusResult<()> {
        self.transition(id, TaskStatus::Running, |_| {})
    }

    fn set_success(&self, id: &TaskId, result: &RegionBuckets) -> StatusResult<()> {
        self.transition(id, TaskStatus::Success, |record| {
            record.result = Some(result.clone());
        })
    }

    fn set_failure(&self, id: &TaskId, error: &TaskFailure) -> StatusResult<()> {
        self.transition(id, TaskStatus::Failure, |record| {
            record.error = Some(error.clone());
        })
    }

    fn get(&self, id: &TaskId) -> StatusResult<Option<TaskRecord>> {
        Ok(self.tasks.read().get(id).cloned())
    }

    fn exists(&self, id: &TaskId) -> StatusResult<bool> {
        Ok(self.tasks.read().contains_key(id))
    }
}
