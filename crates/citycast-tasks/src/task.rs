//! Task identity, lifecycle states and result shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use citycast_weather::ResultRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique id generated at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a caller-supplied id; anything that is not a UUID is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle: PENDING -> RUNNING -> SUCCESS | FAILURE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Success)
                | (TaskStatus::Running, TaskStatus::Failure)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCESS" => Ok(TaskStatus::Success),
            "FAILURE" => Ok(TaskStatus::Failure),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Region label -> records produced by one task.
///
/// Records inside a bucket are in completion order, which is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionBuckets(BTreeMap<String, Vec<ResultRecord>>);

impl RegionBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, region: impl Into<String>, record: ResultRecord) {
        self.0.entry(region.into()).or_default().push(record);
    }

    pub fn get(&self, region: &str) -> Option<&[ResultRecord]> {
        self.0.get(region).map(Vec::as_slice)
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ResultRecord])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Total number of records across all buckets
    pub fn record_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }
}

/// Terminal error stored for a failed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    #[error("Weather lookup failed for {city}: {message}")]
    Fetch { city: String, message: String },

    #[error("Weather lookup for {city} timed out")]
    Timeout { city: String },

    #[error("Failed to persist results: {message}")]
    Persistence { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Stored state of one task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub status: TaskStatus,
    pub result: Option<RegionBuckets>,
    pub error: Option<TaskFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn pending(id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Answer to a status lookup.
///
/// `exists` comes from the backing store itself, so an id that was never
/// submitted is never mistaken for one that is still pending.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusReport {
    pub exists: bool,
    pub status: Option<TaskStatus>,
    pub result: Option<RegionBuckets>,
    pub error: Option<TaskFailure>,
}

impl TaskStatusReport {
    pub fn missing() -> Self {
        Self {
            exists: false,
            status: None,
            result: None,
            error: None,
        }
    }
}

impl From<TaskRecord> for TaskStatusReport {
    fn from(record: TaskRecord) -> Self {
        Self {
            exists: true,
            status: Some(record.status),
            result: record.result,
            error: record.error,
        }
    }
}

/// Caller-facing view of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskView {
    Completed { result: RegionBuckets },
    Failed { error: TaskFailure },
    Pending,
    Running,
    Unknown,
}

impl From<TaskStatusReport> for TaskView {
    fn from(report: TaskStatusReport) -> Self {
        match (report.exists, report.status) {
            (false, _) | (true, None) => TaskView::Unknown,
            (true, Some(TaskStatus::Pending)) => TaskView::Pending,
            (true, Some(TaskStatus::Running)) => TaskView::Running,
            (true, Some(TaskStatus::Success)) => TaskView::Completed {
                result: report.result.unwrap_or_default(),
            },
            (true, Some(TaskStatus::Failure)) => match report.error {
                Some(error) => TaskView::Failed { error },
                None => TaskView::Failed {
                    error: TaskFailure::Internal {
                        message: "task failed without a recorded error".to_string(),
                    },
                },
            },
        }
    }
}
