//! Asynchronous weather tasks for citycast
//!
//! A submitted task canonicalizes its city names, looks every city up
//! concurrently, groups the results by region and persists one object per
//! (region, task). Task status lives in a [`StatusStore`]; persisted objects
//! are read back per region through the [`ResultStore`].

pub mod app;
mod error_mapping;
pub mod orchestrator;
pub mod results;
pub mod service;
pub mod status;
pub mod task;

pub use app::App;
pub use orchestrator::{Orchestrator, TaskLimits};
pub use results::{PersistError, ReadError, ResultStore};
pub use service::{ServiceError, TaskService};
pub use status::{
    MemoryStatusStore, SqliteStatusStore, StatusBackend, StatusError, StatusResult, StatusStore,
};
pub use task::{
    RegionBuckets, TaskFailure, TaskId, TaskRecord, TaskStatus, TaskStatusReport, TaskView,
};
