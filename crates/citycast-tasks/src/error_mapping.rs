//! Maps task errors to citycast_core::AppError for consistent operator-facing messages.

use citycast_core::AppError;

use crate::results::ReadError;
use crate::service::ServiceError;
use crate::status::StatusError;

impl From<StatusError> for AppError {
    fn from(e: StatusError) -> Self {
        match e {
            StatusError::Storage(e) => AppError::Storage(e),
            StatusError::UnknownTask(id) => AppError::NotFound(format!("task {}", id)),
            other => AppError::Service(other.to_string()),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Status(e) => e.into(),
            other => AppError::Service(other.to_string()),
        }
    }
}

impl From<ReadError> for AppError {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::RegionNotFound(region) => AppError::NotFound(format!("region {}", region)),
            ReadError::Io { source, .. } => AppError::Io(source),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::task::{TaskId, TaskStatus};
    use citycast_core::StorageError;

    #[test]
    fn test_status_errors_map() {
        let storage = AppError::from(StatusError::Storage(StorageError::ConnectionFailed(
            "locked".into(),
        )));
        assert!(matches!(storage, AppError::Storage(StorageError::ConnectionFailed(_))));
        assert!(storage.user_message().contains("task storage"));

        let transition = AppError::from(StatusError::InvalidTransition {
            id: TaskId::new(),
            from: TaskStatus::Success,
            to: TaskStatus::Running,
        });
        assert!(matches!(transition, AppError::Service(_)));
    }

    #[test]
    fn test_service_errors_map_through_status() {
        let err = AppError::from(ServiceError::Status(StatusError::Storage(
            StorageError::Corruption("bad row".into()),
        )));
        assert!(matches!(err, AppError::Storage(StorageError::Corruption(_))));

        assert!(matches!(
            AppError::from(ServiceError::ReadOnly),
            AppError::Service(_)
        ));
    }

    #[test]
    fn test_missing_region_is_not_found() {
        let err = AppError::from(ReadError::RegionNotFound("Asia".into()));
        assert!(matches!(&err, AppError::NotFound(what) if what == "region Asia"));
        assert_eq!(err.user_message(), "Nothing was found for that request.");
    }
}
