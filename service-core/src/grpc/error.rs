//! Error conversion between `AppError` and `tonic::Status`.
//!
//! | AppError | gRPC Status |
//! |----------|-------------|
//! | `BadRequest` | `INVALID_ARGUMENT` |
//! | `NotFound` | `NOT_FOUND` |
//! | `Conflict` | `ALREADY_EXISTS` |
//! | `ServiceUnavailable` | `UNAVAILABLE` |
//! | `InternalError`, `DatabaseError`, `ConfigError` | `INTERNAL` |
//!
//! Infrastructure details are logged and never returned to callers.

use tonic::{Code, Status};

use crate::error::AppError;

/// Extension trait for converting types into `tonic::Status`.
pub trait IntoStatus {
    /// Convert into a `tonic::Status`.
    fn into_status(self) -> Status;
}

impl IntoStatus for AppError {
    fn into_status(self) -> Status {
        match self {
            AppError::BadRequest(err) => Status::invalid_argument(err.to_string()),
            AppError::NotFound(err) => Status::not_found(err.to_string()),
            AppError::Conflict(err) => Status::already_exists(err.to_string()),
            AppError::ServiceUnavailable => Status::unavailable("Service unavailable"),
            AppError::InternalError(err) => {
                tracing::error!(error = %err, "Internal error");
                Status::internal("Internal server error")
            }
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                Status::internal("Database error")
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                Status::internal("Configuration error")
            }
        }
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        err.into_status()
    }
}

/// Map a status received from a gRPC call back into an `AppError`.
impl From<Status> for AppError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            Code::NotFound => AppError::NotFound(anyhow::anyhow!(message)),
            Code::AlreadyExists => AppError::Conflict(anyhow::anyhow!(message)),
            Code::Unavailable => AppError::ServiceUnavailable,
            code => AppError::InternalError(anyhow::anyhow!("{:?}: {}", code, message)),
        }
    }
}

/// Result type alias for gRPC handlers.
pub type GrpcResult<T> = Result<tonic::Response<T>, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_keeps_message() {
        let status: Status = AppError::NotFound(anyhow::anyhow!("Fee schedule missing")).into();
        assert_eq!(status.code(), Code::NotFound);
        assert!(status.message().contains("Fee schedule missing"));
    }

    #[test]
    fn database_error_is_opaque() {
        let status: Status =
            AppError::DatabaseError(anyhow::anyhow!("relation payment_records does not exist"))
                .into();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "Database error");
    }

    #[test]
    fn failed_precondition_round_trips_as_bad_request() {
        let err: AppError = Status::failed_precondition("archived").into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
