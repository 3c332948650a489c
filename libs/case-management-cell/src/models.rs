use serde::{Deserialize, Serialize};
use thiserror::Error;

use case_booking_cell::{CaseBooking, CaseBookingError, CaseStatus, StatusArtifacts};
use offline_sync_cell::{SyncError, WriteOutcome};
use shared_models::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct StatusChangeRequest {
    pub status: CaseStatus,
    pub details: Option<String>,
    #[serde(default)]
    pub artifacts: StatusArtifacts,
}

#[derive(Debug, Deserialize)]
pub struct CaseListQuery {
    pub country: Option<String>,
}

/// A case after a write, and whether the write reached the backend.
#[derive(Debug, Clone, Serialize)]
pub struct CaseWriteResult {
    pub case: CaseBooking,
    pub sync: WriteOutcome,
}

#[derive(Error, Debug)]
pub enum CaseWorkflowError {
    #[error(transparent)]
    Booking(#[from] CaseBookingError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Invalid case request: {0}")]
    InvalidRequest(String),
}

impl From<CaseWorkflowError> for AppError {
    fn from(e: CaseWorkflowError) -> Self {
        match e {
            CaseWorkflowError::InvalidRequest(msg) => AppError::ValidationError(msg),
            CaseWorkflowError::Booking(e) => booking_error(e),
            CaseWorkflowError::Sync(SyncError::Booking(e)) => booking_error(e),
            CaseWorkflowError::Sync(SyncError::PermissionDenied(msg)) => AppError::Forbidden(msg),
            CaseWorkflowError::Sync(SyncError::Validation(msg)) => AppError::ValidationError(msg),
            CaseWorkflowError::Sync(SyncError::DeadLetterNotFound(id)) => {
                AppError::NotFound(format!("Dead letter {} not found", id))
            }
            CaseWorkflowError::Sync(e @ (SyncError::Unavailable(_) | SyncError::Rejected(_))) => {
                AppError::ExternalService(e.to_string())
            }
            CaseWorkflowError::Sync(e) => AppError::Internal(e.to_string()),
        }
    }
}

fn booking_error(e: CaseBookingError) -> AppError {
    match e {
        CaseBookingError::NotFound(msg) => AppError::NotFound(msg),
        e @ (CaseBookingError::InvalidStatusTransition { .. } | CaseBookingError::AlreadyAmended(_)) => {
            AppError::BusinessRule(e.to_string())
        }
        CaseBookingError::Validation(msg) => AppError::ValidationError(msg),
        e if e.is_permission_denied() => AppError::Forbidden(e.to_string()),
        e => AppError::Database(e.to_string()),
    }
}
