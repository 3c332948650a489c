use thiserror::Error;
use uuid::Uuid;

use case_booking_cell::CaseBookingError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local storage quota exceeded while writing {0}")]
    QuotaExceeded(String),

    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Dead letter not found: {0}")]
    DeadLetterNotFound(Uuid),

    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Data validation failed: {0}")]
    Validation(String),

    #[error("Remote rejected the operation: {0}")]
    Rejected(String),

    #[error(transparent)]
    Booking(#[from] CaseBookingError),
}
