use thiserror::Error;

use case_booking_cell::CaseBookingError;
use offline_sync_cell::SyncError;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Invalid notification rule: {0}")]
    InvalidRule(String),

    #[error("Template error: {0}")]
    Template(#[from] regex::Error),

    #[error("Email dispatch failed: {0}")]
    Dispatch(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Booking(#[from] CaseBookingError),

    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}
