use thiserror::Error;

use shared_database::SupabaseError;

#[derive(Error, Debug)]
pub enum CaseBookingError {
    #[error("Case not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Case {0} has already been amended; only administrators may amend it again")]
    AlreadyAmended(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Row mapping error: {0}")]
    Mapping(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

impl CaseBookingError {
    /// Permission failures from the backend are surfaced immediately, never retried.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            CaseBookingError::Remote(e) => e
                .downcast_ref::<SupabaseError>()
                .map(SupabaseError::is_auth)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Failures that a retry cannot fix: business rules, validation, and
    /// client-side (4xx) rejections other than timeouts and rate limits.
    pub fn is_permanent(&self) -> bool {
        match self {
            CaseBookingError::Remote(e) => match e.downcast_ref::<SupabaseError>() {
                Some(SupabaseError::Api { status, .. }) => {
                    (400..500).contains(status) && *status != 408 && *status != 429
                }
                Some(_) => true,
                None => false,
            },
            _ => true,
        }
    }
}
