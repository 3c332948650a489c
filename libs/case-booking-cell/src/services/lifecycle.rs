use tracing::{debug, warn};

use crate::error::CaseBookingError;
use crate::models::CaseStatus;

pub struct CaseLifecycleService;

impl Default for CaseLifecycleService {
    fn default() -> Self {
        Self::new()
    }
}

impl CaseLifecycleService {
    pub fn new() -> Self {
        Self
    }

    /// Validate that a status transition is allowed. Administrators may
    /// force a transition outside the table; the override is logged.
    pub fn validate_status_transition(
        &self,
        current_status: CaseStatus,
        new_status: CaseStatus,
        admin_override: bool,
    ) -> Result<(), CaseBookingError> {
        debug!("Validating status transition from {} to {}", current_status, new_status);

        if self.get_valid_transitions(current_status).contains(&new_status) {
            return Ok(());
        }

        if admin_override && current_status != new_status {
            warn!(
                from = %current_status,
                to = %new_status,
                "Administrator override of case status transition"
            );
            return Ok(());
        }

        warn!("Invalid status transition attempted: {} -> {}", current_status, new_status);
        Err(CaseBookingError::InvalidStatusTransition {
            from: current_status.to_string(),
            to: new_status.to_string(),
        })
    }

    /// Get all valid next statuses for a given current status
    pub fn get_valid_transitions(&self, current_status: CaseStatus) -> Vec<CaseStatus> {
        use CaseStatus::*;

        match current_status {
            CaseBooked => vec![OrderPreparation, CaseCancelled],
            OrderPreparation => vec![OrderPrepared, CaseCancelled],
            OrderPrepared => vec![SalesApproved, PendingDeliveryHospital, CaseCancelled],
            SalesApproved => vec![PendingDeliveryHospital, CaseCancelled],
            PendingDeliveryHospital => vec![DeliveredHospital, CaseCancelled],
            DeliveredHospital => vec![CaseCompleted, CaseCancelled],
            CaseCompleted => vec![PendingDeliveryOffice, CaseCancelled],
            PendingDeliveryOffice => vec![DeliveredOffice, CaseCancelled],
            DeliveredOffice => vec![ToBeBilled, CaseCancelled],
            ToBeBilled => vec![CaseClosed, CaseCancelled],
            // Terminal states - no transitions allowed
            CaseClosed => vec![],
            CaseCancelled => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions_are_valid() {
        let lifecycle = CaseLifecycleService::new();
        let path = [
            CaseStatus::CaseBooked,
            CaseStatus::OrderPreparation,
            CaseStatus::OrderPrepared,
            CaseStatus::SalesApproved,
            CaseStatus::PendingDeliveryHospital,
            CaseStatus::DeliveredHospital,
            CaseStatus::CaseCompleted,
            CaseStatus::PendingDeliveryOffice,
            CaseStatus::DeliveredOffice,
            CaseStatus::ToBeBilled,
            CaseStatus::CaseClosed,
        ];

        for pair in path.windows(2) {
            assert!(lifecycle.validate_status_transition(pair[0], pair[1], false).is_ok());
        }
    }

    #[test]
    fn test_sales_approval_is_optional() {
        let lifecycle = CaseLifecycleService::new();
        assert!(lifecycle
            .validate_status_transition(CaseStatus::OrderPrepared, CaseStatus::PendingDeliveryHospital, false)
            .is_ok());
    }

    #[test]
    fn test_any_open_case_can_be_cancelled() {
        let lifecycle = CaseLifecycleService::new();
        for status in CaseStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(
                lifecycle
                    .validate_status_transition(status, CaseStatus::CaseCancelled, false)
                    .is_ok(),
                "{} should allow cancellation",
                status
            );
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let lifecycle = CaseLifecycleService::new();
        for status in CaseStatus::ALL {
            assert!(lifecycle
                .validate_status_transition(CaseStatus::CaseClosed, status, false)
                .is_err());
            assert!(lifecycle
                .validate_status_transition(CaseStatus::CaseCancelled, status, false)
                .is_err());
        }
    }

    #[test]
    fn test_skipping_steps_requires_admin_override() {
        let lifecycle = CaseLifecycleService::new();
        let result = lifecycle.validate_status_transition(CaseStatus::CaseBooked, CaseStatus::CaseClosed, false);
        assert!(matches!(result, Err(CaseBookingError::InvalidStatusTransition { .. })));

        assert!(lifecycle
            .validate_status_transition(CaseStatus::CaseBooked, CaseStatus::CaseClosed, true)
            .is_ok());
        // Override never allows a no-op transition
        assert!(lifecycle
            .validate_status_transition(CaseStatus::CaseBooked, CaseStatus::CaseBooked, true)
            .is_err());
    }
}
