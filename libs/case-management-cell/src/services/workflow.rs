use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use case_booking_cell::{
    CaseAmendment, CaseBooking, CaseBookingError, CaseLifecycleService, CaseQuantity, CaseReference,
    CaseStatus, NewCaseRequest, StatusUpdate,
};
use notification_cell::NotificationOutbox;
use offline_sync_cell::HybridStorage;
use shared_models::auth::User;

use crate::models::{CaseWorkflowError, CaseWriteResult, StatusChangeRequest};

/// Case create, status and amendment workflow on top of the hybrid store.
pub struct CaseWorkflowService {
    storage: Arc<HybridStorage>,
    outbox: Arc<NotificationOutbox>,
    lifecycle: CaseLifecycleService,
}

impl CaseWorkflowService {
    pub fn new(storage: Arc<HybridStorage>, outbox: Arc<NotificationOutbox>) -> Self {
        Self {
            storage,
            outbox,
            lifecycle: CaseLifecycleService::new(),
        }
    }

    pub fn storage(&self) -> &Arc<HybridStorage> {
        &self.storage
    }

    #[instrument(skip(self, request, actor), fields(country = %request.country))]
    pub async fn create_case(&self, request: NewCaseRequest, actor: &User) -> Result<CaseWriteResult, CaseWorkflowError> {
        validate_new_case(&request)?;

        let sequence = self.storage.next_case_sequence(&request.country).await?;
        let reference = CaseReference::generate(&request.country, sequence);
        let item_quantities = request.quantities.clone();
        let case = CaseBooking::from_request(request, reference, actor.display_name());

        let quantities: Vec<CaseQuantity> = item_quantities
            .into_iter()
            .filter(|q| q.quantity > 0)
            .map(|q| CaseQuantity {
                case_id: case.id,
                item_type: q.item_type,
                item_name: q.item_name,
                quantity: q.quantity,
            })
            .collect();

        let sync = self.storage.create_case(&case, &quantities).await?;
        info!(reference = %case.case_reference_number, ?sync, "Case booked");

        self.record_notification(&case, CaseStatus::CaseBooked, &actor.display_name()).await;
        Ok(CaseWriteResult { case, sync })
    }

    pub async fn get_case(&self, case_id: Uuid) -> Result<CaseBooking, CaseWorkflowError> {
        self.storage
            .get_case(case_id)
            .await?
            .ok_or_else(|| CaseBookingError::NotFound(case_id.to_string()).into())
    }

    pub async fn list_cases(&self, country: Option<&str>) -> Result<Vec<CaseBooking>, CaseWorkflowError> {
        Ok(self.storage.list_cases(country).await?)
    }

    /// Moves a case to a new status. Transitions outside the table are
    /// refused unless the actor is an administrator.
    #[instrument(skip(self, change, actor), fields(status = %change.status))]
    pub async fn update_status(
        &self,
        case_id: Uuid,
        change: StatusChangeRequest,
        actor: &User,
    ) -> Result<CaseWriteResult, CaseWorkflowError> {
        let mut case = self.get_case(case_id).await?;
        self.lifecycle
            .validate_status_transition(case.status, change.status, actor.is_admin())?;

        let processed_by = actor.display_name();
        let update = StatusUpdate {
            case_id,
            status: change.status,
            processed_by: processed_by.clone(),
            details: change.details,
            artifacts: change.artifacts,
            timestamp: Utc::now(),
        };
        let entry = case.apply_status_update(&update);

        let sync = self.storage.update_case_status(&case, &entry).await?;
        info!(reference = %case.case_reference_number, ?sync, "Case status updated");

        self.record_notification(&case, change.status, &processed_by).await;
        Ok(CaseWriteResult { case, sync })
    }

    /// A case may be amended once; administrators may amend it again.
    #[instrument(skip(self, amendment, actor))]
    pub async fn amend_case(
        &self,
        case_id: Uuid,
        amendment: CaseAmendment,
        actor: &User,
    ) -> Result<CaseWriteResult, CaseWorkflowError> {
        let mut case = self.get_case(case_id).await?;
        if case.is_amended && !actor.is_admin() {
            return Err(CaseBookingError::AlreadyAmended(case.case_reference_number).into());
        }

        let entry = case
            .apply_amendment(&amendment, &actor.display_name())
            .ok_or_else(|| CaseWorkflowError::InvalidRequest("Amendment changes nothing".to_string()))?;

        let sync = self.storage.amend_case(&case, &entry).await?;
        info!(
            reference = %case.case_reference_number,
            fields = entry.changes.len(),
            ?sync,
            "Case amended"
        );
        Ok(CaseWriteResult { case, sync })
    }

    // The status change is already stored, so a failed record only loses the e-mail
    async fn record_notification(&self, case: &CaseBooking, status: CaseStatus, changed_by: &str) {
        if let Err(e) = self.outbox.record(case, status, changed_by).await {
            warn!(case_id = %case.id, "Failed to record notification: {}", e);
        }
    }
}

fn validate_new_case(request: &NewCaseRequest) -> Result<(), CaseWorkflowError> {
    let required = [
        ("hospital", &request.hospital),
        ("department", &request.department),
        ("procedureType", &request.procedure_type),
        ("procedureName", &request.procedure_name),
        ("country", &request.country),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(CaseWorkflowError::InvalidRequest(format!("{} is required", field)));
    }
    Ok(())
}
