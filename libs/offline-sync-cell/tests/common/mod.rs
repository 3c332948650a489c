#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use case_booking_cell::*;
use offline_sync_cell::*;
use shared_config::SyncSettings;
use shared_database::SupabaseError;

/// In-memory backend that can be switched into failure modes.
pub struct FlakyRepository {
    pub inner: InMemoryBookingRepository,
    unreachable: AtomicBool,
    forbidden: AtomicBool,
    pub calls: AtomicU32,
}

impl FlakyRepository {
    pub fn new() -> Self {
        Self {
            inner: InMemoryBookingRepository::new(),
            unreachable: AtomicBool::new(false),
            forbidden: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_forbidden(&self, forbidden: bool) {
        self.forbidden.store(forbidden, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CaseBookingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.forbidden.load(Ordering::SeqCst) {
            return Err(CaseBookingError::Remote(
                SupabaseError::Auth("permission denied for table case_bookings".to_string()).into(),
            ));
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CaseBookingError::Remote(anyhow::anyhow!("error sending request: connection refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for FlakyRepository {
    async fn insert_case(&self, case: &CaseBooking, quantities: &[CaseQuantity]) -> Result<CaseBooking, CaseBookingError> {
        self.check()?;
        self.inner.insert_case(case, quantities).await
    }

    async fn update_case(&self, case: &CaseBooking) -> Result<CaseBooking, CaseBookingError> {
        self.check()?;
        self.inner.update_case(case).await
    }

    async fn update_case_status(&self, case: &CaseBooking, entry: &StatusHistoryEntry) -> Result<(), CaseBookingError> {
        self.check()?;
        self.inner.update_case_status(case, entry).await
    }

    async fn record_amendment(&self, case: &CaseBooking, entry: &AmendmentHistoryEntry) -> Result<(), CaseBookingError> {
        self.check()?;
        self.inner.record_amendment(case, entry).await
    }

    async fn insert_status_history(&self, entry: &StatusHistoryEntry) -> Result<(), CaseBookingError> {
        self.check()?;
        self.inner.insert_status_history(entry).await
    }

    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseBooking>, CaseBookingError> {
        self.check()?;
        self.inner.get_case(case_id).await
    }

    async fn list_cases(&self, country: Option<&str>) -> Result<Vec<CaseBooking>, CaseBookingError> {
        self.check()?;
        self.inner.list_cases(country).await
    }

    async fn get_case_quantities(&self, case_id: Uuid) -> Result<Vec<CaseQuantity>, CaseBookingError> {
        self.check()?;
        self.inner.get_case_quantities(case_id).await
    }

    async fn next_case_sequence(&self, country: &str) -> Result<u32, CaseBookingError> {
        self.check()?;
        self.inner.next_case_sequence(country).await
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, CaseBookingError> {
        self.check()?;
        self.inner.list_users().await
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, CaseBookingError> {
        self.check()?;
        self.inner.insert_user(user).await
    }

    async fn update_user(&self, user: &UserProfile) -> Result<UserProfile, CaseBookingError> {
        self.check()?;
        self.inner.update_user(user).await
    }

    async fn ping(&self) -> Result<(), CaseBookingError> {
        self.check()
    }
}

pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        sync_item_delay_ms: 1,
        retry_base_delay_ms: 1,
        sync_interval_seconds: 3600,
        health_probe_interval_seconds: 3600,
        strict_data_validation: false,
        ..SyncSettings::default()
    }
}

pub fn sample_case(country: &str, sequence: u32) -> CaseBooking {
    let request = NewCaseRequest {
        hospital: "Mount Elizabeth Hospital".to_string(),
        department: "Orthopedics".to_string(),
        procedure_type: "Knee Replacement".to_string(),
        procedure_name: "Total Knee Arthroplasty".to_string(),
        doctor_name: Some("Dr. Lim".to_string()),
        date_of_surgery: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
        time_of_procedure: Some("09:30".to_string()),
        surgery_set_selection: vec!["Knee Set A".to_string()],
        implant_box: vec!["Implant Box 3".to_string()],
        special_instruction: None,
        country: country.to_string(),
        quantities: Vec::new(),
    };
    CaseBooking::from_request(request, CaseReference::generate(country, sequence), "Jane Tan".to_string())
}

pub fn advance(case: &mut CaseBooking, status: CaseStatus) -> StatusHistoryEntry {
    case.apply_status_update(&StatusUpdate {
        case_id: case.id,
        status,
        processed_by: "Ops".to_string(),
        details: None,
        artifacts: StatusArtifacts::default(),
        timestamp: Utc::now(),
    })
}

pub struct Harness {
    pub repository: Arc<FlakyRepository>,
    pub persistence: Arc<LocalPersistence>,
    pub events: UiEventBus,
    pub storage: Arc<HybridStorage>,
}

impl Harness {
    pub fn new() -> Self {
        let repository = Arc::new(FlakyRepository::new());
        let persistence = Arc::new(LocalPersistence::in_memory());
        let events = UiEventBus::default();
        let storage = Arc::new(HybridStorage::assemble(
            repository.clone(),
            persistence.clone(),
            events.clone(),
            &fast_settings(),
        ));
        Self {
            repository,
            persistence,
            events,
            storage,
        }
    }

    pub fn queue(&self) -> &Arc<SyncQueueManager> {
        self.storage.queue()
    }
}
