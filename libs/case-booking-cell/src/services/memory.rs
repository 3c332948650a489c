use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::CaseBookingError;
use crate::models::{
    AmendmentHistoryEntry, CaseBooking, CaseQuantity, CaseReference, StatusHistoryEntry, UserProfile,
};
use crate::services::repository::BookingRepository;

#[derive(Default)]
struct MemoryState {
    cases: HashMap<Uuid, CaseBooking>,
    quantities: HashMap<Uuid, Vec<CaseQuantity>>,
    users: Vec<UserProfile>,
}

/// Process-local backend, used when no Supabase project is configured and
/// as the remote side in tests.
#[derive(Default)]
pub struct InMemoryBookingRepository {
    state: RwLock<MemoryState>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<UserProfile>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                users,
                ..MemoryState::default()
            }),
        }
    }

    pub async fn case_count(&self) -> usize {
        self.state.read().await.cases.len()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert_case(&self, case: &CaseBooking, quantities: &[CaseQuantity]) -> Result<CaseBooking, CaseBookingError> {
        let mut state = self.state.write().await;
        state.cases.insert(case.id, case.clone());
        if !quantities.is_empty() {
            state.quantities.insert(case.id, quantities.to_vec());
        }
        Ok(case.clone())
    }

    async fn update_case(&self, case: &CaseBooking) -> Result<CaseBooking, CaseBookingError> {
        let mut state = self.state.write().await;
        if !state.cases.contains_key(&case.id) {
            return Err(CaseBookingError::NotFound(case.id.to_string()));
        }
        state.cases.insert(case.id, case.clone());
        Ok(case.clone())
    }

    async fn update_case_status(&self, case: &CaseBooking, entry: &StatusHistoryEntry) -> Result<(), CaseBookingError> {
        let mut state = self.state.write().await;
        let stored = state
            .cases
            .get_mut(&case.id)
            .ok_or_else(|| CaseBookingError::NotFound(case.id.to_string()))?;

        let history = std::mem::take(&mut stored.status_history);
        let amendments = std::mem::take(&mut stored.amendment_history);
        *stored = case.clone();
        stored.status_history = history;
        stored.amendment_history = amendments;
        if !stored.status_history.iter().any(|e| e.id == entry.id) {
            stored.status_history.push(entry.clone());
        }
        Ok(())
    }

    async fn record_amendment(&self, case: &CaseBooking, entry: &AmendmentHistoryEntry) -> Result<(), CaseBookingError> {
        let mut state = self.state.write().await;
        let stored = state
            .cases
            .get_mut(&case.id)
            .ok_or_else(|| CaseBookingError::NotFound(case.id.to_string()))?;

        let history = std::mem::take(&mut stored.status_history);
        let mut amendments = std::mem::take(&mut stored.amendment_history);
        if !amendments.iter().any(|a| a.amendment_id == entry.amendment_id) {
            amendments.push(entry.clone());
        }
        *stored = case.clone();
        stored.status_history = history;
        stored.amendment_history = amendments;
        Ok(())
    }

    async fn insert_status_history(&self, entry: &StatusHistoryEntry) -> Result<(), CaseBookingError> {
        let mut state = self.state.write().await;
        let stored = state
            .cases
            .get_mut(&entry.case_id)
            .ok_or_else(|| CaseBookingError::NotFound(entry.case_id.to_string()))?;
        if !stored.status_history.iter().any(|e| e.id == entry.id) {
            stored.status_history.push(entry.clone());
        }
        Ok(())
    }

    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseBooking>, CaseBookingError> {
        Ok(self.state.read().await.cases.get(&case_id).cloned())
    }

    async fn list_cases(&self, country: Option<&str>) -> Result<Vec<CaseBooking>, CaseBookingError> {
        let state = self.state.read().await;
        let mut cases: Vec<CaseBooking> = state
            .cases
            .values()
            .filter(|c| country.map_or(true, |country| c.country == country))
            .cloned()
            .collect();
        cases.sort_by(|a, b| a.date_of_surgery.cmp(&b.date_of_surgery).then(a.submitted_at.cmp(&b.submitted_at)));
        Ok(cases)
    }

    async fn get_case_quantities(&self, case_id: Uuid) -> Result<Vec<CaseQuantity>, CaseBookingError> {
        Ok(self
            .state
            .read()
            .await
            .quantities
            .get(&case_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn next_case_sequence(&self, country: &str) -> Result<u32, CaseBookingError> {
        let state = self.state.read().await;
        let last = state
            .cases
            .values()
            .filter(|c| c.country == country)
            .filter_map(|c| CaseReference::sequence_of(&c.case_reference_number))
            .max()
            .unwrap_or(0);
        Ok(last + 1)
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, CaseBookingError> {
        Ok(self.state.read().await.users.clone())
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, CaseBookingError> {
        let mut state = self.state.write().await;
        if state.users.iter().any(|u| u.id == user.id) {
            return Err(CaseBookingError::Validation(format!("User {} already exists", user.id)));
        }
        state.users.push(user.clone());
        Ok(user.clone())
    }

    async fn update_user(&self, user: &UserProfile) -> Result<UserProfile, CaseBookingError> {
        let mut state = self.state.write().await;
        let stored = state
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| CaseBookingError::NotFound(format!("user {}", user.id)))?;
        *stored = user.clone();
        Ok(user.clone())
    }

    async fn ping(&self) -> Result<(), CaseBookingError> {
        Ok(())
    }
}
