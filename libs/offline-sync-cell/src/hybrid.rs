use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use case_booking_cell::{
    AmendmentHistoryEntry, BookingRepository, CaseBooking, CaseQuantity, CaseReference,
    StatusHistoryEntry, UserProfile,
};
use shared_config::SyncSettings;

use crate::connection::{ConnectionMetrics, ConnectionMonitor};
use crate::events::{UiEventBus, UiLevel};
use crate::local_store::LocalPersistence;
use crate::retry::{DataSource, FailureKind, RetryExecutor, RetryOptions};
use crate::sync_queue::{SyncOperation, SyncQueueManager};
use crate::SyncError;

pub const CASES_RESOURCE: &str = "case_bookings";
pub const USERS_RESOURCE: &str = "profiles";

const CASE_CACHE_PREFIX: &str = "cache:case:";
const QUANTITIES_CACHE_PREFIX: &str = "cache:quantities:";
const USERS_CACHE_KEY: &str = "cache:users";
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The backend accepted the write.
    Synced,
    /// The write is stored locally and waits in the sync queue.
    Queued,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub is_online: bool,
    pub offline_resources: Vec<String>,
    pub metrics: HashMap<String, ConnectionMetrics>,
    pub pending_sync_items: usize,
    pub dead_letters: usize,
    pub is_syncing: bool,
}

/// Remote-first storage that degrades to the local cache and sync queue.
pub struct HybridStorage {
    repository: Arc<dyn BookingRepository>,
    persistence: Arc<LocalPersistence>,
    queue: Arc<SyncQueueManager>,
    monitor: Arc<ConnectionMonitor>,
    retry: RetryExecutor,
    events: UiEventBus,
    remote_max_retries: u32,
    probe_interval: Duration,
}

impl HybridStorage {
    pub fn new(
        repository: Arc<dyn BookingRepository>,
        persistence: Arc<LocalPersistence>,
        queue: Arc<SyncQueueManager>,
        monitor: Arc<ConnectionMonitor>,
        retry: RetryExecutor,
        events: UiEventBus,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            repository,
            persistence,
            queue,
            monitor,
            retry,
            events,
            remote_max_retries: settings.remote_max_retries,
            probe_interval: Duration::from_secs(settings.health_probe_interval_seconds),
        }
    }

    /// Wires the full offline stack over one repository and local store.
    pub fn assemble(
        repository: Arc<dyn BookingRepository>,
        persistence: Arc<LocalPersistence>,
        events: UiEventBus,
        settings: &SyncSettings,
    ) -> Self {
        let queue = Arc::new(SyncQueueManager::new(
            persistence.clone(),
            repository.clone(),
            events.clone(),
            settings,
        ));
        let monitor = Arc::new(ConnectionMonitor::new(
            persistence.clone(),
            settings.offline_failure_threshold,
        ));
        let retry = RetryExecutor::from_settings(settings, events.clone());
        Self::new(repository, persistence, queue, monitor, retry, events, settings)
    }

    pub fn queue(&self) -> &Arc<SyncQueueManager> {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn events(&self) -> &UiEventBus {
        &self.events
    }

    pub async fn create_case(&self, case: &CaseBooking, quantities: &[CaseQuantity]) -> Result<WriteOutcome, SyncError> {
        self.cache_quantities(case.id, quantities).await;
        let result = self
            .write_case(
                case,
                "create case",
                SyncOperation::CreateCase {
                    case: case.clone(),
                    quantities: quantities.to_vec(),
                },
            )
            .await;
        if result.is_err() {
            self.forget(&format!("{}{}", QUANTITIES_CACHE_PREFIX, case.id)).await;
        }
        result
    }

    pub async fn update_case(&self, case: &CaseBooking) -> Result<WriteOutcome, SyncError> {
        self.write_case(case, "update case", SyncOperation::UpdateCase { case: case.clone() })
            .await
    }

    pub async fn update_case_status(&self, case: &CaseBooking, entry: &StatusHistoryEntry) -> Result<WriteOutcome, SyncError> {
        self.write_case(
            case,
            "update case status",
            SyncOperation::UpdateCaseStatus {
                case: case.clone(),
                entry: entry.clone(),
            },
        )
        .await
    }

    pub async fn amend_case(&self, case: &CaseBooking, entry: &AmendmentHistoryEntry) -> Result<WriteOutcome, SyncError> {
        self.write_case(
            case,
            "amend case",
            SyncOperation::AmendCase {
                case: case.clone(),
                entry: entry.clone(),
            },
        )
        .await
    }

    pub async fn create_user(&self, user: &UserProfile) -> Result<WriteOutcome, SyncError> {
        self.write_user(user, "create user", SyncOperation::CreateUser { user: user.clone() })
            .await
    }

    pub async fn update_user(&self, user: &UserProfile) -> Result<WriteOutcome, SyncError> {
        self.write_user(user, "update user", SyncOperation::UpdateUser { user: user.clone() })
            .await
    }

    pub async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseBooking>, SyncError> {
        let cached = self.cached_case(case_id).await;
        if !self.monitor.should_use_remote(CASES_RESOURCE).await {
            return Ok(cached);
        }

        let options = RetryOptions::new("load case")
            .max_retries(self.remote_max_retries)
            .with_local_fallback();
        let repository = self.repository.as_ref();
        let fallback = cached.clone().map(Some);
        let result = self
            .retry
            .execute_with_fallback(&options, move || repository.get_case(case_id), move || async move { fallback })
            .await;

        let source = result.data_source;
        self.track(CASES_RESOURCE, source, result.failure).await;
        match result.into_result()? {
            Some(case) if source == DataSource::Remote => {
                self.cache_case(&case).await;
                Ok(Some(case))
            }
            // Created offline and not yet synced
            None => Ok(cached),
            other => Ok(other),
        }
    }

    pub async fn list_cases(&self, country: Option<&str>) -> Result<Vec<CaseBooking>, SyncError> {
        if !self.monitor.should_use_remote(CASES_RESOURCE).await {
            return self.cached_cases(country).await;
        }

        let options = RetryOptions::new("load cases")
            .max_retries(self.remote_max_retries)
            .with_local_fallback();
        let repository = self.repository.as_ref();
        let result = self
            .retry
            .execute_with_fallback(
                &options,
                move || repository.list_cases(country),
                move || async move { self.cached_cases(country).await.ok() },
            )
            .await;

        let source = result.data_source;
        self.track(CASES_RESOURCE, source, result.failure).await;
        if source == DataSource::LocalStorage {
            return result.into_result();
        }

        let mut cases = result.into_result()?;
        for case in &cases {
            self.cache_case(case).await;
        }

        // Cases created offline are not on the backend yet
        for pending in self.queue.pending().await? {
            if let SyncOperation::CreateCase { case, .. } = pending.operation {
                let matches_country = country.map_or(true, |c| case.country == c);
                if matches_country && !cases.iter().any(|c| c.id == case.id) {
                    cases.push(case);
                }
            }
        }
        cases.sort_by(|a, b| a.date_of_surgery.cmp(&b.date_of_surgery));
        Ok(cases)
    }

    /// Per-item quantities of a case. Falls back to the copy cached at creation.
    pub async fn get_case_quantities(&self, case_id: Uuid) -> Result<Vec<CaseQuantity>, SyncError> {
        let key = format!("{}{}", QUANTITIES_CACHE_PREFIX, case_id);
        let cached: Option<Vec<CaseQuantity>> = self.persistence.load(&key).await.unwrap_or_else(|e| {
            warn!(%case_id, "Failed to read cached quantities: {}", e);
            None
        });
        if !self.monitor.should_use_remote(CASES_RESOURCE).await {
            return Ok(cached.unwrap_or_default());
        }

        let options = RetryOptions::new("load case quantities")
            .max_retries(self.remote_max_retries)
            .with_local_fallback()
            .silent();
        let repository = self.repository.as_ref();
        let fallback = cached.clone();
        let result = self
            .retry
            .execute_with_fallback(
                &options,
                move || repository.get_case_quantities(case_id),
                move || async move { fallback },
            )
            .await;

        let source = result.data_source;
        self.track(CASES_RESOURCE, source, result.failure).await;
        let quantities = result.into_result()?;
        if source != DataSource::Remote {
            return Ok(quantities);
        }
        if quantities.is_empty() {
            // Created offline and not yet synced
            return Ok(cached.unwrap_or_default());
        }
        self.cache_quantities(case_id, &quantities).await;
        Ok(quantities)
    }

    pub async fn list_users(&self) -> Result<Vec<UserProfile>, SyncError> {
        let cached: Option<Vec<UserProfile>> = self.persistence.load(USERS_CACHE_KEY).await.unwrap_or_else(|e| {
            warn!("Failed to read cached users: {}", e);
            None
        });
        if !self.monitor.should_use_remote(USERS_RESOURCE).await {
            return cached.ok_or_else(|| {
                SyncError::Unavailable("User directory is offline and nothing is cached".to_string())
            });
        }

        let options = RetryOptions::new("load users")
            .max_retries(self.remote_max_retries)
            .prevent_fake_data()
            .with_local_fallback()
            .silent();
        let repository = self.repository.as_ref();
        let result = self
            .retry
            .execute_with_fallback(&options, move || repository.list_users(), move || async move { cached })
            .await;

        let source = result.data_source;
        self.track(USERS_RESOURCE, source, result.failure).await;
        let users = result.into_result()?;
        if source == DataSource::Remote {
            if let Err(e) = self.persistence.save(USERS_CACHE_KEY, &users, Some(CACHE_TTL)).await {
                warn!("Failed to cache users: {}", e);
            }
        }
        Ok(users)
    }

    /// Next reference sequence for a country, never below what is known locally.
    pub async fn next_case_sequence(&self, country: &str) -> Result<u32, SyncError> {
        let local_next = self
            .cached_cases(Some(country))
            .await?
            .iter()
            .filter_map(|c| CaseReference::sequence_of(&c.case_reference_number))
            .max()
            .unwrap_or(0)
            + 1;

        if !self.monitor.should_use_remote(CASES_RESOURCE).await {
            return Ok(local_next);
        }

        let options = RetryOptions::new("generate case reference")
            .max_retries(self.remote_max_retries)
            .silent();
        let repository = self.repository.as_ref();
        let result = self
            .retry
            .execute(&options, move || repository.next_case_sequence(country))
            .await;
        self.track(CASES_RESOURCE, result.data_source, result.failure).await;

        if result.is_transient_failure() {
            return Ok(local_next);
        }
        Ok(result.into_result()?.max(local_next))
    }

    pub async fn connection_status(&self) -> Result<ConnectionStatus, SyncError> {
        Ok(ConnectionStatus {
            is_online: self.monitor.is_online(),
            offline_resources: self.monitor.offline_resources().await,
            metrics: self.monitor.metrics().await,
            pending_sync_items: self.queue.pending_count().await?,
            dead_letters: self.queue.dead_letters().await?.len(),
            is_syncing: self.queue.is_processing(),
        })
    }

    /// Probes the backend now. Coming back online wakes the sync worker.
    pub async fn probe(&self) -> bool {
        self.monitor.probe(self.repository.as_ref()).await
    }

    /// Probes on an interval while any resource is offline.
    pub async fn run_health_probe(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Health probe started (interval {:?})", self.probe_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.monitor.is_online() {
                        self.probe().await;
                    }
                }
                stop = shutdown.changed() => {
                    if stop.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Health probe stopped");
    }

    #[instrument(skip(self, operation), fields(kind = operation.kind()))]
    async fn write(&self, resource: &str, label: &str, operation: SyncOperation) -> Result<WriteOutcome, SyncError> {
        if !self.monitor.should_use_remote(resource).await {
            self.queue.enqueue(operation).await?;
            self.events.toast(
                UiLevel::Warning,
                "You are offline. The change was saved locally and will sync automatically.",
            );
            return Ok(WriteOutcome::Queued);
        }

        if self.has_pending_for_case(&operation).await? {
            debug!(case_id = ?operation.case_id(), "Queueing behind earlier unsynced change");
            self.queue.enqueue(operation).await?;
            self.events.toast(
                UiLevel::Warning,
                "An earlier change to this case is still waiting to sync. This change was queued behind it.",
            );
            return Ok(WriteOutcome::Queued);
        }

        let options = RetryOptions::new(label)
            .max_retries(self.remote_max_retries)
            .silent();
        let repository = self.repository.as_ref();
        let op = &operation;
        let result = self.retry.execute(&options, move || op.apply(repository)).await;

        if result.success {
            self.monitor.record_success(resource).await;
            return Ok(WriteOutcome::Synced);
        }

        if result.is_transient_failure() {
            self.monitor.record_failure(resource).await;
            self.queue.enqueue(operation).await?;
            self.events.toast(
                UiLevel::Warning,
                "Could not reach the server. The change was saved locally and will sync automatically.",
            );
            return Ok(WriteOutcome::Queued);
        }

        let message = result.error.clone().unwrap_or_default();
        self.events
            .toast(UiLevel::Error, format!("Failed to {}: {}", label, message));
        result.into_result().map(|()| WriteOutcome::Synced)
    }

    /// Writes a case through `write`, putting the previous cached copy back
    /// when the backend refuses the change.
    async fn write_case(&self, case: &CaseBooking, label: &str, operation: SyncOperation) -> Result<WriteOutcome, SyncError> {
        let previous = self.cached_case(case.id).await;
        self.cache_case(case).await;
        let result = self.write(CASES_RESOURCE, label, operation).await;
        if result.is_err() {
            match previous {
                Some(previous) => self.cache_case(&previous).await,
                None => self.forget(&format!("{}{}", CASE_CACHE_PREFIX, case.id)).await,
            }
        }
        result
    }

    async fn write_user(&self, user: &UserProfile, label: &str, operation: SyncOperation) -> Result<WriteOutcome, SyncError> {
        let previous: Option<Vec<UserProfile>> = self.persistence.load(USERS_CACHE_KEY).await.unwrap_or_else(|e| {
            warn!("Failed to read cached users: {}", e);
            None
        });
        self.cache_user(user).await;
        let result = self.write(USERS_RESOURCE, label, operation).await;
        if result.is_err() {
            match previous {
                Some(previous) => {
                    if let Err(e) = self.persistence.save(USERS_CACHE_KEY, &previous, Some(CACHE_TTL)).await {
                        warn!(user_id = %user.id, "Failed to restore cached users: {}", e);
                    }
                }
                None => self.forget(USERS_CACHE_KEY).await,
            }
        }
        result
    }

    /// Operations on a case with queued changes must not overtake them.
    async fn has_pending_for_case(&self, operation: &SyncOperation) -> Result<bool, SyncError> {
        let Some(case_id) = operation.case_id() else {
            return Ok(false);
        };
        Ok(self
            .queue
            .pending()
            .await?
            .iter()
            .any(|item| item.operation.case_id() == Some(case_id)))
    }

    async fn forget(&self, key: &str) {
        if let Err(e) = self.persistence.remove(key).await {
            warn!(key, "Failed to drop cache entry: {}", e);
        }
    }

    async fn track(&self, resource: &str, source: DataSource, failure: Option<FailureKind>) {
        match (source, failure) {
            (DataSource::Remote, _) => self.monitor.record_success(resource).await,
            (_, Some(FailureKind::Transient)) => {
                self.monitor.record_failure(resource).await;
            }
            _ => {}
        }
    }

    async fn cache_case(&self, case: &CaseBooking) {
        let key = format!("{}{}", CASE_CACHE_PREFIX, case.id);
        if let Err(e) = self.persistence.save(&key, case, Some(CACHE_TTL)).await {
            warn!(case_id = %case.id, "Failed to cache case: {}", e);
        }
    }

    async fn cache_quantities(&self, case_id: Uuid, quantities: &[CaseQuantity]) {
        if quantities.is_empty() {
            return;
        }
        let key = format!("{}{}", QUANTITIES_CACHE_PREFIX, case_id);
        if let Err(e) = self.persistence.save(&key, &quantities, Some(CACHE_TTL)).await {
            warn!(%case_id, "Failed to cache quantities: {}", e);
        }
    }

    async fn cached_case(&self, case_id: Uuid) -> Option<CaseBooking> {
        let key = format!("{}{}", CASE_CACHE_PREFIX, case_id);
        self.persistence.load(&key).await.unwrap_or_else(|e| {
            warn!(%case_id, "Failed to read cached case: {}", e);
            None
        })
    }

    async fn cached_cases(&self, country: Option<&str>) -> Result<Vec<CaseBooking>, SyncError> {
        let mut cases = Vec::new();
        for key in self.persistence.keys(CASE_CACHE_PREFIX).await? {
            if let Some(case) = self.persistence.load::<CaseBooking>(&key).await? {
                if country.map_or(true, |c| case.country == c) {
                    cases.push(case);
                }
            }
        }
        cases.sort_by(|a, b| a.date_of_surgery.cmp(&b.date_of_surgery));
        debug!("Serving {} cached cases", cases.len());
        Ok(cases)
    }

    async fn cache_user(&self, user: &UserProfile) {
        let mut users: Vec<UserProfile> = self
            .persistence
            .load_or_default(USERS_CACHE_KEY)
            .await
            .unwrap_or_default();
        match users.iter_mut().find(|u| u.id == user.id) {
            Some(existing) => *existing = user.clone(),
            None => users.push(user.clone()),
        }
        if let Err(e) = self.persistence.save(USERS_CACHE_KEY, &users, Some(CACHE_TTL)).await {
            warn!(user_id = %user.id, "Failed to cache user: {}", e);
        }
    }
}
