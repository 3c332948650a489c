use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use case_booking_cell::{
    AmendmentHistoryEntry, BookingRepository, CaseBooking, CaseBookingError, CaseQuantity,
    StatusHistoryEntry, UserProfile,
};
use shared_config::SyncSettings;

use crate::events::{UiEventBus, UiLevel};
use crate::local_store::{LocalPersistence, DEAD_LETTER_KEY, SYNC_QUEUE_KEY};
use crate::SyncError;

/// A write that could not reach the backend, replayed on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncOperation {
    CreateCase {
        case: CaseBooking,
        #[serde(default)]
        quantities: Vec<CaseQuantity>,
    },
    UpdateCase {
        case: CaseBooking,
    },
    UpdateCaseStatus {
        case: CaseBooking,
        entry: StatusHistoryEntry,
    },
    AmendCase {
        case: CaseBooking,
        entry: AmendmentHistoryEntry,
    },
    CreateUser {
        user: UserProfile,
    },
    UpdateUser {
        user: UserProfile,
    },
    InsertStatusHistory {
        entry: StatusHistoryEntry,
    },
}

impl SyncOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncOperation::CreateCase { .. } => "create_case",
            SyncOperation::UpdateCase { .. } => "update_case",
            SyncOperation::UpdateCaseStatus { .. } => "update_case_status",
            SyncOperation::AmendCase { .. } => "amend_case",
            SyncOperation::CreateUser { .. } => "create_user",
            SyncOperation::UpdateUser { .. } => "update_user",
            SyncOperation::InsertStatusHistory { .. } => "insert_status_history",
        }
    }

    /// Case the operation touches, if any.
    pub fn case_id(&self) -> Option<Uuid> {
        match self {
            SyncOperation::CreateCase { case, .. }
            | SyncOperation::UpdateCase { case }
            | SyncOperation::UpdateCaseStatus { case, .. }
            | SyncOperation::AmendCase { case, .. } => Some(case.id),
            SyncOperation::InsertStatusHistory { entry } => Some(entry.case_id),
            SyncOperation::CreateUser { .. } | SyncOperation::UpdateUser { .. } => None,
        }
    }

    pub async fn apply(&self, repository: &dyn BookingRepository) -> Result<(), CaseBookingError> {
        match self {
            SyncOperation::CreateCase { case, quantities } => {
                repository.insert_case(case, quantities).await?;
            }
            SyncOperation::UpdateCase { case } => {
                repository.update_case(case).await?;
            }
            SyncOperation::UpdateCaseStatus { case, entry } => {
                repository.update_case_status(case, entry).await?;
            }
            SyncOperation::AmendCase { case, entry } => {
                repository.record_amendment(case, entry).await?;
            }
            SyncOperation::CreateUser { user } => {
                repository.insert_user(user).await?;
            }
            SyncOperation::UpdateUser { user } => {
                repository.update_user(user).await?;
            }
            SyncOperation::InsertStatusHistory { entry } => {
                repository.insert_status_history(entry).await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: Uuid,
    pub operation: SyncOperation,
    pub timestamp: DateTime<Utc>,
    pub retries: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
}

impl SyncQueueItem {
    pub fn new(operation: SyncOperation, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            timestamp: Utc::now(),
            retries: 0,
            max_retries,
            last_error: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.retries >= self.max_retries
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub item: SyncQueueItem,
    pub failed_at: DateTime<Utc>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlushReport {
    pub processed: usize,
    pub synced: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Another flush was already running.
    pub skipped: bool,
}

/// Resets the in-flight flag when a flush ends, including on early return.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Durable queue of pending remote writes.
///
/// Queue state lives in the local store and is re-read for every item, so
/// writes enqueued while a flush is running are never overwritten.
pub struct SyncQueueManager {
    persistence: Arc<LocalPersistence>,
    repository: Arc<dyn BookingRepository>,
    events: UiEventBus,
    is_processing: AtomicBool,
    // Serializes read-modify-write cycles on the persisted lists
    state_lock: Mutex<()>,
    max_retries: u32,
    item_delay: Duration,
    sync_interval: Duration,
}

impl SyncQueueManager {
    pub fn new(
        persistence: Arc<LocalPersistence>,
        repository: Arc<dyn BookingRepository>,
        events: UiEventBus,
        settings: &SyncSettings,
    ) -> Self {
        Self {
            persistence,
            repository,
            events,
            is_processing: AtomicBool::new(false),
            state_lock: Mutex::new(()),
            max_retries: settings.sync_max_retries,
            item_delay: Duration::from_millis(settings.sync_item_delay_ms),
            sync_interval: Duration::from_secs(settings.sync_interval_seconds),
        }
    }

    #[instrument(skip(self, operation), fields(kind = operation.kind()))]
    pub async fn enqueue(&self, operation: SyncOperation) -> Result<SyncQueueItem, SyncError> {
        let item = SyncQueueItem::new(operation, self.max_retries);

        let _lock = self.state_lock.lock().await;
        let mut queue = self.load_queue().await?;
        queue.push(item.clone());
        self.save_queue(&queue).await?;

        info!(item_id = %item.id, pending = queue.len(), "Queued operation for later sync");
        Ok(item)
    }

    pub async fn pending(&self) -> Result<Vec<SyncQueueItem>, SyncError> {
        self.load_queue().await
    }

    pub async fn pending_count(&self) -> Result<usize, SyncError> {
        Ok(self.load_queue().await?.len())
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    /// Replays every pending item against the backend, one at a time.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<FlushReport, SyncError> {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Flush already in progress, skipping");
            return Ok(FlushReport {
                skipped: true,
                ..FlushReport::default()
            });
        }
        let _guard = ProcessingGuard(&self.is_processing);

        let ids: Vec<Uuid> = self.load_queue().await?.iter().map(|item| item.id).collect();
        if ids.is_empty() {
            return Ok(FlushReport::default());
        }
        info!("Syncing {} queued operations", ids.len());

        let mut report = FlushReport::default();
        for (index, id) in ids.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.item_delay).await;
            }

            let item = match self.load_queue().await?.into_iter().find(|item| item.id == *id) {
                Some(item) => item,
                // Discarded or cleared while we were working
                None => continue,
            };
            report.processed += 1;

            match item.operation.apply(self.repository.as_ref()).await {
                Ok(()) => {
                    self.remove_item(*id).await?;
                    report.synced += 1;
                    debug!(item_id = %id, kind = item.operation.kind(), "Synced queued operation");
                }
                Err(e) => {
                    if self.record_failure(*id, &e.to_string()).await? {
                        report.dead_lettered += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }

        if report.synced > 0 {
            self.events.toast(
                UiLevel::Success,
                format!("Synced {} offline change(s)", report.synced),
            );
        }
        if report.dead_lettered > 0 {
            self.events.toast(
                UiLevel::Error,
                format!("{} offline change(s) could not be synced", report.dead_lettered),
            );
        }

        info!(
            synced = report.synced,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            "Sync pass complete"
        );
        Ok(report)
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>, SyncError> {
        self.persistence.load_or_default(DEAD_LETTER_KEY).await
    }

    /// Moves a dead letter back to the queue with a fresh retry budget.
    pub async fn requeue_dead_letter(&self, id: Uuid) -> Result<SyncQueueItem, SyncError> {
        let _lock = self.state_lock.lock().await;

        let mut dead: Vec<DeadLetter> = self.persistence.load_or_default(DEAD_LETTER_KEY).await?;
        let position = dead
            .iter()
            .position(|d| d.item.id == id)
            .ok_or(SyncError::DeadLetterNotFound(id))?;
        let mut item = dead.remove(position).item;
        item.retries = 0;
        item.last_error = None;

        let mut queue = self.load_queue().await?;
        queue.push(item.clone());
        self.save_queue(&queue).await?;
        self.persistence.save(DEAD_LETTER_KEY, &dead, None).await?;

        info!(item_id = %id, "Dead letter re-queued");
        Ok(item)
    }

    pub async fn discard_dead_letter(&self, id: Uuid) -> Result<DeadLetter, SyncError> {
        let _lock = self.state_lock.lock().await;

        let mut dead: Vec<DeadLetter> = self.persistence.load_or_default(DEAD_LETTER_KEY).await?;
        let position = dead
            .iter()
            .position(|d| d.item.id == id)
            .ok_or(SyncError::DeadLetterNotFound(id))?;
        let discarded = dead.remove(position);
        self.persistence.save(DEAD_LETTER_KEY, &dead, None).await?;

        warn!(item_id = %id, kind = discarded.item.operation.kind(), "Dead letter discarded");
        Ok(discarded)
    }

    /// Drops every pending item. Dead letters are kept.
    pub async fn clear(&self) -> Result<usize, SyncError> {
        let _lock = self.state_lock.lock().await;
        let cleared = self.load_queue().await?.len();
        self.persistence.remove(SYNC_QUEUE_KEY).await?;
        warn!("Cleared {} pending sync operations", cleared);
        Ok(cleared)
    }

    /// Flushes on every interval tick while online and immediately on each
    /// offline-to-online transition, until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut online: watch::Receiver<bool>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Sync worker started (interval {:?})", self.sync_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *online.borrow() {
                        self.flush_logged().await;
                    }
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let is_online = *online.borrow_and_update();
                    if is_online {
                        info!("Connection restored, flushing sync queue");
                        self.flush_logged().await;
                    }
                }
                stop = shutdown.changed() => {
                    if stop.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sync worker stopped");
    }

    async fn flush_logged(&self) {
        if let Err(e) = self.flush().await {
            error!("Sync pass failed: {}", e);
        }
    }

    async fn load_queue(&self) -> Result<Vec<SyncQueueItem>, SyncError> {
        self.persistence.load_or_default(SYNC_QUEUE_KEY).await
    }

    async fn save_queue(&self, queue: &[SyncQueueItem]) -> Result<(), SyncError> {
        self.persistence.save(SYNC_QUEUE_KEY, &queue, None).await
    }

    async fn remove_item(&self, id: Uuid) -> Result<(), SyncError> {
        let _lock = self.state_lock.lock().await;
        let mut queue = self.load_queue().await?;
        queue.retain(|item| item.id != id);
        self.save_queue(&queue).await
    }

    /// Bumps the retry count; returns `true` when the item was dead-lettered.
    async fn record_failure(&self, id: Uuid, message: &str) -> Result<bool, SyncError> {
        let _lock = self.state_lock.lock().await;
        let mut queue = self.load_queue().await?;

        let position = match queue.iter().position(|item| item.id == id) {
            Some(position) => position,
            None => return Ok(false),
        };

        let item = &mut queue[position];
        item.retries += 1;
        item.last_error = Some(message.to_string());

        if !item.is_exhausted() {
            warn!(
                item_id = %id,
                retries = item.retries,
                max_retries = item.max_retries,
                "Sync failed, will retry: {}", message
            );
            self.save_queue(&queue).await?;
            return Ok(false);
        }

        let item = queue.remove(position);
        error!(
            item_id = %id,
            kind = item.operation.kind(),
            retries = item.retries,
            "Sync retries exhausted, moving to dead letters: {}", message
        );

        let mut dead: Vec<DeadLetter> = self.persistence.load_or_default(DEAD_LETTER_KEY).await?;
        dead.push(DeadLetter {
            item,
            failed_at: Utc::now(),
            error: message.to_string(),
        });
        self.persistence.save(DEAD_LETTER_KEY, &dead, None).await?;
        self.save_queue(&queue).await?;
        Ok(true)
    }
}
