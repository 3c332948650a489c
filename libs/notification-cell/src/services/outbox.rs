use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use case_booking_cell::{CaseBooking, CaseStatus};
use offline_sync_cell::{LocalPersistence, SyncError, NOTIFICATION_FAILED_KEY, NOTIFICATION_OUTBOX_KEY};
use shared_config::SyncSettings;

use crate::models::{NotificationEvent, NotificationOutcome};
use crate::services::notifier::NotificationService;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedNotification {
    pub event: NotificationEvent,
    pub failed_at: DateTime<Utc>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutboxReport {
    pub processed: usize,
    pub sent: usize,
    pub dropped: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: bool,
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Durable list of status changes waiting to be notified.
///
/// Recording is cheap and local, so a status update never waits on rule
/// lookup or e-mail delivery.
pub struct NotificationOutbox {
    persistence: Arc<LocalPersistence>,
    state_lock: Mutex<()>,
    is_processing: AtomicBool,
    max_attempts: u32,
    interval: Duration,
}

impl NotificationOutbox {
    pub fn new(persistence: Arc<LocalPersistence>, settings: &SyncSettings) -> Self {
        Self {
            persistence,
            state_lock: Mutex::new(()),
            is_processing: AtomicBool::new(false),
            max_attempts: settings.outbox_max_attempts,
            interval: Duration::from_secs(settings.outbox_interval_seconds),
        }
    }

    pub async fn record(
        &self,
        case: &CaseBooking,
        new_status: CaseStatus,
        changed_by: &str,
    ) -> Result<NotificationEvent, SyncError> {
        let event = NotificationEvent::new(case.clone(), new_status, changed_by);

        let _lock = self.state_lock.lock().await;
        let mut pending = self.load().await?;
        pending.push(event.clone());
        self.save(&pending).await?;

        debug!(event_id = %event.id, case_id = %case.id, status = %new_status, "Notification recorded");
        Ok(event)
    }

    pub async fn pending(&self) -> Result<Vec<NotificationEvent>, SyncError> {
        self.load().await
    }

    pub async fn failed(&self) -> Result<Vec<FailedNotification>, SyncError> {
        self.persistence.load_or_default(NOTIFICATION_FAILED_KEY).await
    }

    /// Delivers every pending event once.
    pub async fn process(&self, service: &NotificationService) -> Result<OutboxReport, SyncError> {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(OutboxReport {
                skipped: true,
                ..OutboxReport::default()
            });
        }
        let _guard = ProcessingGuard(&self.is_processing);

        let events = self.load().await?;
        let mut report = OutboxReport::default();

        for event in events {
            report.processed += 1;
            let outcome = service.notify_status_change(&event).await;

            match outcome {
                NotificationOutcome::Failed { error } => {
                    if self.record_failure(event.id, &error).await? {
                        report.failed += 1;
                    } else {
                        report.retried += 1;
                    }
                }
                outcome => {
                    if matches!(outcome, NotificationOutcome::Sent { .. }) {
                        report.sent += 1;
                    } else {
                        report.dropped += 1;
                    }
                    self.remove(event.id).await?;
                }
            }
        }

        if report.processed > 0 {
            info!(
                sent = report.sent,
                dropped = report.dropped,
                retried = report.retried,
                failed = report.failed,
                "Outbox pass complete"
            );
        }
        Ok(report)
    }

    pub async fn run(self: Arc<Self>, service: Arc<NotificationService>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Notification outbox worker started (interval {:?})", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.process(&service).await {
                        error!("Outbox pass failed: {}", e);
                    }
                }
                stop = shutdown.changed() => {
                    if stop.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Notification outbox worker stopped");
    }

    async fn load(&self) -> Result<Vec<NotificationEvent>, SyncError> {
        self.persistence.load_or_default(NOTIFICATION_OUTBOX_KEY).await
    }

    async fn save(&self, events: &[NotificationEvent]) -> Result<(), SyncError> {
        self.persistence.save(NOTIFICATION_OUTBOX_KEY, &events, None).await
    }

    async fn remove(&self, id: Uuid) -> Result<(), SyncError> {
        let _lock = self.state_lock.lock().await;
        let mut events = self.load().await?;
        events.retain(|e| e.id != id);
        self.save(&events).await
    }

    /// Returns `true` when the event ran out of attempts and was moved aside.
    async fn record_failure(&self, id: Uuid, message: &str) -> Result<bool, SyncError> {
        let _lock = self.state_lock.lock().await;
        let mut events = self.load().await?;
        let Some(position) = events.iter().position(|e| e.id == id) else {
            return Ok(false);
        };

        let event = &mut events[position];
        event.attempts += 1;
        event.last_error = Some(message.to_string());

        if event.attempts < self.max_attempts {
            warn!(event_id = %id, attempts = event.attempts, "Notification failed, will retry: {}", message);
            self.save(&events).await?;
            return Ok(false);
        }

        let event = events.remove(position);
        error!(
            event_id = %id,
            case_id = %event.case.id,
            attempts = event.attempts,
            "Notification abandoned: {}", message
        );
        let mut failed = self.failed().await?;
        failed.push(FailedNotification {
            event,
            failed_at: Utc::now(),
            error: message.to_string(),
        });
        self.persistence.save(NOTIFICATION_FAILED_KEY, &failed, None).await?;
        self.save(&events).await?;
        Ok(true)
    }
}
