use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use case_booking_cell::BookingRepository;

use crate::local_store::{LocalPersistence, CONNECTION_METRICS_KEY};
use crate::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub attempts: u64,
    pub failures: u32,
    pub last_successful_connection: Option<DateTime<Utc>>,
    pub is_offline_mode: bool,
}

/// Tracks per-resource failure counters and decides when the backend is
/// treated as offline.
pub struct ConnectionMonitor {
    metrics: RwLock<HashMap<String, ConnectionMetrics>>,
    failure_threshold: u32,
    persistence: Arc<LocalPersistence>,
    online: watch::Sender<bool>,
}

impl ConnectionMonitor {
    pub fn new(persistence: Arc<LocalPersistence>, failure_threshold: u32) -> Self {
        let (online, _) = watch::channel(true);
        Self {
            metrics: RwLock::new(HashMap::new()),
            failure_threshold,
            persistence,
            online,
        }
    }

    /// Restores metrics persisted by a previous run.
    pub async fn restore(&self) -> Result<(), SyncError> {
        let stored: HashMap<String, ConnectionMetrics> =
            self.persistence.load_or_default(CONNECTION_METRICS_KEY).await?;
        let offline = stored.values().any(|m| m.is_offline_mode);

        *self.metrics.write().await = stored;
        self.online.send_replace(!offline);
        if offline {
            warn!("Restored connection state is offline");
        }
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Remote is tried only while the resource is below the failure threshold.
    pub async fn should_use_remote(&self, resource: &str) -> bool {
        self.metrics
            .read()
            .await
            .get(resource)
            .map_or(true, |m| !m.is_offline_mode && m.failures < self.failure_threshold)
    }

    pub async fn record_success(&self, resource: &str) {
        {
            let mut metrics = self.metrics.write().await;
            let entry = metrics.entry(resource.to_string()).or_default();
            entry.attempts += 1;
            entry.failures = 0;
            entry.is_offline_mode = false;
            entry.last_successful_connection = Some(Utc::now());
        }
        self.refresh_online().await;
        self.persist().await;
    }

    /// Returns `true` when this failure pushed the resource into offline mode.
    pub async fn record_failure(&self, resource: &str) -> bool {
        let went_offline = {
            let mut metrics = self.metrics.write().await;
            let entry = metrics.entry(resource.to_string()).or_default();
            entry.attempts += 1;
            entry.failures += 1;
            let crossing = !entry.is_offline_mode && entry.failures >= self.failure_threshold;
            if crossing {
                entry.is_offline_mode = true;
            }
            crossing
        };

        if went_offline {
            warn!(resource, threshold = self.failure_threshold, "Entering offline mode");
        }
        self.refresh_online().await;
        self.persist().await;
        went_offline
    }

    /// Clears every counter and leaves offline mode.
    pub async fn reset_all(&self) {
        {
            let mut metrics = self.metrics.write().await;
            let now = Utc::now();
            for entry in metrics.values_mut() {
                entry.failures = 0;
                entry.is_offline_mode = false;
                entry.last_successful_connection = Some(now);
            }
        }
        self.refresh_online().await;
        self.persist().await;
    }

    /// Pings the backend; a success resets all counters.
    pub async fn probe(&self, repository: &dyn BookingRepository) -> bool {
        match repository.ping().await {
            Ok(()) => {
                let was_offline = !self.is_online();
                self.reset_all().await;
                if was_offline {
                    info!("Health probe succeeded, leaving offline mode");
                } else {
                    debug!("Health probe succeeded");
                }
                true
            }
            Err(e) => {
                warn!("Health probe failed: {}", e);
                false
            }
        }
    }

    pub async fn metrics(&self) -> HashMap<String, ConnectionMetrics> {
        self.metrics.read().await.clone()
    }

    pub async fn offline_resources(&self) -> Vec<String> {
        let mut resources: Vec<String> = self
            .metrics
            .read()
            .await
            .iter()
            .filter(|(_, m)| m.is_offline_mode)
            .map(|(name, _)| name.clone())
            .collect();
        resources.sort();
        resources
    }

    async fn refresh_online(&self) {
        let online = !self.metrics.read().await.values().any(|m| m.is_offline_mode);
        // Only notify watchers on an actual transition
        self.online.send_if_modified(|current| {
            if *current != online {
                *current = online;
                true
            } else {
                false
            }
        });
    }

    async fn persist(&self) {
        let snapshot = self.metrics.read().await.clone();
        if let Err(e) = self.persistence.save(CONNECTION_METRICS_KEY, &snapshot, None).await {
            warn!("Failed to persist connection metrics: {}", e);
        }
    }
}
