use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiLevel {
    Success,
    Error,
    Warning,
    Info,
}

/// Events consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum UiEvent {
    ShowToast {
        #[serde(rename = "type")]
        level: UiLevel,
        message: String,
    },
    ShowNotification {
        #[serde(rename = "type")]
        level: UiLevel,
        message: String,
    },
}

impl UiEvent {
    pub fn message(&self) -> &str {
        match self {
            UiEvent::ShowToast { message, .. } | UiEvent::ShowNotification { message, .. } => message,
        }
    }

    pub fn level(&self) -> UiLevel {
        match self {
            UiEvent::ShowToast { level, .. } | UiEvent::ShowNotification { level, .. } => *level,
        }
    }
}

#[derive(Clone)]
pub struct UiEventBus {
    sender: broadcast::Sender<UiEvent>,
}

impl Default for UiEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl UiEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: UiEvent) {
        // No subscribers is normal for headless runs
        if self.sender.send(event).is_err() {
            debug!("UI event dropped, no subscribers");
        }
    }

    pub fn toast(&self, level: UiLevel, message: impl Into<String>) {
        self.publish(UiEvent::ShowToast {
            level,
            message: message.into(),
        });
    }

    pub fn notify(&self, level: UiLevel, message: impl Into<String>) {
        self.publish(UiEvent::ShowNotification {
            level,
            message: message.into(),
        });
    }
}
