use crate::domain::lifecycle::LifecycleEvent;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Receives lifecycle events; delivery to people happens downstream.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, event: LifecycleEvent) -> Result<(), InfraError>;
}

/// Fans lifecycle events out to in-process subscribers.
pub struct BroadcastNotificationHub {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastNotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationDispatcher for BroadcastNotificationHub {
    async fn dispatch(&self, event: LifecycleEvent) -> Result<(), InfraError> {
        // No subscriber is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }
}
