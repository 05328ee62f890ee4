//! Event handler that records everything it receives.

use std::{sync::Arc, time::Duration};

use outbound_core::{DeliveryCompletedEvent, DeliveryEvent, DeliveryId, EventHandler};
use tokio::sync::{Notify, RwLock};

/// Audit sink that keeps events in memory.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: RwLock<Vec<DeliveryEvent>>,
    notify: Notify,
}

impl RecordingEventHandler {
    /// Creates an empty recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events received so far.
    pub async fn events(&self) -> Vec<DeliveryEvent> {
        self.events.read().await.clone()
    }

    /// Number of events received.
    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Completion events only.
    pub async fn completed(&self) -> Vec<DeliveryCompletedEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter_map(|event| match event {
                DeliveryEvent::Completed(completed) => Some(completed.clone()),
                DeliveryEvent::RetryRequested(_) => None,
            })
            .collect()
    }

    /// Events for one delivery.
    pub async fn events_for(&self, id: DeliveryId) -> Vec<DeliveryEvent> {
        self.events.read().await.iter().filter(|e| e.delivery_id() == id).cloned().collect()
    }

    /// Waits until at least `count` events arrived.
    ///
    /// Returns false on timeout.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.count().await >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait::async_trait]
impl EventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        self.events.write().await.push(event);
        self.notify.notify_waiters();
    }
}
