use super::container::{CloudContainer, NOTIFICATION_BUFFER};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use messenger_model::Record;
use messenger_types::{RemoteChange, RemoteChangeNotification};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

/// A container that lives in process memory.
///
/// Notifications are injected with [`deliver`](Self::deliver); pushed
/// records are kept for inspection. Used for tests and local-only setups.
#[derive(Debug)]
pub struct InMemoryContainer {
    identifier: String,
    subscribers: Mutex<Vec<mpsc::Sender<RemoteChangeNotification>>>,
    pushed: Mutex<Vec<Record>>,
    fail_pushes: AtomicBool,
}

impl InMemoryContainer {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            subscribers: Mutex::new(Vec::new()),
            pushed: Mutex::new(Vec::new()),
            fail_pushes: AtomicBool::new(false),
        }
    }

    /// Builds a notification from this container.
    pub fn notification(&self, changes: Vec<RemoteChange>) -> RemoteChangeNotification {
        RemoteChangeNotification::new(self.identifier.clone(), changes)
    }

    /// Sends a notification to every live subscriber.
    ///
    /// Returns how many subscribers received it.
    pub async fn deliver(&self, notification: RemoteChangeNotification) -> usize {
        let senders: Vec<_> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for sender in &senders {
            if sender.send(notification.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| !s.is_closed());
        debug!(id = %notification.id, delivered, "notification delivered");
        delivered
    }

    /// Number of subscribers whose receiver is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !s.is_closed())
            .count()
    }

    /// Every record pushed so far, in push order.
    pub fn pushed(&self) -> Vec<Record> {
        self.pushed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Makes later pushes fail (or succeed again).
    pub fn set_fail_pushes(&self, fail: bool) {
        self.fail_pushes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CloudContainer for InMemoryContainer {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn subscribe(&self) -> SyncResult<mpsc::Receiver<RemoteChangeNotification>> {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        Ok(rx)
    }

    async fn push(&self, records: Vec<Record>) -> SyncResult<()> {
        if self.fail_pushes.load(Ordering::SeqCst) {
            return Err(SyncError::Container(format!(
                "{}: push rejected",
                self.identifier
            )));
        }
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(records);
        Ok(())
    }
}
