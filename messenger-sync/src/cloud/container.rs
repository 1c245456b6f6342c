use crate::error::SyncResult;
use async_trait::async_trait;
use messenger_model::Record;
use messenger_types::RemoteChangeNotification;
use tokio::sync::mpsc;

/// Capacity of a notification subscription channel.
pub const NOTIFICATION_BUFFER: usize = 64;

/// A remote container holding the cloud copy of the records.
///
/// Notifications are delivered at least once and possibly out of order.
#[async_trait]
pub trait CloudContainer: Send + Sync {
    /// The container identifier, e.g. `iCloud.messenger`.
    fn identifier(&self) -> &str;

    /// Starts a stream of change notifications.
    ///
    /// The stream ends when the container stops delivering or the receiver
    /// is dropped.
    async fn subscribe(&self) -> SyncResult<mpsc::Receiver<RemoteChangeNotification>>;

    /// Uploads local edits, tombstones included.
    async fn push(&self, records: Vec<Record>) -> SyncResult<()>;
}
