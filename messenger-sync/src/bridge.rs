//! Sync bridge - turns remote change notifications into local merges.

use crate::applicator::{ChangeApplicator, MergeOutcome};
use crate::cloud::CloudContainer;
use crate::error::{MergeError, SyncError, SyncResult};
use crate::state::SyncStatus;
use messenger_store::WriteContext;
use messenger_types::{NotificationId, RecordId, RemoteChangeNotification, RemoteId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for the sync bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum number of records per push call.
    pub push_batch_size: usize,
    /// Reject notifications whose container differs from the bridge's.
    pub reject_foreign_notifications: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            push_batch_size: 100,
            reject_foreign_notifications: true,
        }
    }
}

/// A change that could not be merged.
#[derive(Debug)]
pub struct MergeFailure {
    pub remote_id: RemoteId,
    pub error: MergeError,
}

/// What merging one notification did.
#[derive(Debug)]
pub struct MergeReport {
    pub notification: NotificationId,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub kept_local: usize,
    pub stale: usize,
    pub failures: Vec<MergeFailure>,
}

impl MergeReport {
    fn new(notification: NotificationId) -> Self {
        Self {
            notification,
            created: 0,
            updated: 0,
            deleted: 0,
            kept_local: 0,
            stale: 0,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Created => self.created += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Deleted => self.deleted += 1,
            MergeOutcome::KeptLocal => self.kept_local += 1,
            MergeOutcome::Stale => self.stale += 1,
        }
    }

    /// Changes that were applied, including kept local edits.
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.deleted + self.kept_local
    }

    /// True if every change was stale: nothing new was learned.
    pub fn is_noop(&self) -> bool {
        self.applied() == 0 && self.failures.is_empty()
    }
}

struct BridgeInner {
    context: WriteContext,
    container: Arc<dyn CloudContainer>,
    config: BridgeConfig,
    applicator: ChangeApplicator,
    status: RwLock<SyncStatus>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        let task = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Merges remote changes through the write context.
///
/// Every notification becomes one mutation, so merges are serialized with
/// local writes and never observed half-applied. Each change inside it runs
/// in its own savepoint: a bad record is logged and skipped while the rest
/// of the notification is saved.
#[derive(Clone)]
pub struct SyncBridge {
    inner: Arc<BridgeInner>,
}

impl SyncBridge {
    pub fn new(
        context: WriteContext,
        container: Arc<dyn CloudContainer>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                context,
                container,
                config,
                applicator: ChangeApplicator::new(),
                status: RwLock::new(SyncStatus::default()),
                subscription: Mutex::new(None),
            }),
        }
    }

    pub fn context(&self) -> &WriteContext {
        &self.inner.context
    }

    pub fn container(&self) -> &Arc<dyn CloudContainer> {
        &self.inner.container
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Snapshot of the sync counters.
    pub fn status(&self) -> SyncStatus {
        self.inner
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_status(&self, f: impl FnOnce(&mut SyncStatus)) {
        f(&mut self.inner.status.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Merges a notification and waits for it to be saved.
    ///
    /// Per-record failures end up in the report. An error means nothing
    /// from the notification was saved; merging is idempotent, so the same
    /// notification may simply be delivered again.
    pub async fn on_remote_notification(
        &self,
        notification: RemoteChangeNotification,
    ) -> SyncResult<MergeReport> {
        let expected = self.inner.container.identifier();
        if self.inner.config.reject_foreign_notifications && notification.container != expected {
            warn!(
                id = %notification.id,
                container = %notification.container,
                expected,
                "notification from foreign container ignored"
            );
            return Err(SyncError::ContainerMismatch {
                expected: expected.to_string(),
                actual: notification.container,
            });
        }

        let applicator = self.inner.applicator;
        let id = notification.id;
        let changes = notification.changes;
        let count = changes.len();
        debug!(%id, changes = count, "merging notification");

        let result = self
            .inner
            .context
            .enqueue(move |txn| {
                let mut report = MergeReport::new(id);
                for change in &changes {
                    match txn.savepoint(|txn| applicator.apply(txn, change)) {
                        Ok(outcome) => report.record(outcome),
                        Err(err) => {
                            warn!(
                                %id,
                                remote_id = %change.remote_id,
                                error = %err,
                                "remote change skipped"
                            );
                            report.failures.push(MergeFailure {
                                remote_id: change.remote_id.clone(),
                                error: err,
                            });
                        }
                    }
                }
                Ok(report)
            })
            .await;

        match result {
            Ok(report) => {
                self.update_status(|status| status.record_report(&report));
                info!(
                    %id,
                    applied = report.applied(),
                    stale = report.stale,
                    failed = report.failures.len(),
                    "notification merged"
                );
                Ok(report)
            }
            Err(err) => {
                let err = SyncError::from(err);
                if matches!(err, SyncError::Save(_)) {
                    self.update_status(|status| status.save_failures += 1);
                }
                error!(
                    %id,
                    error = %err,
                    retryable = err.is_retryable(),
                    "notification merge failed"
                );
                Err(err)
            }
        }
    }

    /// Starts merging notifications from the container in the background.
    ///
    /// Replaces any previous subscription. Must be called within a Tokio
    /// runtime.
    pub async fn subscribe(&self) -> SyncResult<()> {
        let mut notifications = self.inner.container.subscribe().await?;
        let bridge: Weak<BridgeInner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let Some(inner) = bridge.upgrade() else { break };
                let id = notification.id;
                let live = SyncBridge { inner };
                if let Err(err) = live.on_remote_notification(notification).await {
                    warn!(%id, error = %err, "notification dropped by subscription");
                }
            }
            debug!("notification stream ended");
        });

        let previous = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        self.update_status(|status| status.subscribed = true);
        info!(container = self.inner.container.identifier(), "subscribed to remote changes");
        Ok(())
    }

    /// Stops the background subscription.
    ///
    /// Mutations already queued by it still run to completion.
    pub fn unsubscribe(&self) {
        let task = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            info!(
                container = self.inner.container.identifier(),
                "unsubscribed from remote changes"
            );
        }
        self.update_status(|status| status.subscribed = false);
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Pushes unpushed local edits to the container.
    ///
    /// Records edited again while a push is in flight stay pending.
    /// Returns the number of records pushed.
    pub async fn push_pending(&self) -> SyncResult<usize> {
        let store = self.inner.context.store().clone();
        let pending = tokio::task::spawn_blocking(move || store.pending_push())
            .await
            .map_err(|e| SyncError::Task(e.to_string()))??;
        if pending.is_empty() {
            return Ok(0);
        }

        let batch_size = self.inner.config.push_batch_size.max(1);
        let mut pushed = 0;
        for batch in pending.chunks(batch_size) {
            self.inner.container.push(batch.to_vec()).await?;

            let snapshot: Vec<(RecordId, Timestamp)> =
                batch.iter().map(|r| (r.id, r.modified_at)).collect();
            let cleared = self
                .inner
                .context
                .enqueue(move |txn| {
                    let mut cleared = 0usize;
                    for (id, pushed_at) in &snapshot {
                        if txn.clear_pending(id, *pushed_at)? {
                            cleared += 1;
                        }
                    }
                    Ok(cleared)
                })
                .await?;

            pushed += batch.len();
            debug!(batch = batch.len(), cleared, "pushed local edits");
        }

        self.update_status(|status| status.records_pushed += pushed as u64);
        info!(pushed, container = self.inner.container.identifier(), "local edits pushed");
        Ok(pushed)
    }
}

impl std::fmt::Debug for SyncBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBridge")
            .field("container", &self.inner.container.identifier())
            .field("config", &self.inner.config)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
