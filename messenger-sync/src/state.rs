//! Sync status tracking.

use crate::bridge::MergeReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters describing what the sync bridge has done so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Notifications merged and saved.
    pub notifications_processed: u64,
    /// Changes that created, updated or deleted a record, or kept a local edit.
    pub changes_applied: u64,
    /// Stale or duplicate changes.
    pub changes_skipped: u64,
    /// Changes rejected with a merge error.
    pub changes_failed: u64,
    /// Notifications whose merge could not be saved.
    pub save_failures: u64,
    /// Local records pushed to the cloud container.
    pub records_pushed: u64,
    /// When the last notification was saved.
    pub last_sync: Option<DateTime<Utc>>,
    /// Whether a notification subscription is running.
    pub subscribed: bool,
}

impl SyncStatus {
    pub(crate) fn record_report(&mut self, report: &MergeReport) {
        self.notifications_processed += 1;
        self.changes_applied += report.applied() as u64;
        self.changes_skipped += report.stale as u64;
        self.changes_failed += report.failures.len() as u64;
        self.last_sync = Some(Utc::now());
    }
}
