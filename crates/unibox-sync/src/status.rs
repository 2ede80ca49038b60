// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sync status tracking.
//!
//! At most one sync per customer may be pending or running. A sync left
//! active past the staleness threshold is force-completed lazily, on the
//! next status read or before a new sync begins.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use unibox_core::types::now_iso;
use unibox_core::{StorageAdapter, SyncState, SyncStatus, SyncStatusUpdate, UniboxError};

use crate::timestamp::parse_timestamp;

/// Error text written to syncs that were abandoned while active.
pub const SYNC_TIMED_OUT: &str = "Sync timed out";

/// Reads and transitions sync status records.
#[derive(Clone)]
pub struct SyncTracker {
    storage: Arc<dyn StorageAdapter>,
    stale_after: Duration,
}

impl SyncTracker {
    pub fn new(storage: Arc<dyn StorageAdapter>, stale_after: Duration) -> Self {
        Self {
            storage,
            stale_after,
        }
    }

    /// Starts a new sync in `pending`.
    ///
    /// Fails with [`UniboxError::Conflict`] while another sync is active.
    pub async fn begin(&self, customer_id: &str) -> Result<SyncStatus, UniboxError> {
        if let Some(active) = self.storage.get_active_sync(customer_id).await? {
            self.expire_if_stale(active).await?;
        }

        let now = now_iso();
        let status = SyncStatus {
            sync_id: new_sync_id(),
            customer_id: customer_id.to_string(),
            status: SyncState::Pending,
            is_syncing: true,
            start_time: now.clone(),
            last_sync_time: None,
            total_messages: None,
            total_chats: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.storage.create_sync_status(&status).await?;
        info!(customer_id, sync_id = %status.sync_id, "sync started");
        Ok(status)
    }

    /// The customer's most recent sync, expiring it first if it is stale.
    pub async fn current(&self, customer_id: &str) -> Result<Option<SyncStatus>, UniboxError> {
        match self.storage.get_latest_sync_status(customer_id).await? {
            Some(status) => Ok(Some(self.expire_if_stale(status).await?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, customer_id: &str, sync_id: &str) -> Result<SyncStatus, UniboxError> {
        self.storage
            .get_sync_status(customer_id, sync_id)
            .await?
            .ok_or_else(|| UniboxError::NotFound("Sync not found".to_string()))
    }

    /// Applies a validated transition.
    ///
    /// Unknown syncs are [`UniboxError::NotFound`]; backwards transitions are
    /// [`UniboxError::Conflict`].
    pub async fn update(
        &self,
        customer_id: &str,
        sync_id: &str,
        update: &SyncStatusUpdate,
    ) -> Result<SyncStatus, UniboxError> {
        let existing = self.get(customer_id, sync_id).await?;
        if !existing.status.can_transition_to(update.status) {
            return Err(UniboxError::Conflict(format!(
                "cannot move sync from {} to {}",
                existing.status, update.status
            )));
        }
        self.storage
            .update_sync_status(customer_id, sync_id, update)
            .await?
            .ok_or_else(|| UniboxError::NotFound("Sync not found".to_string()))
    }

    pub async fn mark_running(
        &self,
        customer_id: &str,
        sync_id: &str,
    ) -> Result<SyncStatus, UniboxError> {
        self.update(customer_id, sync_id, &SyncStatusUpdate::to(SyncState::Running))
            .await
    }

    /// Records a successful finish.
    ///
    /// A sync already expired as stale keeps its timed-out record.
    pub async fn complete(
        &self,
        customer_id: &str,
        sync_id: &str,
        total_messages: i64,
        total_chats: i64,
    ) -> Result<SyncStatus, UniboxError> {
        let existing = self.get(customer_id, sync_id).await?;
        if existing.status == SyncState::Completed {
            info!(customer_id, sync_id, "sync finished after it was expired");
            return Ok(existing);
        }
        let update = SyncStatusUpdate {
            total_messages: Some(total_messages),
            total_chats: Some(total_chats),
            ..SyncStatusUpdate::to(SyncState::Completed)
        };
        self.update(customer_id, sync_id, &update).await
    }

    pub async fn fail(
        &self,
        customer_id: &str,
        sync_id: &str,
        error: &str,
    ) -> Result<SyncStatus, UniboxError> {
        let update = SyncStatusUpdate {
            error: Some(error.to_string()),
            ..SyncStatusUpdate::to(SyncState::Failed)
        };
        self.update(customer_id, sync_id, &update).await
    }

    async fn expire_if_stale(&self, status: SyncStatus) -> Result<SyncStatus, UniboxError> {
        if !is_stale(&status, self.stale_after, chrono::Utc::now()) {
            return Ok(status);
        }
        warn!(
            customer_id = %status.customer_id,
            sync_id = %status.sync_id,
            started = %status.start_time,
            "resetting stale sync"
        );
        let update = SyncStatusUpdate {
            error: Some(SYNC_TIMED_OUT.to_string()),
            ..SyncStatusUpdate::to(SyncState::Completed)
        };
        Ok(self
            .storage
            .update_sync_status(&status.customer_id, &status.sync_id, &update)
            .await?
            .unwrap_or(status))
    }
}

/// Whether an active sync started longer ago than `stale_after`.
///
/// An unparseable start time counts as stale.
pub fn is_stale(
    status: &SyncStatus,
    stale_after: Duration,
    now: chrono::DateTime<chrono::Utc>,
) -> bool {
    if !status.status.is_active() {
        return false;
    }
    let Some(started) = parse_timestamp(&status.start_time) else {
        return true;
    };
    let Ok(threshold) = chrono::Duration::from_std(stale_after) else {
        return false;
    };
    now.signed_duration_since(started) > threshold
}

/// `sync-{epoch millis}-{random}`.
fn new_sync_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "sync-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        &random[..9]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_test_utils::temp_storage;

    async fn tracker(stale_after: Duration) -> (SyncTracker, tempfile::TempDir) {
        let (storage, dir) = temp_storage().await;
        (SyncTracker::new(storage, stale_after), dir)
    }

    #[tokio::test]
    async fn second_begin_conflicts() {
        let (tracker, _dir) = tracker(Duration::from_secs(300)).await;
        let first = tracker.begin("cust-1").await.unwrap();
        assert!(first.sync_id.starts_with("sync-"));
        assert!(first.is_syncing);

        let err = tracker.begin("cust-1").await.unwrap_err();
        assert!(matches!(err, UniboxError::Conflict(_)));
        tracker.begin("cust-2").await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let (tracker, _dir) = tracker(Duration::from_secs(300)).await;
        let sync = tracker.begin("cust-1").await.unwrap();
        tracker.mark_running("cust-1", &sync.sync_id).await.unwrap();
        let done = tracker.complete("cust-1", &sync.sync_id, 10, 2).await.unwrap();
        assert_eq!(done.status, SyncState::Completed);
        assert_eq!(done.total_messages, Some(10));
        assert!(done.last_sync_time.is_some());

        let err = tracker.mark_running("cust-1", &sync.sync_id).await.unwrap_err();
        assert!(matches!(err, UniboxError::Conflict(_)));

        let again = tracker.begin("cust-1").await.unwrap();
        assert_ne!(again.sync_id, sync.sync_id);
    }

    #[tokio::test]
    async fn unknown_sync_is_not_found() {
        let (tracker, _dir) = tracker(Duration::from_secs(300)).await;
        let err = tracker.fail("cust-1", "sync-missing", "x").await.unwrap_err();
        assert!(matches!(err, UniboxError::NotFound(_)));
        assert!(tracker.current("cust-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_sync_is_expired_on_read_and_begin() {
        let (tracker, _dir) = tracker(Duration::ZERO).await;
        let sync = tracker.begin("cust-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let current = tracker.current("cust-1").await.unwrap().unwrap();
        assert_eq!(current.sync_id, sync.sync_id);
        assert_eq!(current.status, SyncState::Completed);
        assert_eq!(current.error.as_deref(), Some(SYNC_TIMED_OUT));
        assert!(!current.is_syncing);

        tracker.begin("cust-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let next = tracker.begin("cust-1").await.unwrap();
        assert!(next.is_syncing);
    }

    #[tokio::test]
    async fn expired_sync_keeps_timeout_record_on_completion() {
        let (tracker, _dir) = tracker(Duration::ZERO).await;
        let sync = tracker.begin("cust-1").await.unwrap();
        tracker.mark_running("cust-1", &sync.sync_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = tracker.current("cust-1").await.unwrap().unwrap();
        assert_eq!(expired.status, SyncState::Completed);

        let finished = tracker.complete("cust-1", &sync.sync_id, 10, 2).await.unwrap();
        assert_eq!(finished, expired);
        let stored = tracker.get("cust-1", &sync.sync_id).await.unwrap();
        assert_eq!(stored.error.as_deref(), Some(SYNC_TIMED_OUT));
        assert_eq!(stored.total_messages, None);
    }

    #[test]
    fn staleness_threshold() {
        let status = SyncStatus {
            sync_id: "s".into(),
            customer_id: "c".into(),
            status: SyncState::Running,
            is_syncing: true,
            start_time: "2026-01-01T00:00:00.000Z".into(),
            last_sync_time: None,
            total_messages: None,
            total_chats: None,
            error: None,
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: "2026-01-01T00:00:00.000Z".into(),
        };
        let now = parse_timestamp("2026-01-01T00:04:59.000Z").unwrap();
        let later = parse_timestamp("2026-01-01T00:05:01.000Z").unwrap();
        let threshold = Duration::from_secs(300);
        assert!(!is_stale(&status, threshold, now));
        assert!(is_stale(&status, threshold, later));

        let completed = SyncStatus {
            status: SyncState::Completed,
            ..status
        };
        assert!(!is_stale(&completed, threshold, later));
    }
}
