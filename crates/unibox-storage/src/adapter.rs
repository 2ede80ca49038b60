// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the StorageAdapter trait.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use unibox_config::model::StorageConfig;
use unibox_core::{
    AdapterType, Conversation, DeliveryOutcome, HealthStatus, Message, PlatformIdentity,
    PluginAdapter, StorageAdapter, SyncStatus, SyncStatusUpdate, UniboxError,
};

use crate::database::Database;
use crate::queries;

/// SQLite-backed storage adapter.
///
/// Wraps a [`Database`] handle and delegates all query operations to the
/// typed query modules. The database is lazily initialized on the first
/// call to [`StorageAdapter::initialize`].
pub struct SqliteStorage {
    config: StorageConfig,
    db: OnceCell<Database>,
}

impl SqliteStorage {
    /// Create a new SqliteStorage with the given configuration.
    ///
    /// The database connection is not opened until [`StorageAdapter::initialize`] is called.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            db: OnceCell::new(),
        }
    }

    /// Returns a reference to the underlying Database, or an error if not initialized.
    fn db(&self) -> Result<&Database, UniboxError> {
        self.db.get().ok_or_else(|| UniboxError::Storage {
            source: "storage not initialized -- call initialize() first".into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, UniboxError> {
        let db = self.db()?;
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(crate::database::map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), UniboxError> {
        if let Some(db) = self.db.get() {
            db.checkpoint().await?;
            debug!("shutdown: WAL checkpoint complete");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn initialize(&self) -> Result<(), UniboxError> {
        let db = Database::open_with(&self.config.database_path, self.config.wal_mode).await?;
        self.db.set(db).map_err(|_| UniboxError::Storage {
            source: "storage already initialized".into(),
        })?;
        debug!(path = %self.config.database_path, "SQLite storage initialized");
        Ok(())
    }

    async fn close(&self) -> Result<(), UniboxError> {
        self.db()?.checkpoint().await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    // --- Conversations ---

    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), UniboxError> {
        queries::conversations::upsert_conversation(self.db()?, conversation).await
    }

    async fn get_conversation(
        &self,
        customer_id: &str,
        external_id: &str,
        connection_id: Option<&str>,
    ) -> Result<Option<Conversation>, UniboxError> {
        queries::conversations::get_conversation(self.db()?, customer_id, external_id, connection_id)
            .await
    }

    async fn list_conversations(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<Vec<Conversation>, UniboxError> {
        queries::conversations::list_conversations(self.db()?, customer_id, limit).await
    }

    async fn list_conversation_ids(
        &self,
        customer_id: &str,
        connection_id: &str,
    ) -> Result<HashSet<String>, UniboxError> {
        queries::conversations::list_conversation_ids(self.db()?, customer_id, connection_id).await
    }

    async fn touch_conversation(
        &self,
        customer_id: &str,
        connection_id: &str,
        external_id: &str,
        last_message: &str,
        last_message_time: &str,
        participant: &str,
    ) -> Result<(), UniboxError> {
        queries::conversations::touch_conversation(
            self.db()?,
            customer_id,
            connection_id,
            external_id,
            last_message,
            last_message_time,
            participant,
        )
        .await
    }

    // --- Messages ---

    async fn insert_message(&self, message: &Message) -> Result<bool, UniboxError> {
        queries::messages::insert_message(self.db()?, message).await
    }

    async fn get_message(
        &self,
        customer_id: &str,
        id: &str,
    ) -> Result<Option<Message>, UniboxError> {
        queries::messages::get_message(self.db()?, customer_id, id).await
    }

    async fn find_message_by_external_id(
        &self,
        customer_id: &str,
        external_message_id: &str,
        connection_id: Option<&str>,
    ) -> Result<Option<Message>, UniboxError> {
        queries::messages::find_message_by_external_id(
            self.db()?,
            customer_id,
            external_message_id,
            connection_id,
        )
        .await
    }

    async fn get_message_by_delivery_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Message>, UniboxError> {
        queries::messages::get_message_by_delivery_ref(self.db()?, reference).await
    }

    async fn list_messages(
        &self,
        customer_id: &str,
        conversation_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, UniboxError> {
        queries::messages::list_messages(self.db()?, customer_id, conversation_id, limit).await
    }

    async fn reset_for_delivery(
        &self,
        customer_id: &str,
        id: &str,
        correlation_id: &str,
    ) -> Result<(), UniboxError> {
        queries::messages::reset_for_delivery(self.db()?, customer_id, id, correlation_id).await
    }

    async fn set_operation_handle(
        &self,
        customer_id: &str,
        id: &str,
        operation_handle: &str,
    ) -> Result<bool, UniboxError> {
        queries::messages::set_operation_handle(self.db()?, customer_id, id, operation_handle)
            .await
    }

    async fn settle_delivery(
        &self,
        customer_id: &str,
        id: &str,
        reference: Option<&str>,
        outcome: &DeliveryOutcome,
    ) -> Result<bool, UniboxError> {
        queries::messages::settle_delivery(self.db()?, customer_id, id, reference, outcome)
            .await
    }

    async fn count_messages(&self, customer_id: &str) -> Result<i64, UniboxError> {
        queries::messages::count_messages(self.db()?, customer_id).await
    }

    // --- Sync status ---

    async fn create_sync_status(&self, status: &SyncStatus) -> Result<(), UniboxError> {
        queries::sync_status::create_sync_status(self.db()?, status).await
    }

    async fn get_active_sync(
        &self,
        customer_id: &str,
    ) -> Result<Option<SyncStatus>, UniboxError> {
        queries::sync_status::get_active_sync(self.db()?, customer_id).await
    }

    async fn get_latest_sync_status(
        &self,
        customer_id: &str,
    ) -> Result<Option<SyncStatus>, UniboxError> {
        queries::sync_status::get_latest_sync_status(self.db()?, customer_id).await
    }

    async fn get_sync_status(
        &self,
        customer_id: &str,
        sync_id: &str,
    ) -> Result<Option<SyncStatus>, UniboxError> {
        queries::sync_status::get_sync_status(self.db()?, customer_id, sync_id).await
    }

    async fn update_sync_status(
        &self,
        customer_id: &str,
        sync_id: &str,
        update: &SyncStatusUpdate,
    ) -> Result<Option<SyncStatus>, UniboxError> {
        queries::sync_status::update_sync_status(self.db()?, customer_id, sync_id, update).await
    }

    // --- Platform identities ---

    async fn upsert_platform_identity(
        &self,
        identity: &PlatformIdentity,
    ) -> Result<(), UniboxError> {
        queries::platforms::upsert_platform_identity(self.db()?, identity).await
    }

    async fn get_platform_identity(
        &self,
        customer_id: &str,
        platform_id: &str,
    ) -> Result<Option<PlatformIdentity>, UniboxError> {
        queries::platforms::get_platform_identity(self.db()?, customer_id, platform_id).await
    }

    async fn list_platform_identities(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PlatformIdentity>, UniboxError> {
        queries::platforms::list_platform_identities(self.db()?, customer_id).await
    }

    async fn set_import_new(
        &self,
        customer_id: &str,
        platform_id: &str,
        import_new: bool,
    ) -> Result<(), UniboxError> {
        queries::platforms::set_import_new(self.db()?, customer_id, platform_id, import_new).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use unibox_core::{DeliveryStatus, MessageType};

    fn make_config(path: &str) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string(),
            wal_mode: true,
        }
    }

    #[tokio::test]
    async fn sqlite_storage_implements_plugin_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert_eq!(storage.name(), "sqlite");
        assert_eq!(storage.version(), semver::Version::new(0, 1, 0));
        assert_eq!(storage.adapter_type(), AdapterType::Storage);
    }

    #[tokio::test]
    async fn initialize_opens_database_at_configured_path() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("init_test.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(db_path.exists(), "database file should be created");
    }

    #[tokio::test]
    async fn initialize_twice_returns_error() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("double_init.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        storage.initialize().await.unwrap();
        assert!(storage.initialize().await.is_err());
    }

    #[tokio::test]
    async fn health_check_tracks_initialization() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("health.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        assert!(storage.health_check().await.is_err());
        storage.initialize().await.unwrap();
        assert_eq!(storage.health_check().await.unwrap(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn outbound_message_lifecycle_through_adapter() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("lifecycle.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));
        storage.initialize().await.unwrap();

        let msg = Message {
            id: "msg-1".to_string(),
            customer_id: "cust-1".to_string(),
            content: "hello".to_string(),
            sender: "alice".to_string(),
            owner_name: Some("alice".to_string()),
            timestamp: "2026-01-01T00:00:01.000Z".to_string(),
            conversation_id: Some("C1".to_string()),
            connection_id: "conn-1".to_string(),
            platform_name: Some("Slack".to_string()),
            message_type: MessageType::User,
            status: DeliveryStatus::Pending,
            external_message_id: None,
            error: None,
            operation_handle: None,
            correlation_id: None,
            created_at: "2026-01-01T00:00:01.000Z".to_string(),
            updated_at: "2026-01-01T00:00:01.000Z".to_string(),
        };
        assert!(storage.insert_message(&msg).await.unwrap());
        assert!(
            storage
                .set_operation_handle("cust-1", "msg-1", "run-1")
                .await
                .unwrap()
        );

        let found = storage
            .get_message_by_delivery_ref("run-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "msg-1");

        let outcome = DeliveryOutcome::Failed {
            error: "channel archived".to_string(),
        };
        assert!(
            storage
                .settle_delivery("cust-1", "msg-1", Some("run-1"), &outcome)
                .await
                .unwrap()
        );
        let failed = storage.get_message("cust-1", "msg-1").await.unwrap().unwrap();
        assert_eq!(failed.status, DeliveryStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("channel archived"));

        storage
            .reset_for_delivery("cust-1", "msg-1", "corr-2")
            .await
            .unwrap();
        let pending = storage.get_message("cust-1", "msg-1").await.unwrap().unwrap();
        assert_eq!(pending.status, DeliveryStatus::Pending);
        assert_eq!(storage.count_messages("cust-1").await.unwrap(), 1);

        storage.close().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_runs_checkpoint() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("shutdown.db");
        let storage = SqliteStorage::new(make_config(db_path.to_str().unwrap()));

        // Shutdown before initialize is a no-op.
        storage.shutdown().await.unwrap();
        storage.initialize().await.unwrap();
        storage.set_import_new("cust-1", "conn-1", false).await.unwrap();
        storage.shutdown().await.unwrap();
    }
}
