// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait for persistence backends (SQLite, etc.).

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::UniboxError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    Conversation, DeliveryOutcome, Message, PlatformIdentity, SyncStatus, SyncStatusUpdate,
};

/// Adapter for storage and persistence backends.
///
/// Every query is scoped by customer id except the delivery-callback lookups,
/// which are keyed by a globally unique operation handle.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connection, etc.).
    async fn initialize(&self) -> Result<(), UniboxError>;

    /// Closes the storage backend, flushing pending writes and releasing connections.
    async fn close(&self) -> Result<(), UniboxError>;

    // --- Conversations ---

    /// Inserts or refreshes a conversation keyed by (customer, connection, external id).
    ///
    /// The stored `import_new` flag and `created_at` survive updates. A `None`
    /// last message or time does not overwrite a stored value.
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), UniboxError>;

    /// Finds a conversation by external id, optionally restricted to one connection.
    async fn get_conversation(
        &self,
        customer_id: &str,
        external_id: &str,
        connection_id: Option<&str>,
    ) -> Result<Option<Conversation>, UniboxError>;

    /// Lists conversations newest activity first.
    async fn list_conversations(
        &self,
        customer_id: &str,
        limit: u32,
    ) -> Result<Vec<Conversation>, UniboxError>;

    /// External ids of every stored conversation of one connection.
    async fn list_conversation_ids(
        &self,
        customer_id: &str,
        connection_id: &str,
    ) -> Result<HashSet<String>, UniboxError>;

    /// Refreshes the last-message preview of a conversation and records a participant.
    async fn touch_conversation(
        &self,
        customer_id: &str,
        connection_id: &str,
        external_id: &str,
        last_message: &str,
        last_message_time: &str,
        participant: &str,
    ) -> Result<(), UniboxError>;

    // --- Messages ---

    /// Inserts a message unless its dedup key already exists.
    ///
    /// Returns `true` if a row was written.
    async fn insert_message(&self, message: &Message) -> Result<bool, UniboxError>;

    /// Fetches a message by local id.
    async fn get_message(&self, customer_id: &str, id: &str)
    -> Result<Option<Message>, UniboxError>;

    /// Finds a message by platform-assigned id, optionally within one connection.
    async fn find_message_by_external_id(
        &self,
        customer_id: &str,
        external_message_id: &str,
        connection_id: Option<&str>,
    ) -> Result<Option<Message>, UniboxError>;

    /// Finds the message whose operation handle or correlation id is `reference`.
    async fn get_message_by_delivery_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Message>, UniboxError>;

    /// Lists messages oldest first, optionally restricted to one conversation.
    async fn list_messages(
        &self,
        customer_id: &str,
        conversation_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Message>, UniboxError>;

    /// Puts a `pending` or `failed` outbound message back into `pending`,
    /// clearing error and handle and recording a new correlation id.
    ///
    /// Sent or received rows are [`UniboxError::Conflict`].
    async fn reset_for_delivery(
        &self,
        customer_id: &str,
        id: &str,
        correlation_id: &str,
    ) -> Result<(), UniboxError>;

    /// Attaches an operation handle to a pending message.
    ///
    /// Returns `false` if the message is no longer pending.
    async fn set_operation_handle(
        &self,
        customer_id: &str,
        id: &str,
        operation_handle: &str,
    ) -> Result<bool, UniboxError>;

    /// Applies a terminal delivery outcome to a pending message.
    ///
    /// When `reference` is given the row must carry it as operation handle
    /// or correlation id.
    /// Returns `false` if no pending row matched, leaving storage untouched.
    async fn settle_delivery(
        &self,
        customer_id: &str,
        id: &str,
        reference: Option<&str>,
        outcome: &DeliveryOutcome,
    ) -> Result<bool, UniboxError>;

    /// Counts the customer's stored messages.
    async fn count_messages(&self, customer_id: &str) -> Result<i64, UniboxError>;

    // --- Sync status ---

    /// Creates a sync record.
    ///
    /// Fails with [`UniboxError::Conflict`] if the customer already has an
    /// active (pending or running) sync.
    async fn create_sync_status(&self, status: &SyncStatus) -> Result<(), UniboxError>;

    /// Returns the customer's pending or running sync, if any.
    async fn get_active_sync(&self, customer_id: &str)
    -> Result<Option<SyncStatus>, UniboxError>;

    /// Returns the customer's most recently started sync.
    async fn get_latest_sync_status(
        &self,
        customer_id: &str,
    ) -> Result<Option<SyncStatus>, UniboxError>;

    /// Fetches one sync record.
    async fn get_sync_status(
        &self,
        customer_id: &str,
        sync_id: &str,
    ) -> Result<Option<SyncStatus>, UniboxError>;

    /// Writes a status transition and returns the updated record.
    ///
    /// Callers validate the transition; this only persists it.
    async fn update_sync_status(
        &self,
        customer_id: &str,
        sync_id: &str,
        update: &SyncStatusUpdate,
    ) -> Result<Option<SyncStatus>, UniboxError>;

    // --- Platform identities ---

    /// Inserts or refreshes an identity keyed by (customer, platform id),
    /// preserving a stored `import_new` flag.
    async fn upsert_platform_identity(
        &self,
        identity: &PlatformIdentity,
    ) -> Result<(), UniboxError>;

    async fn get_platform_identity(
        &self,
        customer_id: &str,
        platform_id: &str,
    ) -> Result<Option<PlatformIdentity>, UniboxError>;

    /// Lists identities most recently synced first.
    async fn list_platform_identities(
        &self,
        customer_id: &str,
    ) -> Result<Vec<PlatformIdentity>, UniboxError>;

    /// Sets only the `import_new` flag, creating a bare record if none exists.
    async fn set_import_new(
        &self,
        customer_id: &str,
        platform_id: &str,
        import_new: bool,
    ) -> Result<(), UniboxError>;
}
