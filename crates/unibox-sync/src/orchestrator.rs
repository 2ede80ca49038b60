// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sync orchestration.
//!
//! A run walks connections, then conversations, then messages, strictly in
//! sequence. Failures of a single connection, conversation, or message are
//! logged and skipped; only failures before any per-item work (no
//! credentials, no connections) fail the run.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use unibox_core::types::now_iso;
use unibox_core::{
    Connection, ConnectorAdapter, Conversation, Customer, DeliveryStatus, Message, MessageType,
    RawRecord, StorageAdapter, UniboxError,
};

use crate::backoff::{Pacing, collect_pages, pause, with_rate_limit_retry};
use crate::mentions::MentionResolver;
use crate::normalize::{NormalizedConversation, local_message_id, normalize_conversation, normalize_message};
use crate::status::SyncTracker;

/// Error text recorded when a customer has nothing to sync.
pub const NO_CONNECTIONS: &str = "No apps connected to sync messages from";

/// Aggregate result of a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub total_messages: i64,
    pub total_chats: i64,
}

/// Drives the connection, conversation, and message import.
pub struct SyncOrchestrator {
    connector: Arc<dyn ConnectorAdapter>,
    storage: Arc<dyn StorageAdapter>,
    tracker: SyncTracker,
    mentions: MentionResolver,
    pacing: Pacing,
}

impl SyncOrchestrator {
    pub fn new(
        connector: Arc<dyn ConnectorAdapter>,
        storage: Arc<dyn StorageAdapter>,
        tracker: SyncTracker,
        mentions: MentionResolver,
        pacing: Pacing,
    ) -> Self {
        Self {
            connector,
            storage,
            tracker,
            mentions,
            pacing,
        }
    }

    pub fn mentions(&self) -> &MentionResolver {
        &self.mentions
    }

    /// Executes the sync `sync_id` for the customer and records its outcome.
    pub async fn run(&self, customer: &Customer, sync_id: &str) -> Result<SyncReport, UniboxError> {
        let started = Instant::now();
        self.tracker.mark_running(&customer.id, sync_id).await?;
        info!(customer_id = %customer.id, sync_id, "sync running");

        match self.import_all(customer).await {
            Ok(report) => {
                self.tracker
                    .complete(&customer.id, sync_id, report.total_messages, report.total_chats)
                    .await?;
                info!(
                    customer_id = %customer.id,
                    sync_id,
                    total_messages = report.total_messages,
                    total_chats = report.total_chats,
                    "sync completed"
                );
                record_run("completed", &report, started);
                Ok(report)
            }
            Err(e) => {
                let message = match &e {
                    UniboxError::Validation(msg) => msg.clone(),
                    other => other.to_string(),
                };
                warn!(customer_id = %customer.id, sync_id, error = %message, "sync failed");
                if let Err(update_err) = self.tracker.fail(&customer.id, sync_id, &message).await {
                    warn!(sync_id, error = %update_err, "failed to record sync failure");
                }
                record_run("failed", &SyncReport::default(), started);
                Err(e)
            }
        }
    }

    async fn import_all(&self, customer: &Customer) -> Result<SyncReport, UniboxError> {
        let connections = with_rate_limit_retry("list-connections", self.pacing.rate_limit_backoff, || {
            self.connector.list_connections(customer)
        })
        .await?;

        if connections.is_empty() {
            return Err(UniboxError::Validation(NO_CONNECTIONS.to_string()));
        }

        let mut report = SyncReport::default();
        for (i, connection) in connections.iter().enumerate() {
            if i > 0 {
                pause(self.pacing.connection_delay).await;
            }
            debug!(connection_id = %connection.id, name = connection.label(), "processing connection");
            if let Err(e) = self.import_connection(customer, connection, &mut report).await {
                warn!(
                    customer_id = %customer.id,
                    connection_id = %connection.id,
                    error = %e,
                    "skipping connection"
                );
            }
        }
        Ok(report)
    }

    async fn import_connection(
        &self,
        customer: &Customer,
        connection: &Connection,
        report: &mut SyncReport,
    ) -> Result<(), UniboxError> {
        let records = self.list_remote_conversations(customer, &connection.id).await?;

        let mut conversations = Vec::with_capacity(records.len());
        for record in &records {
            let Some(normalized) = normalize_conversation(record) else {
                warn!(connection_id = %connection.id, "skipping conversation without id");
                continue;
            };
            match self.store_conversation(customer, connection, &normalized).await {
                Ok(()) => {
                    report.total_chats += 1;
                    conversations.push(normalized.external_id);
                }
                Err(e) => warn!(
                    connection_id = %connection.id,
                    conversation_id = %normalized.external_id,
                    error = %e,
                    "skipping conversation"
                ),
            }
        }

        let own_user_id = self
            .storage
            .get_platform_identity(&customer.id, &connection.id)
            .await?
            .and_then(|identity| identity.external_user_id);

        for conversation_id in &conversations {
            match self
                .import_messages(customer, connection, conversation_id, own_user_id.as_deref())
                .await
            {
                Ok(imported) => report.total_messages += imported,
                Err(e) => warn!(
                    connection_id = %connection.id,
                    conversation_id = %conversation_id,
                    error = %e,
                    "skipping conversation messages"
                ),
            }
        }
        Ok(())
    }

    async fn store_conversation(
        &self,
        customer: &Customer,
        connection: &Connection,
        normalized: &NormalizedConversation,
    ) -> Result<(), UniboxError> {
        let now = now_iso();
        let conversation = Conversation {
            customer_id: customer.id.clone(),
            external_id: normalized.external_id.clone(),
            connection_id: connection.id.clone(),
            name: normalized.name.clone(),
            participants: normalized.participants.clone(),
            last_message: normalized.last_message.clone(),
            last_message_time: normalized.last_message_time.clone(),
            platform_name: Some(connection.label().to_string()),
            import_new: false,
            created_at: now.clone(),
            updated_at: now,
        };
        self.storage.upsert_conversation(&conversation).await
    }

    async fn import_messages(
        &self,
        customer: &Customer,
        connection: &Connection,
        conversation_id: &str,
        own_user_id: Option<&str>,
    ) -> Result<i64, UniboxError> {
        let records = collect_pages("get-messages", &self.pacing, |cursor| {
            let connector = Arc::clone(&self.connector);
            let customer = customer.clone();
            let connection_id = connection.id.clone();
            let conversation_id = conversation_id.to_string();
            async move {
                connector
                    .list_messages(&customer, &connection_id, &conversation_id, cursor.as_deref())
                    .await
            }
        })
        .await?;

        let mut imported = 0;
        for record in &records {
            match self
                .import_message(customer, connection, conversation_id, own_user_id, record)
                .await
            {
                Ok(true) => imported += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    connection_id = %connection.id,
                    conversation_id,
                    error = %e,
                    "skipping message"
                ),
            }
        }
        Ok(imported)
    }

    /// Stores one message record. Returns `false` for already imported messages.
    async fn import_message(
        &self,
        customer: &Customer,
        connection: &Connection,
        conversation_id: &str,
        own_user_id: Option<&str>,
        record: &RawRecord,
    ) -> Result<bool, UniboxError> {
        let normalized = normalize_message(record);
        let external_id = normalized.external_id_or_derived(&connection.id, conversation_id);

        if self
            .storage
            .find_message_by_external_id(&customer.id, &external_id, Some(&connection.id))
            .await?
            .is_some()
        {
            debug!(message_id = %external_id, "message already imported");
            return Ok(false);
        }

        let content = self
            .mentions
            .resolve(
                self.connector.as_ref(),
                customer,
                &connection.id,
                connection.platform_key(),
                &normalized.content,
            )
            .await;

        let message_type = if own_user_id == Some(normalized.sender.as_str()) {
            MessageType::User
        } else {
            MessageType::ThirdParty
        };

        let now = now_iso();
        let message = Message {
            id: local_message_id(&connection.id, &external_id),
            customer_id: customer.id.clone(),
            content,
            sender: normalized.sender,
            owner_name: normalized.owner_name,
            timestamp: normalized.timestamp.unwrap_or_else(|| now.clone()),
            conversation_id: Some(conversation_id.to_string()),
            connection_id: connection.id.clone(),
            platform_name: Some(connection.label().to_string()),
            message_type,
            status: DeliveryStatus::Sent,
            external_message_id: Some(external_id),
            error: None,
            operation_handle: None,
            correlation_id: None,
            created_at: now.clone(),
            updated_at: now,
        };
        self.storage.insert_message(&message).await
    }

    /// Every remote conversation of a connection, across all pages.
    pub async fn list_remote_conversations(
        &self,
        customer: &Customer,
        connection_id: &str,
    ) -> Result<Vec<RawRecord>, UniboxError> {
        collect_pages("get-chats", &self.pacing, |cursor| {
            let connector = Arc::clone(&self.connector);
            let customer = customer.clone();
            let connection_id = connection_id.to_string();
            async move {
                connector
                    .list_conversations(&customer, &connection_id, cursor.as_deref())
                    .await
            }
        })
        .await
    }

    /// Remote conversations of a connection that are not stored locally yet.
    pub async fn available_conversations(
        &self,
        customer: &Customer,
        connection_id: &str,
    ) -> Result<Vec<NormalizedConversation>, UniboxError> {
        if connection_id.trim().is_empty() {
            return Err(UniboxError::Validation("integrationKey is required".to_string()));
        }
        let records = self.list_remote_conversations(customer, connection_id).await?;
        let stored = self
            .storage
            .list_conversation_ids(&customer.id, connection_id)
            .await?;
        Ok(records
            .iter()
            .filter_map(normalize_conversation)
            .filter(|c| !stored.contains(&c.external_id))
            .collect())
    }
}

#[cfg(feature = "prometheus")]
fn record_run(outcome: &str, report: &SyncReport, started: Instant) {
    unibox_prometheus::record_sync_run(
        outcome,
        u64::try_from(report.total_messages).unwrap_or_default(),
        u64::try_from(report.total_chats).unwrap_or_default(),
        started.elapsed().as_secs_f64(),
    );
}

#[cfg(not(feature = "prometheus"))]
fn record_run(_outcome: &str, _report: &SyncReport, _started: Instant) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use unibox_core::{PlatformIdentity, SyncState};
    use unibox_test_utils::{MockCall, MockConnector, MockFailure, record, temp_storage};

    struct Fixture {
        orchestrator: SyncOrchestrator,
        tracker: SyncTracker,
        storage: Arc<dyn StorageAdapter>,
        connector: Arc<MockConnector>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(connector: MockConnector) -> Fixture {
        let (storage, dir) = temp_storage().await;
        let connector = Arc::new(connector);
        let tracker = SyncTracker::new(Arc::clone(&storage), Duration::from_secs(300));
        let orchestrator = SyncOrchestrator::new(
            connector.clone(),
            Arc::clone(&storage),
            tracker.clone(),
            MentionResolver::default(),
            Pacing::immediate(),
        );
        Fixture {
            orchestrator,
            tracker,
            storage,
            connector,
            _dir: dir,
        }
    }

    fn slack_connector() -> MockConnector {
        MockConnector::new()
            .with_connection("conn-1", Some("Slack"), Some("slack"))
            .with_conversations(
                "conn-1",
                vec![
                    record(json!({"id": "C1", "fields": {"name": "general"}, "members": ["U1", "U2"]})),
                    record(json!({"id": "C2", "name": "random"})),
                ],
            )
            .with_messages(
                "conn-1",
                "C1",
                vec![
                    record(json!({"id": "m1", "fields": {"text": "hi <@U2>", "ownerId": "U1"}, "rawFields": {"ts": "1753303953.454369"}})),
                    record(json!({"id": "m2", "text": "yo", "sender": "U2"})),
                ],
            )
            .with_messages("conn-1", "C2", vec![record(json!({"id": "m3", "text": "x", "from": "U3"}))])
    }

    async fn run_once(fx: &Fixture, customer: &Customer) -> Result<SyncReport, UniboxError> {
        let sync = fx.tracker.begin(&customer.id).await.unwrap();
        fx.orchestrator.run(customer, &sync.sync_id).await
    }

    #[tokio::test]
    async fn imports_conversations_and_messages() {
        let fx = fixture(slack_connector().with_user_mappings(
            "conn-1",
            [("U2".to_string(), "bob".to_string())].into(),
        ))
        .await;
        let customer = Customer::new("cust-1");

        let report = run_once(&fx, &customer).await.unwrap();
        assert_eq!(report, SyncReport { total_messages: 3, total_chats: 2 });

        let status = fx.tracker.current("cust-1").await.unwrap().unwrap();
        assert_eq!(status.status, SyncState::Completed);
        assert_eq!(status.total_messages, Some(3));
        assert_eq!(status.total_chats, Some(2));

        let messages = fx.storage.list_messages("cust-1", Some("C1"), 100).await.unwrap();
        assert_eq!(messages.len(), 2);
        let first = messages.iter().find(|m| m.external_message_id.as_deref() == Some("m1")).unwrap();
        assert_eq!(first.content, "hi @bob");
        assert_eq!(first.timestamp, "2025-07-23T20:52:33.454Z");
        assert_eq!(first.status, DeliveryStatus::Sent);
        assert_eq!(first.platform_name.as_deref(), Some("Slack"));

        let conv = fx.storage.get_conversation("cust-1", "C1", Some("conn-1")).await.unwrap().unwrap();
        assert_eq!(conv.name, "general");
        assert_eq!(conv.participants, vec!["U1", "U2"]);
    }

    #[tokio::test]
    async fn second_run_creates_no_duplicates() {
        let fx = fixture(slack_connector()).await;
        let customer = Customer::new("cust-1");

        run_once(&fx, &customer).await.unwrap();
        let again = run_once(&fx, &customer).await.unwrap();
        assert_eq!(again.total_messages, 0);
        assert_eq!(again.total_chats, 2);

        assert_eq!(fx.storage.count_messages("cust-1").await.unwrap(), 3);
        assert_eq!(fx.storage.list_conversations("cust-1", 100).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn own_messages_are_marked_user() {
        let fx = fixture(slack_connector()).await;
        let now = now_iso();
        fx.storage
            .upsert_platform_identity(&PlatformIdentity {
                customer_id: "cust-1".into(),
                platform_id: "conn-1".into(),
                platform_name: "Slack".into(),
                connection_id: "conn-1".into(),
                external_user_id: Some("U1".into()),
                external_user_name: None,
                external_user_email: None,
                import_new: true,
                last_synced: now.clone(),
                created_at: now.clone(),
                updated_at: now,
            })
            .await
            .unwrap();

        run_once(&fx, &Customer::new("cust-1")).await.unwrap();
        let messages = fx.storage.list_messages("cust-1", Some("C1"), 100).await.unwrap();
        for msg in messages {
            let expected = if msg.sender == "U1" { MessageType::User } else { MessageType::ThirdParty };
            assert_eq!(msg.message_type, expected);
        }
    }

    #[tokio::test]
    async fn zero_connections_fail_the_run() {
        let fx = fixture(MockConnector::new()).await;
        let err = run_once(&fx, &Customer::new("cust-1")).await.unwrap_err();
        assert!(matches!(err, UniboxError::Validation(_)));

        let status = fx.tracker.current("cust-1").await.unwrap().unwrap();
        assert_eq!(status.status, SyncState::Failed);
        assert_eq!(status.error.as_deref(), Some(NO_CONNECTIONS));
    }

    #[tokio::test]
    async fn auth_failure_fails_the_run() {
        let connector = slack_connector();
        connector
            .fail_next(MockCall::ListConnections, MockFailure::Auth("no credentials".into()))
            .await;
        let fx = fixture(connector).await;
        let err = run_once(&fx, &Customer::new("cust-1")).await.unwrap_err();
        assert!(matches!(err, UniboxError::Auth(_)));
        let status = fx.tracker.current("cust-1").await.unwrap().unwrap();
        assert_eq!(status.status, SyncState::Failed);
    }

    #[tokio::test]
    async fn rate_limited_call_is_retried_once() {
        let connector = slack_connector();
        connector.fail_next(MockCall::ListConversations, MockFailure::RateLimited).await;
        let fx = fixture(connector).await;

        let report = run_once(&fx, &Customer::new("cust-1")).await.unwrap();
        assert_eq!(report.total_chats, 2);
        assert_eq!(fx.connector.calls(MockCall::ListConversations).await, 2);
    }

    #[tokio::test]
    async fn per_conversation_failure_is_isolated() {
        let connector = slack_connector();
        connector.fail_next(MockCall::ListMessages, MockFailure::RateLimited).await;
        connector.fail_next(MockCall::ListMessages, MockFailure::RateLimited).await;
        let fx = fixture(connector).await;

        let report = run_once(&fx, &Customer::new("cust-1")).await.unwrap();
        assert_eq!(report.total_chats, 2);
        assert_eq!(report.total_messages, 1);
        let status = fx.tracker.current("cust-1").await.unwrap().unwrap();
        assert_eq!(status.status, SyncState::Completed);
    }

    #[tokio::test]
    async fn paginates_conversations_fully() {
        let convs: Vec<RawRecord> = (0..5).map(|i| record(json!({"id": format!("C{i}")}))).collect();
        let connector = MockConnector::new()
            .with_connection("conn-1", None, None)
            .with_conversations("conn-1", convs)
            .with_page_size(2);
        let fx = fixture(connector).await;

        let report = run_once(&fx, &Customer::new("cust-1")).await.unwrap();
        assert_eq!(report.total_chats, 5);
        assert_eq!(fx.connector.calls(MockCall::ListConversations).await, 3);
    }

    #[tokio::test]
    async fn available_excludes_stored_conversations() {
        let fx = fixture(slack_connector()).await;
        let customer = Customer::new("cust-1");
        let before = fx.orchestrator.available_conversations(&customer, "conn-1").await.unwrap();
        assert_eq!(before.len(), 2);

        fx.orchestrator
            .store_conversation(
                &customer,
                &Connection { id: "conn-1".into(), name: None, platform: None },
                &before[0],
            )
            .await
            .unwrap();
        let after = fx.orchestrator.available_conversations(&customer, "conn-1").await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].external_id, "C2");
    }
}
