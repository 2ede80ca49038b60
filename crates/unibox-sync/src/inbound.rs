// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound message webhook ingestion.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use unibox_core::types::now_iso;
use unibox_core::{
    ConnectorAdapter, Conversation, Customer, DeliveryStatus, Message, MessageType,
    StorageAdapter, UniboxError,
};

use crate::backoff::{Pacing, collect_pages};
use crate::normalize::{first_string, local_message_id, CONVERSATION_ID, CONVERSATION_NAME};
use crate::timestamp::normalize_timestamp_value;

const UNKNOWN_PLATFORM: &str = "Unknown";
const UNKNOWN_INTEGRATION: &str = "unknown";

/// Message event pushed by the broker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub external_message_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub data: InboundData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub platform_name: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundReceipt {
    pub message_id: String,
    pub chat_id: String,
    pub external_message_id: String,
    pub duplicate: bool,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Stores messages pushed by the broker.
pub struct InboundReceiver {
    connector: Arc<dyn ConnectorAdapter>,
    storage: Arc<dyn StorageAdapter>,
    pacing: Pacing,
}

impl InboundReceiver {
    pub fn new(
        connector: Arc<dyn ConnectorAdapter>,
        storage: Arc<dyn StorageAdapter>,
        pacing: Pacing,
    ) -> Self {
        // Name lookups answer a webhook; no inter-page pause.
        let pacing = Pacing {
            call_delay: Duration::ZERO,
            ..pacing
        };
        Self {
            connector,
            storage,
            pacing,
        }
    }

    /// Stores one inbound message.
    ///
    /// A message already stored for the customer is reported as a duplicate.
    /// A message for an unknown conversation is rejected with
    /// [`UniboxError::ImportDisabled`] when the platform opted out of
    /// importing new conversations.
    pub async fn receive(&self, event: &InboundMessage) -> Result<InboundReceipt, UniboxError> {
        let (Some(customer_id), Some(chat_id), Some(external_id)) = (
            non_empty(&event.customer_id),
            non_empty(&event.data.chat_id),
            non_empty(&event.external_message_id).or(non_empty(&event.data.id)),
        ) else {
            return Err(UniboxError::Validation(
                "Missing required fields: externalMessageId, customerId, data.chatId".to_string(),
            ));
        };
        let customer = Customer::new(customer_id);
        let connection_id = non_empty(&event.data.integration_id).unwrap_or(UNKNOWN_INTEGRATION);

        if let Some(existing) = self
            .storage
            .find_message_by_external_id(customer_id, external_id, None)
            .await?
        {
            debug!(customer_id, message_id = %existing.id, "duplicate inbound message");
            record_inbound("duplicate");
            return Ok(InboundReceipt {
                message_id: existing.id,
                chat_id: chat_id.to_string(),
                external_message_id: external_id.to_string(),
                duplicate: true,
            });
        }

        let content = event.data.content.clone().unwrap_or_default();
        let sender = non_empty(&event.data.owner_id).unwrap_or("Unknown").to_string();
        let platform_name = non_empty(&event.data.platform_name).unwrap_or(UNKNOWN_PLATFORM);
        let now = now_iso();
        let timestamp = event
            .data
            .timestamp
            .as_ref()
            .and_then(normalize_timestamp_value)
            .unwrap_or_else(|| now.clone());

        let known = self
            .storage
            .get_conversation(customer_id, chat_id, Some(connection_id))
            .await?
            .is_some();
        if known {
            self.storage
                .touch_conversation(customer_id, connection_id, chat_id, &content, &timestamp, &sender)
                .await?;
        } else {
            let import_new = self
                .storage
                .get_platform_identity(customer_id, connection_id)
                .await?
                .is_none_or(|identity| identity.import_new);
            if !import_new {
                info!(customer_id, connection_id, chat_id, "inbound message for unknown chat, import disabled");
                record_inbound("import_disabled");
                return Err(UniboxError::ImportDisabled {
                    platform_id: connection_id.to_string(),
                });
            }

            let name = self.remote_name(&customer, connection_id, chat_id).await;
            let conversation = Conversation {
                customer_id: customer_id.to_string(),
                external_id: chat_id.to_string(),
                connection_id: connection_id.to_string(),
                name,
                participants: vec![sender.clone()],
                last_message: Some(content.clone()),
                last_message_time: Some(timestamp.clone()),
                platform_name: Some(platform_name.to_string()),
                import_new: true,
                created_at: now.clone(),
                updated_at: now.clone(),
            };
            self.storage.upsert_conversation(&conversation).await?;
            info!(customer_id, connection_id, chat_id, "conversation created from inbound message");
        }

        let message = Message {
            id: local_message_id(connection_id, external_id),
            customer_id: customer_id.to_string(),
            content,
            sender,
            owner_name: event.data.owner_name.clone(),
            timestamp,
            conversation_id: Some(chat_id.to_string()),
            connection_id: connection_id.to_string(),
            platform_name: Some(platform_name.to_string()),
            message_type: MessageType::ThirdParty,
            status: DeliveryStatus::Sent,
            external_message_id: Some(external_id.to_string()),
            error: None,
            operation_handle: None,
            correlation_id: None,
            created_at: now.clone(),
            updated_at: now,
        };
        let written = self.storage.insert_message(&message).await?;
        record_inbound(if written { "stored" } else { "duplicate" });

        Ok(InboundReceipt {
            message_id: message.id,
            chat_id: chat_id.to_string(),
            external_message_id: external_id.to_string(),
            duplicate: !written,
        })
    }

    async fn remote_name(&self, customer: &Customer, connection_id: &str, chat_id: &str) -> String {
        let fallback = || format!("Chat {chat_id}");
        let records = collect_pages("get-chats", &self.pacing, |cursor| {
            let connector = Arc::clone(&self.connector);
            let customer = customer.clone();
            let connection_id = connection_id.to_string();
            async move {
                connector
                    .list_conversations(&customer, &connection_id, cursor.as_deref())
                    .await
            }
        })
        .await;

        match records {
            Ok(records) => records
                .iter()
                .find(|r| first_string(r, CONVERSATION_ID).as_deref() == Some(chat_id))
                .and_then(|r| first_string(r, CONVERSATION_NAME))
                .unwrap_or_else(fallback),
            Err(e) => {
                warn!(connection_id, chat_id, error = %e, "chat name lookup failed");
                fallback()
            }
        }
    }
}

#[cfg(feature = "prometheus")]
fn record_inbound(outcome: &str) {
    unibox_prometheus::record_inbound(outcome);
}

#[cfg(not(feature = "prometheus"))]
fn record_inbound(_outcome: &str) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use unibox_test_utils::{MockCall, MockConnector, MockFailure, record, temp_storage};

    struct Fixture {
        receiver: InboundReceiver,
        storage: Arc<dyn StorageAdapter>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(connector: MockConnector) -> Fixture {
        let (storage, dir) = temp_storage().await;
        let receiver = InboundReceiver::new(Arc::new(connector), Arc::clone(&storage), Pacing::immediate());
        Fixture {
            receiver,
            storage,
            _dir: dir,
        }
    }

    fn event(external_id: &str, chat_id: &str) -> InboundMessage {
        serde_json::from_value(json!({
            "externalMessageId": external_id,
            "customerId": "cust-1",
            "data": {
                "id": external_id,
                "content": "hello there",
                "ownerId": "U7",
                "chatId": chat_id,
                "timestamp": "1753303953.454369",
                "platformName": "Slack",
                "integrationId": "conn-1"
            }
        }))
        .unwrap()
    }

    fn connector() -> MockConnector {
        MockConnector::new().with_conversations(
            "conn-1",
            vec![record(json!({"id": "C1", "fields": {"name": "support"}}))],
        )
    }

    #[tokio::test]
    async fn unknown_chat_is_created_with_remote_name() {
        let fx = fixture(connector()).await;
        let receipt = fx.receiver.receive(&event("m-1", "C1")).await.unwrap();
        assert!(!receipt.duplicate);
        assert_eq!(receipt.message_id, "conn-1:m-1");

        let conv = fx.storage.get_conversation("cust-1", "C1", Some("conn-1")).await.unwrap().unwrap();
        assert_eq!(conv.name, "support");
        assert_eq!(conv.participants, vec!["U7"]);
        assert_eq!(conv.last_message_time.as_deref(), Some("2025-07-23T20:52:33.454Z"));

        let stored = fx.storage.get_message("cust-1", "conn-1:m-1").await.unwrap().unwrap();
        assert_eq!(stored.message_type, MessageType::ThirdParty);
        assert_eq!(stored.status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn duplicate_delivery_stores_once() {
        let fx = fixture(connector()).await;
        fx.receiver.receive(&event("m-1", "C1")).await.unwrap();
        let again = fx.receiver.receive(&event("m-1", "C1")).await.unwrap();
        assert!(again.duplicate);
        assert_eq!(again.message_id, "conn-1:m-1");
        assert_eq!(fx.storage.count_messages("cust-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn import_disabled_rejects_unknown_chat() {
        let fx = fixture(connector()).await;
        fx.storage.set_import_new("cust-1", "conn-1", false).await.unwrap();

        let err = fx.receiver.receive(&event("m-1", "C1")).await.unwrap_err();
        assert!(matches!(err, UniboxError::ImportDisabled { ref platform_id } if platform_id == "conn-1"));
        assert!(fx.storage.get_conversation("cust-1", "C1", None).await.unwrap().is_none());
        assert_eq!(fx.storage.count_messages("cust-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn known_chat_is_touched_even_when_import_disabled() {
        let fx = fixture(connector()).await;
        fx.receiver.receive(&event("m-1", "C1")).await.unwrap();
        fx.storage.set_import_new("cust-1", "conn-1", false).await.unwrap();

        let mut second = event("m-2", "C1");
        second.data.owner_id = Some("U8".into());
        second.data.content = Some("follow up".into());
        fx.receiver.receive(&second).await.unwrap();

        let conv = fx.storage.get_conversation("cust-1", "C1", Some("conn-1")).await.unwrap().unwrap();
        assert_eq!(conv.last_message.as_deref(), Some("follow up"));
        assert_eq!(conv.participants, vec!["U7", "U8"]);
    }

    #[tokio::test]
    async fn name_lookup_failure_falls_back() {
        let connector = connector();
        connector
            .fail_next(MockCall::ListConversations, MockFailure::Upstream("down".into()))
            .await;
        let fx = fixture(connector).await;
        fx.receiver.receive(&event("m-1", "C9")).await.unwrap();
        let conv = fx.storage.get_conversation("cust-1", "C9", None).await.unwrap().unwrap();
        assert_eq!(conv.name, "Chat C9");
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let fx = fixture(connector()).await;
        let mut bad = event("m-1", "C1");
        bad.customer_id = None;
        assert!(matches!(
            fx.receiver.receive(&bad).await.unwrap_err(),
            UniboxError::Validation(_)
        ));
    }
}
