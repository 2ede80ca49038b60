// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire types for the integration broker REST API.

use serde::{Deserialize, Serialize};
use unibox_core::{ChatType, Connection, OutgoingPayload, RawRecord};

/// Envelope of every broker list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationRef {
    #[serde(default)]
    pub key: Option<String>,
}

/// A connection as listed by `GET /connections`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireConnection {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub integration: Option<IntegrationRef>,
}

impl From<WireConnection> for Connection {
    fn from(wire: WireConnection) -> Self {
        Connection {
            id: wire.id,
            name: wire.name.filter(|n| !n.is_empty()),
            platform: wire.integration.and_then(|i| i.key),
        }
    }
}

/// Response of `POST /connections/{id}/actions/{action}/run`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub output: serde_json::Value,
}

/// Output of the listing actions (`get-chats`, `get-messages`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordsOutput {
    #[serde(default)]
    pub records: Vec<RawRecord>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Output of the `create-messages` action.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutput {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub flow_run_id: Option<String>,
    #[serde(default)]
    pub operation_handle: Option<String>,
}

impl SendOutput {
    pub fn external_message_id(&self) -> Option<String> {
        non_empty(self.message_id.as_deref()).or_else(|| non_empty(self.id.as_deref()))
    }

    pub fn handle(&self) -> Option<String> {
        non_empty(self.flow_run_id.as_deref())
            .or_else(|| non_empty(self.operation_handle.as_deref()))
    }

    /// Inline completion counts as successful unless the broker says otherwise.
    pub fn succeeded(&self) -> bool {
        matches!(
            self.status_lowercase().as_deref(),
            None | Some("completed" | "success" | "sent")
        )
    }

    /// Whether the broker reported a final result rather than a running flow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status_lowercase().as_deref(),
            Some("completed" | "success" | "sent" | "failed" | "error")
        )
    }

    fn status_lowercase(&self) -> Option<String> {
        non_empty(self.status.as_deref()).map(|s| s.to_ascii_lowercase())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(String::from)
}

/// Input of the `get-messages` action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesInput<'a> {
    pub channel_id: &'a str,
    pub cursor: &'a str,
}

/// Input of the `get-chats` action.
#[derive(Debug, Clone, Serialize)]
pub struct CursorInput<'a> {
    pub cursor: &'a str,
}

/// Record body of an outgoing message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageData<'a> {
    pub content: &'a str,
    pub sender: &'a str,
    pub recipient: &'a str,
    pub chat_id: &'a str,
    pub chat_name: &'a str,
    pub chat_type: &'a ChatType,
    pub platform_id: &'a str,
    pub platform_name: &'a str,
    pub message_type: &'static str,
    pub status: &'static str,
    pub sent_time: &'a str,
}

/// Input of the `create-messages` action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageInput<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: CreateMessageData<'a>,
    pub customer_id: &'a str,
    pub internal_message_id: &'a str,
    pub correlation_id: &'a str,
    pub external_message_id: &'static str,
}

impl<'a> CreateMessageInput<'a> {
    pub fn new(connection_id: &'a str, payload: &'a OutgoingPayload) -> Self {
        Self {
            kind: "created",
            data: CreateMessageData {
                content: &payload.content,
                sender: &payload.customer_id,
                recipient: &payload.recipient,
                chat_id: &payload.chat_id,
                chat_name: &payload.chat_name,
                chat_type: &payload.chat_type,
                platform_id: connection_id,
                platform_name: &payload.platform_name,
                message_type: "text",
                status: "pending",
                sent_time: &payload.sent_time,
            },
            customer_id: &payload.customer_id,
            internal_message_id: &payload.internal_message_id,
            correlation_id: &payload.correlation_id,
            external_message_id: "",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataLinkTable {
    #[serde(default)]
    pub key: Option<String>,
}

/// A data link table instance; the `users` table maps platform user ids to names.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLinkTableInstance {
    pub id: String,
    #[serde(default)]
    pub data_link_table: Option<DataLinkTable>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

impl DataLinkTableInstance {
    pub fn is_users_table_for(&self, connection_id: &str) -> bool {
        self.data_link_table
            .as_ref()
            .and_then(|t| t.key.as_deref())
            == Some("users")
            && self.connection_id.as_deref() == Some(connection_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLinkTableLink {
    #[serde(default)]
    pub external_record_id: Option<String>,
    #[serde(default)]
    pub app_record_id: Option<String>,
}

/// Error body returned by the broker on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_output_prefers_message_id_and_flow_run() {
        let out: SendOutput = serde_json::from_value(serde_json::json!({
            "messageId": "ext-1",
            "id": "ext-2",
            "flowRunId": "run-1",
            "operationHandle": "op-1"
        }))
        .unwrap();
        assert_eq!(out.external_message_id().as_deref(), Some("ext-1"));
        assert_eq!(out.handle().as_deref(), Some("run-1"));
        assert!(out.succeeded());
    }

    #[test]
    fn send_output_failure_status() {
        let out: SendOutput =
            serde_json::from_value(serde_json::json!({"id": "", "status": "failed"})).unwrap();
        assert!(out.external_message_id().is_none());
        assert!(!out.succeeded());
        assert!(out.is_terminal());
    }

    #[test]
    fn running_flow_is_not_terminal() {
        for status in [None, Some("running"), Some("queued")] {
            let out = SendOutput {
                status: status.map(String::from),
                flow_run_id: Some("run-1".into()),
                ..SendOutput::default()
            };
            assert!(!out.is_terminal(), "{status:?}");
        }
        let done = SendOutput {
            status: Some("Success".into()),
            ..SendOutput::default()
        };
        assert!(done.is_terminal());
        assert!(done.succeeded());
    }

    #[test]
    fn create_message_input_shape() {
        let payload = OutgoingPayload {
            customer_id: "cust-1".into(),
            internal_message_id: "msg-1".into(),
            correlation_id: "corr-1".into(),
            content: "hi".into(),
            chat_id: "C1".into(),
            recipient: "C1".into(),
            chat_name: "Chat".into(),
            chat_type: ChatType::Group,
            platform_name: "Slack".into(),
            sent_time: "2026-01-01T00:00:00.000Z".into(),
        };
        let value = serde_json::to_value(CreateMessageInput::new("conn-1", &payload)).unwrap();
        assert_eq!(value["type"], "created");
        assert_eq!(value["data"]["platformId"], "conn-1");
        assert_eq!(value["data"]["chatType"], "group");
        assert_eq!(value["internalMessageId"], "msg-1");
        assert_eq!(value["externalMessageId"], "");
    }

    #[test]
    fn users_table_matches_connection() {
        let inst: DataLinkTableInstance = serde_json::from_value(serde_json::json!({
            "id": "dlt-1",
            "dataLinkTable": {"key": "users"},
            "connectionId": "conn-1"
        }))
        .unwrap();
        assert!(inst.is_users_table_for("conn-1"));
        assert!(!inst.is_users_table_for("conn-2"));
    }
}
