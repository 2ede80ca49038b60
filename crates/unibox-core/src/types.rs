// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the connector, storage, sync pipeline, and gateway.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// An opaque record returned by the broker. Field names vary by platform.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Current UTC time in the canonical storage format (millisecond precision).
pub fn now_iso() -> String {
    format_iso(chrono::Utc::now())
}

/// Formats a UTC instant in the canonical storage format.
pub fn format_iso(at: chrono::DateTime<chrono::Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Connector,
    Storage,
    Observability,
}

/// The local account on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub name: Option<String>,
}

impl Customer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Human-readable name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// An authorized link between the customer and one external platform account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Platform key reported by the broker (e.g. `slack`).
    #[serde(default)]
    pub platform: Option<String>,
}

impl Connection {
    /// Label stored on conversations and messages.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Key used to select platform-specific behavior such as mention patterns.
    pub fn platform_key(&self) -> &str {
        self.platform.as_deref().unwrap_or_else(|| self.label())
    }
}

/// One page of a cursor-paginated broker listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` when the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// Origin of a stored message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum MessageType {
    /// Sent from this application outward.
    #[strum(serialize = "user")]
    #[serde(rename = "user")]
    User,
    /// Received from the external platform.
    #[strum(serialize = "third-party")]
    #[serde(rename = "third-party")]
    ThirdParty,
}

/// Delivery lifecycle of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// State of a synchronization run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncState {
    /// Pending and running syncs occupy the customer's single active slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Monotonic transition check. Same-state updates are allowed.
    pub fn can_transition_to(self, next: SyncState) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed => false,
        }
    }
}

/// Local projection of a remote conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub customer_id: String,
    /// Remote id, unique within a connection.
    pub external_id: String,
    pub connection_id: String,
    pub name: String,
    pub participants: Vec<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<String>,
    pub platform_name: Option<String>,
    pub import_new: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A normalized chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub customer_id: String,
    pub content: String,
    pub sender: String,
    pub owner_name: Option<String>,
    pub timestamp: String,
    pub conversation_id: Option<String>,
    pub connection_id: String,
    pub platform_name: Option<String>,
    pub message_type: MessageType,
    pub status: DeliveryStatus,
    pub external_message_id: Option<String>,
    pub error: Option<String>,
    /// Broker-assigned handle of an in-flight asynchronous send.
    pub operation_handle: Option<String>,
    /// Locally generated id sent with each delivery attempt.
    pub correlation_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Terminal delivery result applied to a pending outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { external_message_id: Option<String> },
    Failed { error: String },
}

impl DeliveryOutcome {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            Self::Sent { .. } => DeliveryStatus::Sent,
            Self::Failed { .. } => DeliveryStatus::Failed,
        }
    }
}

/// Per-customer record of a synchronization attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub sync_id: String,
    pub customer_id: String,
    pub status: SyncState,
    pub is_syncing: bool,
    pub start_time: String,
    pub last_sync_time: Option<String>,
    pub total_messages: Option<i64>,
    pub total_chats: Option<i64>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields written by a sync status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatusUpdate {
    pub status: SyncState,
    pub error: Option<String>,
    pub total_messages: Option<i64>,
    pub total_chats: Option<i64>,
}

impl SyncStatusUpdate {
    pub fn to(status: SyncState) -> Self {
        Self {
            status,
            error: None,
            total_messages: None,
            total_chats: None,
        }
    }
}

/// The customer's identity on one platform connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformIdentity {
    pub customer_id: String,
    pub platform_id: String,
    pub platform_name: String,
    pub connection_id: String,
    pub external_user_id: Option<String>,
    pub external_user_name: Option<String>,
    pub external_user_email: Option<String>,
    /// Whether unseen conversations are created on inbound messages.
    pub import_new: bool,
    pub last_synced: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Conversation target of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Direct,
    Group,
    Channel,
}

/// Payload handed to the broker for an outgoing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingPayload {
    pub customer_id: String,
    pub internal_message_id: String,
    /// Locally generated id echoed back by asynchronous completions.
    pub correlation_id: String,
    pub content: String,
    pub chat_id: String,
    pub recipient: String,
    pub chat_name: String,
    pub chat_type: ChatType,
    pub platform_name: String,
    pub sent_time: String,
}

/// Result of submitting an outgoing message to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The broker finished the send inline.
    Completed {
        success: bool,
        external_message_id: Option<String>,
    },
    /// The broker started an asynchronous operation; a callback will follow.
    Accepted { operation_handle: String },
}
