// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Field extraction from heterogeneous broker records.
//!
//! Each semantic field has an ordered list of key paths. Typed `fields`
//! come first, platform-native `rawFields` second, loosely named convenience
//! keys last. The first non-empty value wins.

use serde_json::Value;
use sha2::{Digest, Sha256};
use unibox_core::RawRecord;

use crate::timestamp::normalize_timestamp_value;

/// A path of object keys into a raw record.
pub type KeyPath = &'static [&'static str];

pub const CONVERSATION_ID: &[KeyPath] = &[&["id"], &["fields", "id"]];
pub const CONVERSATION_NAME: &[KeyPath] = &[
    &["fields", "name"],
    &["rawFields", "name"],
    &["name"],
    &["title"],
    &["subject"],
];
pub const PARTICIPANTS: &[KeyPath] = &[
    &["participants"],
    &["members"],
    &["fields", "participants"],
    &["fields", "members"],
];
pub const LAST_MESSAGE: &[KeyPath] = &[
    &["last_message"],
    &["recent_message"],
    &["fields", "last_message"],
];
pub const LAST_MESSAGE_TIME: &[KeyPath] = &[
    &["last_message_time"],
    &["updated_at"],
    &["fields", "updated"],
    &["rawFields", "ts"],
];

pub const MESSAGE_ID: &[KeyPath] = &[&["id"], &["fields", "id"]];
pub const MESSAGE_CONTENT: &[KeyPath] = &[
    &["fields", "text"],
    &["rawFields", "text"],
    &["content"],
    &["message"],
    &["text"],
];
pub const MESSAGE_SENDER: &[KeyPath] = &[
    &["fields", "ownerId"],
    &["rawFields", "user"],
    &["sender"],
    &["from"],
    &["author"],
];
pub const MESSAGE_OWNER_NAME: &[KeyPath] = &[
    &["fields", "ownerName"],
    &["rawFields", "user_name"],
    &["ownerName"],
];
pub const MESSAGE_TIMESTAMP: &[KeyPath] = &[
    &["rawFields", "ts"],
    &["fields", "timestamp"],
    &["timestamp"],
    &["created_at"],
];

pub const USER_ID: &[KeyPath] = &[&["userId"], &["id"], &["user_id"], &["externalUserId"]];
pub const USER_NAME: &[KeyPath] = &[
    &["name"],
    &["username"],
    &["displayName"],
    &["display_name"],
    &["realName"],
    &["real_name"],
];
pub const USER_EMAIL: &[KeyPath] = &[&["email"], &["mail"]];
pub const USER_PLATFORM: &[KeyPath] = &[&["platform"]];

pub const UNNAMED_CHAT: &str = "Unnamed Chat";
pub const UNKNOWN_SENDER: &str = "Unknown";

fn lookup<'a>(record: &'a RawRecord, path: KeyPath) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = record.get(*first)?;
    for key in rest {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty string (or number rendered as string) along `paths`.
pub fn first_string(record: &RawRecord, paths: &[KeyPath]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(record, path).and_then(as_text))
}

/// First non-empty string array along `paths`.
pub fn first_string_list(record: &RawRecord, paths: &[KeyPath]) -> Option<Vec<String>> {
    paths.iter().find_map(|path| {
        let items: Vec<String> = lookup(record, path)?
            .as_array()?
            .iter()
            .filter_map(as_text)
            .collect();
        (!items.is_empty()).then_some(items)
    })
}

/// First value along `paths` that parses as a timestamp.
pub fn first_timestamp(record: &RawRecord, paths: &[KeyPath]) -> Option<String> {
    paths
        .iter()
        .find_map(|path| lookup(record, path).and_then(normalize_timestamp_value))
}

/// A conversation record reduced to the fields Unibox stores.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedConversation {
    #[serde(rename = "id")]
    pub external_id: String,
    pub name: String,
    pub participants: Vec<String>,
    pub last_message: Option<String>,
    pub last_message_time: Option<String>,
}

/// Normalizes a conversation record. Records without an id are unusable.
pub fn normalize_conversation(record: &RawRecord) -> Option<NormalizedConversation> {
    let external_id = first_string(record, CONVERSATION_ID)?;
    Some(NormalizedConversation {
        external_id,
        name: first_string(record, CONVERSATION_NAME).unwrap_or_else(|| UNNAMED_CHAT.to_string()),
        participants: first_string_list(record, PARTICIPANTS).unwrap_or_default(),
        last_message: first_string(record, LAST_MESSAGE),
        last_message_time: first_timestamp(record, LAST_MESSAGE_TIME),
    })
}

/// A message record reduced to the fields Unibox stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub external_id: Option<String>,
    pub content: String,
    pub sender: String,
    pub owner_name: Option<String>,
    /// Raw timestamp as reported, kept for id derivation.
    pub raw_timestamp: Option<String>,
    pub timestamp: Option<String>,
}

pub fn normalize_message(record: &RawRecord) -> NormalizedMessage {
    NormalizedMessage {
        external_id: first_string(record, MESSAGE_ID),
        content: first_string(record, MESSAGE_CONTENT).unwrap_or_default(),
        sender: first_string(record, MESSAGE_SENDER).unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        owner_name: first_string(record, MESSAGE_OWNER_NAME),
        raw_timestamp: first_string(record, MESSAGE_TIMESTAMP),
        timestamp: first_timestamp(record, MESSAGE_TIMESTAMP),
    }
}

impl NormalizedMessage {
    /// The platform id, or a stable digest for records that carry none.
    pub fn external_id_or_derived(&self, connection_id: &str, conversation_id: &str) -> String {
        match &self.external_id {
            Some(id) => id.clone(),
            None => derive_external_id(
                connection_id,
                conversation_id,
                &self.sender,
                self.raw_timestamp.as_deref().unwrap_or_default(),
                &self.content,
            ),
        }
    }
}

/// Stable id for a message the platform did not identify.
pub fn derive_external_id(
    connection_id: &str,
    conversation_id: &str,
    sender: &str,
    raw_timestamp: &str,
    content: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [connection_id, conversation_id, sender, raw_timestamp, content] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("derived-{}", hex::encode(hasher.finalize()))
}

/// Local id of an imported or inbound message.
///
/// Derived from the connection and platform id so the same remote message
/// always maps to the same row.
pub fn local_message_id(connection_id: &str, external_id: &str) -> String {
    format!("{connection_id}:{external_id}")
}

/// The customer's identity on a platform, as reported by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedIdentity {
    pub external_user_id: Option<String>,
    pub external_user_name: Option<String>,
    pub external_user_email: Option<String>,
    pub platform_name: Option<String>,
}

pub fn normalize_identity(record: &RawRecord) -> NormalizedIdentity {
    NormalizedIdentity {
        external_user_id: first_string(record, USER_ID),
        external_user_name: first_string(record, USER_NAME),
        external_user_email: first_string(record, USER_EMAIL),
        platform_name: first_string(record, USER_PLATFORM),
    }
}
