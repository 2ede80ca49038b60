// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation CRUD operations.

use std::collections::HashSet;

use rusqlite::types::Type;
use rusqlite::{OptionalExtension, params};
use unibox_core::types::now_iso;
use unibox_core::{Conversation, UniboxError};

use crate::database::Database;

const COLUMNS: &str = "customer_id, connection_id, external_id, name, participants, \
     last_message, last_message_time, platform_name, import_new, created_at, updated_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let participants: String = row.get(4)?;
    let participants = serde_json::from_str(&participants)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(Conversation {
        customer_id: row.get(0)?,
        connection_id: row.get(1)?,
        external_id: row.get(2)?,
        name: row.get(3)?,
        participants,
        last_message: row.get(5)?,
        last_message_time: row.get(6)?,
        platform_name: row.get(7)?,
        import_new: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn encode_participants(participants: &[String]) -> Result<String, UniboxError> {
    serde_json::to_string(participants).map_err(|e| UniboxError::Storage {
        source: Box::new(e),
    })
}

/// Insert a conversation or refresh the stored copy.
pub async fn upsert_conversation(db: &Database, conv: &Conversation) -> Result<(), UniboxError> {
    let conv = conv.clone();
    let participants = encode_participants(&conv.participants)?;
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations (customer_id, connection_id, external_id, name,
                     participants, last_message, last_message_time, platform_name, import_new,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(customer_id, connection_id, external_id) DO UPDATE SET
                     name = excluded.name,
                     participants = excluded.participants,
                     last_message = COALESCE(excluded.last_message, conversations.last_message),
                     last_message_time = COALESCE(excluded.last_message_time,
                                                  conversations.last_message_time),
                     platform_name = COALESCE(excluded.platform_name, conversations.platform_name),
                     updated_at = excluded.updated_at",
                params![
                    conv.customer_id,
                    conv.connection_id,
                    conv.external_id,
                    conv.name,
                    participants,
                    conv.last_message,
                    conv.last_message_time,
                    conv.platform_name,
                    conv.import_new,
                    conv.created_at,
                    conv.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find a conversation by external id, optionally within one connection.
pub async fn get_conversation(
    db: &Database,
    customer_id: &str,
    external_id: &str,
    connection_id: Option<&str>,
) -> Result<Option<Conversation>, UniboxError> {
    let customer_id = customer_id.to_string();
    let external_id = external_id.to_string();
    let connection_id = connection_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM conversations
                 WHERE customer_id = ?1 AND external_id = ?2
                   AND (?3 IS NULL OR connection_id = ?3)
                 ORDER BY updated_at DESC LIMIT 1"
            );
            conn.query_row(&sql, params![customer_id, external_id, connection_id], from_row)
                .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List conversations, most recent activity first.
pub async fn list_conversations(
    db: &Database,
    customer_id: &str,
    limit: u32,
) -> Result<Vec<Conversation>, UniboxError> {
    let customer_id = customer_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM conversations WHERE customer_id = ?1
                 ORDER BY last_message_time DESC, updated_at DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![customer_id, limit], from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// External ids of all stored conversations for one connection.
pub async fn list_conversation_ids(
    db: &Database,
    customer_id: &str,
    connection_id: &str,
) -> Result<HashSet<String>, UniboxError> {
    let customer_id = customer_id.to_string();
    let connection_id = connection_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT external_id FROM conversations
                 WHERE customer_id = ?1 AND connection_id = ?2",
            )?;
            let rows = stmt.query_map(params![customer_id, connection_id], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Refresh the last-message fields and add `participant` if absent.
///
/// A no-op when the conversation does not exist.
pub async fn touch_conversation(
    db: &Database,
    customer_id: &str,
    connection_id: &str,
    external_id: &str,
    last_message: &str,
    last_message_time: &str,
    participant: &str,
) -> Result<(), UniboxError> {
    let customer_id = customer_id.to_string();
    let connection_id = connection_id.to_string();
    let external_id = external_id.to_string();
    let last_message = last_message.to_string();
    let last_message_time = last_message_time.to_string();
    let participant = participant.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let current: Option<String> = tx
                .query_row(
                    "SELECT participants FROM conversations
                     WHERE customer_id = ?1 AND connection_id = ?2 AND external_id = ?3",
                    params![customer_id, connection_id, external_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(());
            };

            let mut participants: Vec<String> = serde_json::from_str(&current).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
            })?;
            if !participant.is_empty() && !participants.contains(&participant) {
                participants.push(participant);
            }
            let encoded = serde_json::to_string(&participants)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

            tx.execute(
                "UPDATE conversations SET last_message = ?4, last_message_time = ?5,
                     participants = ?6, updated_at = ?7
                 WHERE customer_id = ?1 AND connection_id = ?2 AND external_id = ?3",
                params![
                    customer_id,
                    connection_id,
                    external_id,
                    last_message,
                    last_message_time,
                    encoded,
                    now,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
