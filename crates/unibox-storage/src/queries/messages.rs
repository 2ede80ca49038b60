// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message CRUD operations and delivery state transitions.

use rusqlite::{OptionalExtension, params};
use unibox_core::types::now_iso;
use unibox_core::{DeliveryOutcome, DeliveryStatus, Message, UniboxError};

use crate::database::Database;
use crate::queries::parse_column;

const COLUMNS: &str = "id, customer_id, content, sender, owner_name, timestamp, \
     conversation_id, connection_id, platform_name, message_type, status, \
     external_message_id, error, operation_handle, created_at, updated_at, correlation_id";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        content: row.get(2)?,
        sender: row.get(3)?,
        owner_name: row.get(4)?,
        timestamp: row.get(5)?,
        conversation_id: row.get(6)?,
        connection_id: row.get(7)?,
        platform_name: row.get(8)?,
        message_type: parse_column(row, 9)?,
        status: parse_column(row, 10)?,
        external_message_id: row.get(11)?,
        error: row.get(12)?,
        operation_handle: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        correlation_id: row.get(16)?,
    })
}

/// Insert a message unless a row with the same (customer, id) exists.
///
/// Returns `true` if the row was written.
pub async fn insert_message(db: &Database, msg: &Message) -> Result<bool, UniboxError> {
    let msg = msg.clone();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO messages (id, customer_id, content, sender, owner_name,
                     timestamp, conversation_id, connection_id, platform_name, message_type,
                     status, external_message_id, error, operation_handle, created_at, updated_at,
                     correlation_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    msg.id,
                    msg.customer_id,
                    msg.content,
                    msg.sender,
                    msg.owner_name,
                    msg.timestamp,
                    msg.conversation_id,
                    msg.connection_id,
                    msg.platform_name,
                    msg.message_type.to_string(),
                    msg.status.to_string(),
                    msg.external_message_id,
                    msg.error,
                    msg.operation_handle,
                    msg.created_at,
                    msg.updated_at,
                    msg.correlation_id,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a message by local id.
pub async fn get_message(
    db: &Database,
    customer_id: &str,
    id: &str,
) -> Result<Option<Message>, UniboxError> {
    let customer_id = customer_id.to_string();
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!("SELECT {COLUMNS} FROM messages WHERE customer_id = ?1 AND id = ?2");
            conn.query_row(&sql, params![customer_id, id], from_row)
                .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find a message by its platform-assigned id.
pub async fn find_message_by_external_id(
    db: &Database,
    customer_id: &str,
    external_message_id: &str,
    connection_id: Option<&str>,
) -> Result<Option<Message>, UniboxError> {
    let customer_id = customer_id.to_string();
    let external_message_id = external_message_id.to_string();
    let connection_id = connection_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM messages
                 WHERE customer_id = ?1 AND external_message_id = ?2
                   AND (?3 IS NULL OR connection_id = ?3)
                 ORDER BY created_at ASC LIMIT 1"
            );
            conn.query_row(
                &sql,
                params![customer_id, external_message_id, connection_id],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find the message whose operation handle or correlation id is `reference`.
pub async fn get_message_by_delivery_ref(
    db: &Database,
    reference: &str,
) -> Result<Option<Message>, UniboxError> {
    let reference = reference.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM messages
                 WHERE operation_handle = ?1 OR correlation_id = ?1
                 ORDER BY operation_handle = ?1 DESC LIMIT 1"
            );
            conn.query_row(&sql, params![reference], from_row)
                .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List messages in chronological order.
pub async fn list_messages(
    db: &Database,
    customer_id: &str,
    conversation_id: Option<&str>,
    limit: u32,
) -> Result<Vec<Message>, UniboxError> {
    let customer_id = customer_id.to_string();
    let conversation_id = conversation_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM messages
                 WHERE customer_id = ?1 AND (?2 IS NULL OR conversation_id = ?2)
                 ORDER BY timestamp ASC, created_at ASC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![customer_id, conversation_id, limit], from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Put an outbound message back into `pending` under a fresh correlation id.
///
/// Only `user` rows still `pending` or `failed` qualify. A row that exists
/// but has already been sent, or was received, yields
/// [`UniboxError::Conflict`].
pub async fn reset_for_delivery(
    db: &Database,
    customer_id: &str,
    id: &str,
    correlation_id: &str,
) -> Result<(), UniboxError> {
    let customer_id_owned = customer_id.to_string();
    let id_owned = id.to_string();
    let correlation_id = correlation_id.to_string();
    let now = now_iso();
    let (changed, exists) = db
        .connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = 'pending', error = NULL,
                     operation_handle = NULL, correlation_id = ?3, updated_at = ?4
                 WHERE customer_id = ?1 AND id = ?2
                   AND status IN ('pending', 'failed') AND message_type = 'user'",
                params![customer_id_owned, id_owned, correlation_id, now],
            )?;
            let exists = changed > 0
                || conn
                    .query_row(
                        "SELECT 1 FROM messages WHERE customer_id = ?1 AND id = ?2",
                        params![customer_id_owned, id_owned],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
            Ok((changed, exists))
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    match (changed, exists) {
        (0, false) => Err(UniboxError::NotFound(format!("message {id}"))),
        (0, true) => Err(UniboxError::Conflict(format!(
            "message {id} is not awaiting delivery"
        ))),
        _ => Ok(()),
    }
}

/// Attach an operation handle to a pending message.
///
/// Returns `false` when the row has already left `pending`.
pub async fn set_operation_handle(
    db: &Database,
    customer_id: &str,
    id: &str,
    operation_handle: &str,
) -> Result<bool, UniboxError> {
    let customer_id = customer_id.to_string();
    let id = id.to_string();
    let operation_handle = operation_handle.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET operation_handle = ?3, updated_at = ?4
                 WHERE customer_id = ?1 AND id = ?2 AND status = 'pending'",
                params![customer_id, id, operation_handle, now],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Move a pending message to its terminal status.
///
/// The update only matches rows still in `pending` (and carrying
/// `reference` as operation handle or correlation id when one is given), so
/// repeated completions are inert.
pub async fn settle_delivery(
    db: &Database,
    customer_id: &str,
    id: &str,
    reference: Option<&str>,
    outcome: &DeliveryOutcome,
) -> Result<bool, UniboxError> {
    let customer_id = customer_id.to_string();
    let id = id.to_string();
    let reference = reference.map(str::to_string);
    let status = outcome.status().to_string();
    let (external_message_id, error) = match outcome {
        DeliveryOutcome::Sent {
            external_message_id,
        } => (external_message_id.clone(), None),
        DeliveryOutcome::Failed { error } => (None, Some(error.clone())),
    };
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET status = ?4,
                     external_message_id = COALESCE(?5, external_message_id),
                     error = ?6, updated_at = ?7
                 WHERE customer_id = ?1 AND id = ?2 AND status = 'pending'
                   AND (?3 IS NULL OR operation_handle = ?3 OR correlation_id = ?3)",
                params![
                    customer_id,
                    id,
                    reference,
                    status,
                    external_message_id,
                    error,
                    now,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Count all messages stored for a customer.
pub async fn count_messages(db: &Database, customer_id: &str) -> Result<i64, UniboxError> {
    let customer_id = customer_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE customer_id = ?1",
                params![customer_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Count messages of one status, used by diagnostics.
pub async fn count_by_status(
    db: &Database,
    customer_id: &str,
    status: DeliveryStatus,
) -> Result<i64, UniboxError> {
    let customer_id = customer_id.to_string();
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE customer_id = ?1 AND status = ?2",
                params![customer_id, status],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}
