// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sync status records.
//!
//! The partial unique index `idx_sync_status_active` enforces at most one
//! pending or running sync per customer.

use rusqlite::{OptionalExtension, params};
use unibox_core::types::now_iso;
use unibox_core::{SyncStatus, SyncStatusUpdate, UniboxError};

use crate::database::Database;
use crate::queries::{is_constraint_violation, parse_column};

const COLUMNS: &str = "sync_id, customer_id, status, start_time, last_sync_time, \
     total_messages, total_chats, error, created_at, updated_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncStatus> {
    let status: unibox_core::SyncState = parse_column(row, 2)?;
    Ok(SyncStatus {
        sync_id: row.get(0)?,
        customer_id: row.get(1)?,
        status,
        is_syncing: status.is_active(),
        start_time: row.get(3)?,
        last_sync_time: row.get(4)?,
        total_messages: row.get(5)?,
        total_chats: row.get(6)?,
        error: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Insert a new sync record, rejecting a second active sync.
pub async fn create_sync_status(db: &Database, status: &SyncStatus) -> Result<(), UniboxError> {
    let record = status.clone();
    let inserted = db
        .connection()
        .call(move |conn| {
            let result = conn.execute(
                "INSERT INTO sync_status (sync_id, customer_id, status, start_time,
                     last_sync_time, total_messages, total_chats, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.sync_id,
                    record.customer_id,
                    record.status.to_string(),
                    record.start_time,
                    record.last_sync_time,
                    record.total_messages,
                    record.total_chats,
                    record.error,
                    record.created_at,
                    record.updated_at,
                ],
            );
            match result {
                Ok(_) => Ok(true),
                Err(e) if is_constraint_violation(&e) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    if !inserted {
        return Err(UniboxError::Conflict("Sync already in progress".to_string()));
    }
    Ok(())
}

/// The customer's pending or running sync, if any.
pub async fn get_active_sync(
    db: &Database,
    customer_id: &str,
) -> Result<Option<SyncStatus>, UniboxError> {
    let customer_id = customer_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM sync_status
                 WHERE customer_id = ?1 AND status IN ('pending', 'running')"
            );
            conn.query_row(&sql, params![customer_id], from_row)
                .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// The customer's most recently created sync record.
pub async fn get_latest_sync_status(
    db: &Database,
    customer_id: &str,
) -> Result<Option<SyncStatus>, UniboxError> {
    let customer_id = customer_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM sync_status WHERE customer_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            );
            conn.query_row(&sql, params![customer_id], from_row)
                .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch one sync record.
pub async fn get_sync_status(
    db: &Database,
    customer_id: &str,
    sync_id: &str,
) -> Result<Option<SyncStatus>, UniboxError> {
    let customer_id = customer_id.to_string();
    let sync_id = sync_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM sync_status WHERE customer_id = ?1 AND sync_id = ?2"
            );
            conn.query_row(&sql, params![customer_id, sync_id], from_row)
                .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Persist a status transition and return the updated row.
///
/// Absent optional fields keep their stored values. Entering a terminal
/// state stamps `last_sync_time`.
pub async fn update_sync_status(
    db: &Database,
    customer_id: &str,
    sync_id: &str,
    update: &SyncStatusUpdate,
) -> Result<Option<SyncStatus>, UniboxError> {
    let customer_id = customer_id.to_string();
    let sync_id = sync_id.to_string();
    let update = update.clone();
    let terminal = update.status.is_terminal();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE sync_status SET status = ?3,
                     error = COALESCE(?4, error),
                     total_messages = COALESCE(?5, total_messages),
                     total_chats = COALESCE(?6, total_chats),
                     last_sync_time = CASE WHEN ?7 THEN ?8 ELSE last_sync_time END,
                     updated_at = ?8
                 WHERE customer_id = ?1 AND sync_id = ?2",
                params![
                    customer_id,
                    sync_id,
                    update.status.to_string(),
                    update.error,
                    update.total_messages,
                    update.total_chats,
                    terminal,
                    now,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let sql = format!(
                "SELECT {COLUMNS} FROM sync_status WHERE customer_id = ?1 AND sync_id = ?2"
            );
            let row = tx.query_row(&sql, params![customer_id, sync_id], from_row)?;
            tx.commit()?;
            Ok(Some(row))
        })
        .await
        .map_err(crate::database::map_tr_err)
}
