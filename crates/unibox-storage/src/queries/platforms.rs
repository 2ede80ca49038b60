// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform identity records and the per-platform `import_new` preference.

use rusqlite::{OptionalExtension, params};
use unibox_core::types::now_iso;
use unibox_core::{PlatformIdentity, UniboxError};

use crate::database::Database;

const COLUMNS: &str = "customer_id, platform_id, platform_name, connection_id, \
     external_user_id, external_user_name, external_user_email, import_new, \
     last_synced, created_at, updated_at";

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlatformIdentity> {
    Ok(PlatformIdentity {
        customer_id: row.get(0)?,
        platform_id: row.get(1)?,
        platform_name: row.get(2)?,
        connection_id: row.get(3)?,
        external_user_id: row.get(4)?,
        external_user_name: row.get(5)?,
        external_user_email: row.get(6)?,
        import_new: row.get(7)?,
        last_synced: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Insert or refresh an identity; a stored `import_new` is never overwritten.
pub async fn upsert_platform_identity(
    db: &Database,
    identity: &PlatformIdentity,
) -> Result<(), UniboxError> {
    let identity = identity.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO platform_identities (customer_id, platform_id, platform_name,
                     connection_id, external_user_id, external_user_name, external_user_email,
                     import_new, last_synced, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(customer_id, platform_id) DO UPDATE SET
                     platform_name = excluded.platform_name,
                     connection_id = excluded.connection_id,
                     external_user_id = excluded.external_user_id,
                     external_user_name = excluded.external_user_name,
                     external_user_email = excluded.external_user_email,
                     last_synced = excluded.last_synced,
                     updated_at = excluded.updated_at",
                params![
                    identity.customer_id,
                    identity.platform_id,
                    identity.platform_name,
                    identity.connection_id,
                    identity.external_user_id,
                    identity.external_user_name,
                    identity.external_user_email,
                    identity.import_new,
                    identity.last_synced,
                    identity.created_at,
                    identity.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_platform_identity(
    db: &Database,
    customer_id: &str,
    platform_id: &str,
) -> Result<Option<PlatformIdentity>, UniboxError> {
    let customer_id = customer_id.to_string();
    let platform_id = platform_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM platform_identities
                 WHERE customer_id = ?1 AND platform_id = ?2"
            );
            conn.query_row(&sql, params![customer_id, platform_id], from_row)
                .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List identities, most recently synced first.
pub async fn list_platform_identities(
    db: &Database,
    customer_id: &str,
) -> Result<Vec<PlatformIdentity>, UniboxError> {
    let customer_id = customer_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM platform_identities WHERE customer_id = ?1
                 ORDER BY last_synced DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![customer_id], from_row)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Set only the `import_new` flag.
///
/// When no identity exists yet a placeholder row keyed by `platform_id` is
/// created; a later identity refresh fills in the remaining fields.
pub async fn set_import_new(
    db: &Database,
    customer_id: &str,
    platform_id: &str,
    import_new: bool,
) -> Result<(), UniboxError> {
    let customer_id = customer_id.to_string();
    let platform_id = platform_id.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO platform_identities (customer_id, platform_id, platform_name,
                     connection_id, import_new, last_synced, created_at, updated_at)
                 VALUES (?1, ?2, ?2, ?2, ?3, ?4, ?4, ?4)
                 ON CONFLICT(customer_id, platform_id) DO UPDATE SET
                     import_new = excluded.import_new,
                     updated_at = excluded.updated_at",
                params![customer_id, platform_id, import_new, now],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
