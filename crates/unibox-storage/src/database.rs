// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use tracing::debug;
use unibox_core::UniboxError;

use crate::migrations::run_migrations;

/// Convert a tokio-rusqlite error into UniboxError::Storage.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> UniboxError {
    UniboxError::Storage {
        source: Box::new(e),
    }
}

fn map_sqlite_err(e: rusqlite::Error) -> UniboxError {
    UniboxError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the single SQLite writer.
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (or create) the database at `path` in WAL mode and apply migrations.
    pub async fn open(path: &str) -> Result<Self, UniboxError> {
        Self::open_with(path, true).await
    }

    /// Open the database, choosing the journal mode explicitly.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, UniboxError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| UniboxError::Storage {
                source: Box::new(e),
            })?;
        }

        // Journal mode and schema are set up once on a short-lived blocking
        // connection before the writer thread starts.
        let setup_path = path.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), UniboxError> {
            let mut conn = rusqlite::Connection::open(&setup_path).map_err(map_sqlite_err)?;
            let journal = if wal_mode { "WAL" } else { "DELETE" };
            conn.pragma_update(None, "journal_mode", journal)
                .map_err(map_sqlite_err)?;
            run_migrations(&mut conn)
        })
        .await
        .map_err(|e| UniboxError::Internal(format!("database setup task failed: {e}")))??;

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| UniboxError::Storage {
                source: Box::new(e),
            })?;

        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(
                "PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path, wal_mode, "database opened");
        Ok(Self { conn })
    }

    /// The shared single-writer connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Checkpoint the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<(), UniboxError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Checkpoint and close the connection.
    pub async fn close(self) -> Result<(), UniboxError> {
        self.checkpoint().await?;
        self.conn.close().await.map_err(|e| UniboxError::Storage {
            source: Box::new(e),
        })
    }
}
