// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Unibox integration tests.
//!
//! Provides a scripted broker connector and test harness infrastructure for
//! fast, deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockConnector`] - Broker connector answering from in-memory fixtures
//! - [`TestHarness`] - Temp SQLite database plus the full pipeline

pub mod harness;
pub mod mock_connector;

use std::sync::Arc;

use unibox_config::model::StorageConfig;
use unibox_core::{RawRecord, StorageAdapter};
use unibox_storage::SqliteStorage;

pub use harness::TestHarness;
pub use mock_connector::{MockCall, MockConnector, MockFailure, SubmitGate};

/// An initialized SQLite store in a temp directory.
///
/// The directory is deleted when the returned guard drops.
pub async fn temp_storage() -> (Arc<dyn StorageAdapter>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let storage = SqliteStorage::new(StorageConfig {
        database_path: dir.path().join("test.db").to_string_lossy().to_string(),
        wal_mode: true,
    });
    storage.initialize().await.expect("initialize temp storage");
    (Arc::new(storage), dir)
}

/// Converts a JSON object literal into a broker record.
pub fn record(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("broker record must be an object, got {other}"),
    }
}
