// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the full pipeline over a temp SQLite database and
//! a [`MockConnector`], with all pacing delays removed.

use std::sync::Arc;

use unibox_config::UniboxConfig;
use unibox_config::model::StorageConfig;
use unibox_core::{Customer, StorageAdapter, UniboxError};
use unibox_storage::SqliteStorage;
use unibox_sync::{Pacing, Pipeline, SyncReport};

use crate::mock_connector::MockConnector;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    connector: MockConnector,
    config: UniboxConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            connector: MockConnector::new(),
            config: UniboxConfig::default(),
        }
    }

    /// Use a scripted connector instead of an empty one.
    pub fn with_connector(mut self, connector: MockConnector) -> Self {
        self.connector = connector;
        self
    }

    /// Start from a custom configuration. The database path is always replaced.
    pub fn with_config(mut self, config: UniboxConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> Result<TestHarness, UniboxError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| UniboxError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");

        let mut config = self.config;
        config.storage = StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        };

        let storage = SqliteStorage::new(config.storage.clone());
        storage.initialize().await?;
        let storage: Arc<dyn StorageAdapter> = Arc::new(storage);

        let connector = Arc::new(self.connector);
        let pacing = Pacing {
            max_pages: config.sync.max_pages,
            ..Pacing::immediate()
        };
        let pipeline = Arc::new(Pipeline::with_pacing(
            connector.clone(),
            Arc::clone(&storage),
            &config,
            pacing,
        ));

        Ok(TestHarness {
            connector,
            storage,
            pipeline,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with a mock broker and temp storage.
pub struct TestHarness {
    /// The scripted broker.
    pub connector: Arc<MockConnector>,
    /// SQLite storage adapter (temp DB, cleaned up on drop).
    pub storage: Arc<dyn StorageAdapter>,
    pub pipeline: Arc<Pipeline>,
    pub config: UniboxConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Begins a sync for `customer_id` and runs it to completion.
    pub async fn sync(&self, customer_id: &str) -> Result<SyncReport, UniboxError> {
        let sync = self.pipeline.tracker().begin(customer_id).await?;
        self.pipeline
            .orchestrator()
            .run(&Customer::new(customer_id), &sync.sync_id)
            .await
    }
}
