// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `unibox doctor` command implementation.
//!
//! Runs diagnostic checks against the local environment: database
//! connectivity and broker credential presence.

use std::time::{Duration, Instant};

use unibox_config::UniboxConfig;
use unibox_config::model::BrokerConfig;
use unibox_core::UniboxError;

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed successfully.
    Pass,
    /// Check passed with a warning.
    Warn,
    /// Check failed.
    Fail,
}

/// Result of a single diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Name of the check.
    pub name: String,
    /// Check status.
    pub status: CheckStatus,
    /// Human-readable message.
    pub message: String,
    /// Duration the check took.
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration: start.elapsed(),
        }
    }
}

/// Run the `unibox doctor` command.
pub async fn run_doctor(config: &UniboxConfig) -> Result<(), UniboxError> {
    let results = vec![
        check_database(&config.storage.database_path).await,
        check_broker_credentials(&config.broker),
    ];

    println!();
    println!("  unibox doctor");
    println!();

    let mut fail_count = 0;
    let mut warn_count = 0;

    for result in &results {
        let duration_ms = result.duration.as_millis();
        let tag = match result.status {
            CheckStatus::Pass => "[OK]  ",
            CheckStatus::Warn => {
                warn_count += 1;
                "[WARN]"
            }
            CheckStatus::Fail => {
                fail_count += 1;
                "[FAIL]"
            }
        };
        println!(
            "    {tag} {:<20} {} ({duration_ms}ms)",
            result.name, result.message
        );
    }

    println!();

    if fail_count > 0 || warn_count > 0 {
        let issues = fail_count + warn_count;
        let issue_word = if issues == 1 { "issue" } else { "issues" };
        println!("  {issues} {issue_word} found.");
    } else {
        println!("  All checks passed.");
    }

    println!();

    if fail_count > 0 {
        return Err(UniboxError::Internal(format!(
            "{fail_count} diagnostic check(s) failed"
        )));
    }
    Ok(())
}

/// Check database file exists and can be queried.
async fn check_database(db_path: &str) -> CheckResult {
    let start = Instant::now();
    let name = "Database";

    if !std::path::Path::new(db_path).exists() {
        return CheckResult::new(
            name,
            CheckStatus::Warn,
            format!("not found: {db_path} (will be created on first run)"),
            start,
        );
    }

    let conn = match tokio_rusqlite::Connection::open(db_path).await {
        Ok(conn) => conn,
        Err(e) => return CheckResult::new(name, CheckStatus::Fail, format!("open failed: {e}"), start),
    };

    let tables = conn
        .call(|conn| -> Result<i64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'messages'",
                [],
                |row| row.get(0),
            )
        })
        .await;

    match tables {
        Ok(1) => CheckResult::new(name, CheckStatus::Pass, "connected", start),
        Ok(_) => CheckResult::new(
            name,
            CheckStatus::Warn,
            "connected, schema not yet migrated",
            start,
        ),
        Err(e) => CheckResult::new(name, CheckStatus::Fail, format!("query failed: {e}"), start),
    }
}

/// Check the broker signing credentials are configured.
fn check_broker_credentials(broker: &BrokerConfig) -> CheckResult {
    let start = Instant::now();
    let name = "Broker credentials";

    if broker.has_credentials() {
        return CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("configured for {}", broker.base_url),
            start,
        );
    }

    let missing = match (&broker.workspace_key, &broker.workspace_secret) {
        (None, None) => "workspace_key and workspace_secret not set",
        (None, _) => "workspace_key not set",
        _ => "workspace_secret not set",
    };
    CheckResult::new(name, CheckStatus::Fail, missing, start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_database_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let result = check_database(path.to_str().unwrap()).await;
        assert_eq!(result.status, CheckStatus::Warn);
        assert!(result.message.contains("will be created"));
    }

    #[tokio::test]
    async fn migrated_database_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unibox.db");
        let storage = unibox_storage::SqliteStorage::new(unibox_config::model::StorageConfig {
            database_path: path.to_string_lossy().to_string(),
            wal_mode: true,
        });
        use unibox_core::StorageAdapter;
        storage.initialize().await.unwrap();
        storage.close().await.unwrap();

        let result = check_database(path.to_str().unwrap()).await;
        assert_eq!(result.status, CheckStatus::Pass, "{}", result.message);
    }

    #[test]
    fn broker_credentials_reported() {
        let mut broker = BrokerConfig::default();
        let result = check_broker_credentials(&broker);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("workspace_key and workspace_secret"));

        broker.workspace_key = Some("ws".to_string());
        let result = check_broker_credentials(&broker);
        assert_eq!(result.message, "workspace_secret not set");

        broker.workspace_secret = Some("secret".to_string());
        assert_eq!(check_broker_credentials(&broker).status, CheckStatus::Pass);
    }
}
