// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Unibox message aggregator.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Top-level Unibox configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UniboxConfig {
    /// HTTP listener and webhook settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Integration broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Sync pacing and staleness settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Outgoing message settings.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

impl UniboxConfig {
    /// Copy of this configuration with every secret replaced by a marker.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.server.webhook_token = copy.server.webhook_token.as_ref().map(|_| REDACTED.into());
        copy.broker.workspace_secret = copy
            .broker
            .workspace_secret
            .as_ref()
            .map(|_| REDACTED.into());
        copy
    }
}

const REDACTED: &str = "[REDACTED]";

/// HTTP server configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP listener.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Shared token expected on inbound webhooks. `None` accepts any non-empty token.
    #[serde(default)]
    pub webhook_token: Option<String>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("webhook_token", &self.webhook_token.as_ref().map(|_| REDACTED))
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            webhook_token: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("unibox").join("unibox.db"))
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or_else(|| "unibox.db".to_string())
}

fn default_wal_mode() -> bool {
    true
}

/// Integration broker configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Base URL of the broker REST API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Workspace key, used as the token issuer.
    #[serde(default)]
    pub workspace_key: Option<String>,

    /// Workspace secret used to sign customer tokens.
    #[serde(default)]
    pub workspace_secret: Option<String>,

    /// Lifetime of a minted customer token, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// Per-request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl BrokerConfig {
    /// True when both signing credentials are present.
    pub fn has_credentials(&self) -> bool {
        self.workspace_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.workspace_secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("base_url", &self.base_url)
            .field("workspace_key", &self.workspace_key)
            .field(
                "workspace_secret",
                &self.workspace_secret.as_ref().map(|_| REDACTED),
            )
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            workspace_key: None,
            workspace_secret: None,
            token_ttl_secs: default_token_ttl_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.integration.app".to_string()
}

fn default_token_ttl_secs() -> u64 {
    7200
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Sync pacing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Pause between consecutive connections, in milliseconds.
    #[serde(default = "default_connection_delay_ms")]
    pub connection_delay_ms: u64,

    /// Pause between consecutive broker calls within a connection, in milliseconds.
    #[serde(default = "default_call_delay_ms")]
    pub call_delay_ms: u64,

    /// Wait before the single retry of a rate-limited call, in milliseconds.
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,

    /// Age after which an active sync is presumed abandoned, in seconds.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Upper bound on pages fetched per listing.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connection_delay_ms: default_connection_delay_ms(),
            call_delay_ms: default_call_delay_ms(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            stale_after_secs: default_stale_after_secs(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_connection_delay_ms() -> u64 {
    2000
}

fn default_call_delay_ms() -> u64 {
    2000
}

fn default_rate_limit_backoff_ms() -> u64 {
    5000
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_max_pages() -> u32 {
    50
}

/// Outgoing message configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    /// Maximum message length in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
        }
    }
}

fn default_max_message_length() -> usize {
    4000
}
