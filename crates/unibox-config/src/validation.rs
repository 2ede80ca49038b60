// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as valid bind addresses, non-empty paths, and positive limits.

use crate::diagnostic::ConfigError;
use crate::model::UniboxConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &UniboxConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut invalid = |message: String| errors.push(ConfigError::Validation { message });

    let host = config.server.host.trim();
    if host.is_empty() {
        invalid("server.host must not be empty".to_string());
    } else {
        let is_valid_ip = host.parse::<std::net::IpAddr>().is_ok();
        let is_valid_hostname = host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-' || c == ':');
        if !is_valid_ip && !is_valid_hostname {
            invalid(format!(
                "server.host `{host}` is not a valid IP address or hostname"
            ));
        }
    }

    if config.storage.database_path.trim().is_empty() {
        invalid("storage.database_path must not be empty".to_string());
    }

    let base_url = config.broker.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        invalid(format!(
            "broker.base_url `{base_url}` must start with http:// or https://"
        ));
    }

    let has_key = config.broker.workspace_key.is_some();
    let has_secret = config.broker.workspace_secret.is_some();
    if has_key != has_secret {
        invalid(
            "broker.workspace_key and broker.workspace_secret must be set together".to_string(),
        );
    }

    if config.broker.token_ttl_secs == 0 {
        invalid("broker.token_ttl_secs must be at least 1".to_string());
    }

    if config.broker.request_timeout_secs == 0 {
        invalid("broker.request_timeout_secs must be at least 1".to_string());
    }

    if config.sync.stale_after_secs == 0 {
        invalid("sync.stale_after_secs must be at least 1".to_string());
    }

    if config.sync.max_pages == 0 {
        invalid("sync.max_pages must be at least 1".to_string());
    }

    if config.delivery.max_message_length == 0 {
        invalid("delivery.max_message_length must be at least 1".to_string());
    }

    if let Some(token) = &config.server.webhook_token
        && token.trim().is_empty()
    {
        invalid("server.webhook_token must not be empty when set".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_message(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        let config = UniboxConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = UniboxConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "database_path"));
    }

    #[test]
    fn zero_limits_fail_validation() {
        let mut config = UniboxConfig::default();
        config.sync.max_pages = 0;
        config.sync.stale_after_secs = 0;
        config.delivery.max_message_length = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(has_message(&errors, "max_pages"));
        assert!(has_message(&errors, "stale_after_secs"));
        assert!(has_message(&errors, "max_message_length"));
    }

    #[test]
    fn half_configured_credentials_fail_validation() {
        let mut config = UniboxConfig::default();
        config.broker.workspace_key = Some("key".into());
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "must be set together"));

        config.broker.workspace_secret = Some("secret".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn bad_host_and_url_fail_validation() {
        let mut config = UniboxConfig::default();
        config.server.host = "not a host!".into();
        config.broker.base_url = "ftp://broker".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "server.host"));
        assert!(has_message(&errors, "broker.base_url"));
    }

    #[test]
    fn valid_custom_config_passes() {
        let mut config = UniboxConfig::default();
        config.server.host = "0.0.0.0".to_string();
        config.server.webhook_token = Some("hook".into());
        config.storage.database_path = "/tmp/test.db".to_string();
        config.broker.base_url = "http://localhost:9000".into();
        assert!(validate_config(&config).is_ok());
    }
}
