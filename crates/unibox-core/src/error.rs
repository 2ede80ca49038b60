// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Unibox message aggregator.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across all Unibox adapter traits and core operations.
#[derive(Debug, Error)]
pub enum UniboxError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Caller identity is missing, or broker credentials could not be exchanged.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Malformed or out-of-range request input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation conflicts with current state (e.g. a sync is already active).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced message, conversation, or sync does not exist for this customer.
    #[error("not found: {0}")]
    NotFound(String),

    /// Inbound message targets an unknown conversation and auto-import is off.
    #[error("import disabled for platform {platform_id}")]
    ImportDisabled { platform_id: String },

    /// The external broker throttled the request.
    #[error("rate limited by upstream broker")]
    RateLimited { retry_after: Option<Duration> },

    /// The external broker failed for a reason other than throttling.
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl UniboxError {
    /// Shorthand for an [`UniboxError::Upstream`] without a source error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true when the error is transient broker throttling.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns the upstream-suggested wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_classified() {
        let err = UniboxError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));

        let other = UniboxError::upstream("boom");
        assert!(!other.is_rate_limited());
        assert_eq!(other.retry_after(), None);
    }

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            UniboxError::ImportDisabled {
                platform_id: "conn-1".into()
            }
            .to_string(),
            "import disabled for platform conn-1"
        );
        assert_eq!(
            UniboxError::Conflict("Sync already in progress".into()).to_string(),
            "conflict: Sync already in progress"
        );
    }
}
