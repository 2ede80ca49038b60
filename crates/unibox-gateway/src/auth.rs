// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Caller identification for the gateway.
//!
//! Two schemes, chosen per route:
//! 1. Customer routes: `x-auth-id` (required) and `x-user-name` (optional)
//! 2. Broker webhooks: `Authorization: Bearer <token>` or `X-Integration-App-Token`
//!
//! When no webhook token is configured, any non-empty token is accepted.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use unibox_core::Customer;

use crate::error::ApiError;

pub const AUTH_ID_HEADER: &str = "x-auth-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const APP_TOKEN_HEADER: &str = "x-integration-app-token";

/// Webhook authentication configuration.
#[derive(Clone, Default)]
pub struct WebhookAuth {
    /// Expected token. If `None`, any non-empty token is accepted.
    pub token: Option<String>,
}

impl std::fmt::Debug for WebhookAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookAuth")
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl WebhookAuth {
    pub fn accepts(&self, presented: &str) -> bool {
        if presented.is_empty() {
            return false;
        }
        match &self.token {
            Some(expected) => presented == expected,
            None => true,
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// The customer a request acts for.
#[derive(Debug, Clone)]
pub struct Caller(pub Customer);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(id) = header(&parts.headers, AUTH_ID_HEADER) else {
            return Err(ApiError::unauthorized());
        };
        Ok(Self(Customer {
            id: id.to_string(),
            name: header(&parts.headers, USER_NAME_HEADER).map(String::from),
        }))
    }
}

/// Proof that a request carries a valid broker webhook token.
#[derive(Debug, Clone, Copy)]
pub struct Webhook;

impl<S> FromRequestParts<S> for Webhook
where
    WebhookAuth: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = WebhookAuth::from_ref(state);
        let token = header(&parts.headers, "authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .or_else(|| header(&parts.headers, APP_TOKEN_HEADER));

        match token {
            Some(token) if auth.accepts(token.trim()) => Ok(Self),
            _ => {
                tracing::debug!("webhook rejected: missing or invalid token");
                Err(ApiError::unauthorized())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_token_must_match() {
        let auth = WebhookAuth {
            token: Some("secret-token".to_string()),
        };
        assert!(auth.accepts("secret-token"));
        assert!(!auth.accepts("other"));
        assert!(!auth.accepts(""));
    }

    #[test]
    fn unconfigured_accepts_any_non_empty() {
        let auth = WebhookAuth::default();
        assert!(auth.accepts("anything"));
        assert!(!auth.accepts(""));
    }

    #[test]
    fn debug_redacts_token() {
        let auth = WebhookAuth {
            token: Some("secret-token".to_string()),
        };
        let debug_output = format!("{auth:?}");
        assert!(!debug_output.contains("secret-token"));
        assert!(debug_output.contains("[redacted]"));
    }
}
