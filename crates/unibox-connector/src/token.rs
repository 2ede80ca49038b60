// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Customer access tokens for the integration broker.
//!
//! Tokens are HS512 JWTs signed with the workspace secret and issued by the
//! workspace key. A fresh token is minted for every broker call.

use std::fmt;

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use unibox_config::model::BrokerConfig;
use unibox_core::{Customer, UniboxError};

/// Extra fields the broker attaches to the customer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenFields {
    pub has_name: bool,
}

/// JWT claims identifying a customer to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub id: String,
    pub name: String,
    pub fields: TokenFields,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints per-call customer tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    credentials: Option<(String, String)>,
    ttl_secs: i64,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("has_credentials", &self.credentials.is_some())
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl TokenIssuer {
    pub fn from_config(config: &BrokerConfig) -> Self {
        let credentials = match (&config.workspace_key, &config.workspace_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some((key.clone(), secret.clone()))
            }
            _ => None,
        };
        Self {
            credentials,
            ttl_secs: i64::try_from(config.token_ttl_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Build the claims for a customer at the given issue time.
    pub fn claims(&self, customer: &Customer, issued_at: i64) -> Result<TokenClaims, UniboxError> {
        let (key, _) = self.credentials()?;
        Ok(TokenClaims {
            id: customer.id.clone(),
            name: customer.display_name().to_string(),
            fields: TokenFields {
                has_name: customer.name.is_some(),
            },
            iss: key.clone(),
            iat: issued_at,
            exp: issued_at.saturating_add(self.ttl_secs),
        })
    }

    /// Mint a signed token for the customer.
    ///
    /// Fails with [`UniboxError::Auth`] when workspace credentials are not configured.
    pub fn issue(&self, customer: &Customer) -> Result<String, UniboxError> {
        let claims = self.claims(customer, chrono::Utc::now().timestamp())?;
        let (_, secret) = self.credentials()?;
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| UniboxError::Auth(format!("failed to sign broker token: {e}")))
    }

    fn credentials(&self) -> Result<&(String, String), UniboxError> {
        self.credentials.as_ref().ok_or_else(|| {
            UniboxError::Auth("broker workspace credentials are not configured".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};

    fn config(key: Option<&str>, secret: Option<&str>) -> BrokerConfig {
        BrokerConfig {
            workspace_key: key.map(String::from),
            workspace_secret: secret.map(String::from),
            ..BrokerConfig::default()
        }
    }

    #[test]
    fn missing_credentials_is_auth_error() {
        let issuer = TokenIssuer::from_config(&config(Some("key"), None));
        assert!(!issuer.has_credentials());
        let err = issuer.issue(&Customer::new("cust-1")).unwrap_err();
        assert!(matches!(err, UniboxError::Auth(_)));
    }

    #[test]
    fn claims_fall_back_to_customer_id() {
        let issuer = TokenIssuer::from_config(&config(Some("ws-key"), Some("secret")));
        let claims = issuer.claims(&Customer::new("cust-1"), 1_000).unwrap();
        assert_eq!(claims.name, "cust-1");
        assert!(!claims.fields.has_name);
        assert_eq!(claims.iss, "ws-key");
        assert_eq!(claims.exp, 1_000 + 7200);
    }

    #[test]
    fn issued_token_verifies_with_hs512() {
        let issuer = TokenIssuer::from_config(&config(Some("ws-key"), Some("secret")));
        let customer = Customer {
            id: "cust-1".into(),
            name: Some("Alice".into()),
        };
        let token = issuer.issue(&customer).unwrap();

        let mut validation = Validation::new(Algorithm::HS512);
        validation.set_issuer(&["ws-key"]);
        let decoded = jsonwebtoken::decode::<TokenClaims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.id, "cust-1");
        assert_eq!(decoded.claims.name, "Alice");
        assert!(decoded.claims.fields.has_name);
    }

    #[test]
    fn debug_hides_credentials() {
        let issuer = TokenIssuer::from_config(&config(Some("ws-key"), Some("hunter2")));
        let rendered = format!("{issuer:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
