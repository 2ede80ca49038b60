// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The customer's own identity on each connected platform.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use unibox_core::types::now_iso;
use unibox_core::{
    Connection, ConnectorAdapter, Customer, PlatformIdentity, StorageAdapter, UniboxError,
};

use crate::backoff::with_rate_limit_retry;
use crate::normalize::normalize_identity;

/// Outcome of refreshing one connection's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResult {
    pub platform_id: String,
    pub platform_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRefreshReport {
    pub results: Vec<IdentityResult>,
    pub total_processed: usize,
    pub successful: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportNewSetting {
    pub import_new: bool,
    pub exists: bool,
}

pub struct IdentityService {
    connector: Arc<dyn ConnectorAdapter>,
    storage: Arc<dyn StorageAdapter>,
    rate_limit_backoff: Duration,
}

impl IdentityService {
    pub fn new(
        connector: Arc<dyn ConnectorAdapter>,
        storage: Arc<dyn StorageAdapter>,
        rate_limit_backoff: Duration,
    ) -> Self {
        Self {
            connector,
            storage,
            rate_limit_backoff,
        }
    }

    /// Fetches and stores the customer's identity for every connection.
    ///
    /// A failing connection is reported in the result list and does not stop
    /// the others.
    pub async fn refresh(&self, customer: &Customer) -> Result<IdentityRefreshReport, UniboxError> {
        let connections = with_rate_limit_retry("list-connections", self.rate_limit_backoff, || {
            self.connector.list_connections(customer)
        })
        .await?;
        if connections.is_empty() {
            return Err(UniboxError::Validation("No platforms connected".to_string()));
        }

        let mut results = Vec::with_capacity(connections.len());
        for connection in &connections {
            let result = match self.refresh_one(customer, connection).await {
                Ok(identity) => IdentityResult {
                    platform_id: identity.platform_id,
                    platform_name: identity.platform_name,
                    success: true,
                    external_user_id: identity.external_user_id,
                    error: None,
                },
                Err(e) => {
                    warn!(
                        customer_id = %customer.id,
                        connection_id = %connection.id,
                        error = %e,
                        "identity refresh failed"
                    );
                    IdentityResult {
                        platform_id: connection.id.clone(),
                        platform_name: connection.label().to_string(),
                        success: false,
                        external_user_id: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let successful = results.iter().filter(|r| r.success).count();
        info!(customer_id = %customer.id, total = results.len(), successful, "identities refreshed");
        Ok(IdentityRefreshReport {
            total_processed: results.len(),
            successful,
            results,
        })
    }

    async fn refresh_one(
        &self,
        customer: &Customer,
        connection: &Connection,
    ) -> Result<PlatformIdentity, UniboxError> {
        let record = with_rate_limit_retry("get-user", self.rate_limit_backoff, || {
            self.connector.fetch_current_user(customer, &connection.id)
        })
        .await?;
        let normalized = normalize_identity(&record);

        let now = now_iso();
        let identity = PlatformIdentity {
            customer_id: customer.id.clone(),
            platform_id: connection.id.clone(),
            platform_name: normalized
                .platform_name
                .unwrap_or_else(|| connection.label().to_string()),
            connection_id: connection.id.clone(),
            external_user_id: normalized.external_user_id,
            external_user_name: normalized.external_user_name,
            external_user_email: normalized.external_user_email,
            import_new: true,
            last_synced: now.clone(),
            created_at: now.clone(),
            updated_at: now,
        };
        self.storage.upsert_platform_identity(&identity).await?;
        Ok(identity)
    }

    pub async fn list(&self, customer: &Customer) -> Result<Vec<PlatformIdentity>, UniboxError> {
        self.storage.list_platform_identities(&customer.id).await
    }

    /// The auto-import preference of a platform; unknown platforms default to on.
    pub async fn import_new(
        &self,
        customer: &Customer,
        platform_id: &str,
    ) -> Result<ImportNewSetting, UniboxError> {
        if platform_id.trim().is_empty() {
            return Err(UniboxError::Validation("platformId is required".to_string()));
        }
        Ok(
            match self
                .storage
                .get_platform_identity(&customer.id, platform_id)
                .await?
            {
                Some(identity) => ImportNewSetting {
                    import_new: identity.import_new,
                    exists: true,
                },
                None => ImportNewSetting {
                    import_new: true,
                    exists: false,
                },
            },
        )
    }

    pub async fn set_import_new(
        &self,
        customer: &Customer,
        platform_id: &str,
        import_new: bool,
    ) -> Result<(), UniboxError> {
        if platform_id.trim().is_empty() {
            return Err(UniboxError::Validation("platformId is required".to_string()));
        }
        self.storage
            .set_import_new(&customer.id, platform_id, import_new)
            .await?;
        info!(customer_id = %customer.id, platform_id, import_new, "import preference updated");
        Ok(())
    }
}
