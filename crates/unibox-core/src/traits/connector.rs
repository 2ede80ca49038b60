// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connector adapter trait for the external integration broker.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::UniboxError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{Connection, Customer, OutgoingPayload, Page, RawRecord, SubmitOutcome};

/// Uniform contract over an external platform broker.
///
/// Implementations hold no persistent state; credentials are acquired per call.
/// Any method may fail with [`UniboxError::RateLimited`], which callers retry
/// at most once.
#[async_trait]
pub trait ConnectorAdapter: PluginAdapter {
    /// Lists the customer's authorized platform connections.
    ///
    /// Fails with [`UniboxError::Auth`] if broker credentials cannot be issued.
    async fn list_connections(&self, customer: &Customer) -> Result<Vec<Connection>, UniboxError>;

    /// Lists one page of raw conversation records for a connection.
    async fn list_conversations(
        &self,
        customer: &Customer,
        connection_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<RawRecord>, UniboxError>;

    /// Lists one page of raw message records for a conversation.
    async fn list_messages(
        &self,
        customer: &Customer,
        connection_id: &str,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<RawRecord>, UniboxError>;

    /// Submits an outgoing message through a connection.
    async fn submit_outgoing_message(
        &self,
        customer: &Customer,
        connection_id: &str,
        payload: &OutgoingPayload,
    ) -> Result<SubmitOutcome, UniboxError>;

    /// Fetches the platform user id to display name mapping used for mentions.
    async fn fetch_user_mappings(
        &self,
        customer: &Customer,
        connection_id: &str,
    ) -> Result<HashMap<String, String>, UniboxError>;

    /// Fetches the raw identity record of the customer on a connection.
    async fn fetch_current_user(
        &self,
        customer: &Customer,
        connection_id: &str,
    ) -> Result<RawRecord, UniboxError>;
}
