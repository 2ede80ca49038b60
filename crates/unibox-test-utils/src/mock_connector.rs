// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted broker connector for deterministic testing.
//!
//! `MockConnector` implements `ConnectorAdapter` from in-memory fixtures.
//! Failures are queued per call kind and consumed before the fixture is
//! consulted, so a test can make exactly the Nth call fail.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use unibox_core::traits::adapter::PluginAdapter;
use unibox_core::types::{
    AdapterType, Connection, Customer, HealthStatus, OutgoingPayload, Page, RawRecord,
    SubmitOutcome,
};
use unibox_core::{ConnectorAdapter, UniboxError};

/// Kinds of broker call, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    ListConnections,
    ListConversations,
    ListMessages,
    Submit,
    UserMappings,
    CurrentUser,
}

/// A failure to inject into the next call of one kind.
#[derive(Debug, Clone)]
pub enum MockFailure {
    RateLimited,
    Upstream(String),
    Auth(String),
}

impl From<MockFailure> for UniboxError {
    fn from(failure: MockFailure) -> Self {
        match failure {
            MockFailure::RateLimited => UniboxError::RateLimited { retry_after: None },
            MockFailure::Upstream(message) => UniboxError::upstream(message),
            MockFailure::Auth(message) => UniboxError::Auth(message),
        }
    }
}

/// Parks submissions after they are recorded, until the test releases them.
///
/// Lets a test act while a submission is in flight.
#[derive(Debug, Clone, Default)]
pub struct SubmitGate {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl SubmitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once a submission is parked at the gate.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Lets the parked submission return its outcome.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
struct State {
    connections: Vec<Connection>,
    conversations: HashMap<String, Vec<RawRecord>>,
    messages: HashMap<(String, String), Vec<RawRecord>>,
    user_mappings: HashMap<String, HashMap<String, String>>,
    current_users: HashMap<String, RawRecord>,
    submit_outcomes: VecDeque<SubmitOutcome>,
    failures: HashMap<MockCall, VecDeque<MockFailure>>,
    calls: HashMap<MockCall, usize>,
    submitted: Vec<OutgoingPayload>,
    submit_gate: Option<SubmitGate>,
    page_size: Option<usize>,
}

impl State {
    /// Counts the call and pops an injected failure, if one is queued.
    fn enter(&mut self, call: MockCall) -> Result<(), UniboxError> {
        *self.calls.entry(call).or_default() += 1;
        match self.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    /// Slices a fixture listing into pages; the cursor is the next offset.
    fn page(&self, records: Option<&Vec<RawRecord>>, cursor: Option<&str>) -> Page<RawRecord> {
        let records = records.map(Vec::as_slice).unwrap_or_default();
        let start = cursor
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0)
            .min(records.len());
        let end = match self.page_size {
            Some(size) => (start + size).min(records.len()),
            None => records.len(),
        };
        Page {
            items: records[start..end].to_vec(),
            next_cursor: (end < records.len()).then(|| end.to_string()),
        }
    }
}

/// A broker connector answering from fixtures.
///
/// Without a scripted outcome, submissions complete successfully with an
/// external id of `ext-{n}`.
pub struct MockConnector {
    state: Mutex<State>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_connection(
        mut self,
        id: &str,
        name: Option<&str>,
        platform: Option<&str>,
    ) -> Self {
        self.state.get_mut().connections.push(Connection {
            id: id.to_string(),
            name: name.map(String::from),
            platform: platform.map(String::from),
        });
        self
    }

    pub fn with_conversations(mut self, connection_id: &str, records: Vec<RawRecord>) -> Self {
        self.state
            .get_mut()
            .conversations
            .insert(connection_id.to_string(), records);
        self
    }

    pub fn with_messages(
        mut self,
        connection_id: &str,
        conversation_id: &str,
        records: Vec<RawRecord>,
    ) -> Self {
        self.state.get_mut().messages.insert(
            (connection_id.to_string(), conversation_id.to_string()),
            records,
        );
        self
    }

    /// Splits every listing into pages of `size` records.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.state.get_mut().page_size = Some(size.max(1));
        self
    }

    pub fn with_user_mappings(
        mut self,
        connection_id: &str,
        mappings: HashMap<String, String>,
    ) -> Self {
        self.state
            .get_mut()
            .user_mappings
            .insert(connection_id.to_string(), mappings);
        self
    }

    pub fn with_current_user(mut self, connection_id: &str, record: RawRecord) -> Self {
        self.state
            .get_mut()
            .current_users
            .insert(connection_id.to_string(), record);
        self
    }

    /// Queues the outcome of the next submission.
    pub fn with_submit_outcome(mut self, outcome: SubmitOutcome) -> Self {
        self.state.get_mut().submit_outcomes.push_back(outcome);
        self
    }

    /// Parks every submission at `gate` before it returns.
    pub fn with_submit_gate(mut self, gate: SubmitGate) -> Self {
        self.state.get_mut().submit_gate = Some(gate);
        self
    }

    /// Makes the next call of this kind fail. Repeated calls queue further failures.
    pub async fn fail_next(&self, call: MockCall, failure: MockFailure) {
        self.state
            .lock()
            .await
            .failures
            .entry(call)
            .or_default()
            .push_back(failure);
    }

    /// How many calls of this kind were made, failed ones included.
    pub async fn calls(&self, call: MockCall) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&call)
            .copied()
            .unwrap_or_default()
    }

    /// Payloads of every submission that reached the fixture.
    pub async fn submitted(&self) -> Vec<OutgoingPayload> {
        self.state.lock().await.submitted.clone()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockConnector {
    fn name(&self) -> &str {
        "mock-connector"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Connector
    }

    async fn health_check(&self) -> Result<HealthStatus, UniboxError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), UniboxError> {
        Ok(())
    }
}

#[async_trait]
impl ConnectorAdapter for MockConnector {
    async fn list_connections(&self, _customer: &Customer) -> Result<Vec<Connection>, UniboxError> {
        let mut state = self.state.lock().await;
        state.enter(MockCall::ListConnections)?;
        Ok(state.connections.clone())
    }

    async fn list_conversations(
        &self,
        _customer: &Customer,
        connection_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<RawRecord>, UniboxError> {
        let mut state = self.state.lock().await;
        state.enter(MockCall::ListConversations)?;
        Ok(state.page(state.conversations.get(connection_id), cursor))
    }

    async fn list_messages(
        &self,
        _customer: &Customer,
        connection_id: &str,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<RawRecord>, UniboxError> {
        let mut state = self.state.lock().await;
        state.enter(MockCall::ListMessages)?;
        let key = (connection_id.to_string(), conversation_id.to_string());
        Ok(state.page(state.messages.get(&key), cursor))
    }

    async fn submit_outgoing_message(
        &self,
        _customer: &Customer,
        _connection_id: &str,
        payload: &OutgoingPayload,
    ) -> Result<SubmitOutcome, UniboxError> {
        let (outcome, gate) = {
            let mut state = self.state.lock().await;
            state.enter(MockCall::Submit)?;
            state.submitted.push(payload.clone());
            let n = state.submitted.len();
            let outcome = state
                .submit_outcomes
                .pop_front()
                .unwrap_or_else(|| SubmitOutcome::Completed {
                    success: true,
                    external_message_id: Some(format!("ext-{n}")),
                });
            (outcome, state.submit_gate.clone())
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(outcome)
    }

    async fn fetch_user_mappings(
        &self,
        _customer: &Customer,
        connection_id: &str,
    ) -> Result<HashMap<String, String>, UniboxError> {
        let mut state = self.state.lock().await;
        state.enter(MockCall::UserMappings)?;
        Ok(state
            .user_mappings
            .get(connection_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_current_user(
        &self,
        _customer: &Customer,
        connection_id: &str,
    ) -> Result<RawRecord, UniboxError> {
        let mut state = self.state.lock().await;
        state.enter(MockCall::CurrentUser)?;
        state
            .current_users
            .get(connection_id)
            .cloned()
            .ok_or_else(|| UniboxError::upstream("No user data found"))
    }
}
