// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the integration broker.
//!
//! Provides [`BrokerConnector`] which mints a customer token per request,
//! runs connection actions, and classifies broker failures into
//! rate-limit, auth, and upstream errors.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use unibox_config::model::BrokerConfig;
use unibox_core::{
    AdapterType, Connection, ConnectorAdapter, Customer, HealthStatus, OutgoingPayload, Page,
    PluginAdapter, RawRecord, SubmitOutcome, UniboxError,
};

use crate::token::TokenIssuer;
use crate::types::{
    ActionResponse, ApiErrorBody, CreateMessageInput, CursorInput, DataLinkTableInstance,
    DataLinkTableLink, ItemsResponse, MessagesInput, RecordsOutput, SendOutput, WireConnection,
};

/// Integration broker client.
///
/// Holds no per-customer state. Every call mints a fresh customer token,
/// so credentials are never cached across requests.
#[derive(Debug, Clone)]
pub struct BrokerConnector {
    client: reqwest::Client,
    tokens: TokenIssuer,
    base_url: String,
    timeout: Duration,
}

impl BrokerConnector {
    /// Creates a broker client from configuration.
    ///
    /// Missing workspace credentials are not an error here; every broker call
    /// then fails with [`UniboxError::Auth`].
    pub fn new(config: &BrokerConfig) -> Result<Self, UniboxError> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| UniboxError::Upstream {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            tokens: TokenIssuer::from_config(config),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Overrides the base URL (for testing with wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        customer: &Customer,
        path: &str,
    ) -> Result<T, UniboxError> {
        let token = self.tokens.issue(customer)?;
        let request = self.client.get(self.url(path)).bearer_auth(token);
        let response = self.execute(request, path).await?;
        parse_body(response).await
    }

    /// Runs a connection action and returns its raw output.
    async fn run_action<I: Serialize + ?Sized>(
        &self,
        customer: &Customer,
        connection_id: &str,
        action: &str,
        input: &I,
    ) -> Result<serde_json::Value, UniboxError> {
        let token = self.tokens.issue(customer)?;
        let path = format!("/connections/{connection_id}/actions/{action}/run");
        let request = self
            .client
            .post(self.url(&path))
            .bearer_auth(token)
            .json(input);
        let response = self.execute(request, &path).await?;
        let body: ActionResponse = parse_body(response).await?;
        Ok(body.output)
    }

    async fn run_listing<I: Serialize + ?Sized>(
        &self,
        customer: &Customer,
        connection_id: &str,
        action: &str,
        input: &I,
    ) -> Result<Page<RawRecord>, UniboxError> {
        let output = self
            .run_action(customer, connection_id, action, input)
            .await?;
        if output.is_null() {
            return Ok(Page::default());
        }
        let records: RecordsOutput =
            serde_json::from_value(output).map_err(|e| UniboxError::Upstream {
                message: format!("failed to parse {action} output: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Page {
            items: records.records,
            next_cursor: records.cursor.filter(|c| !c.is_empty()),
        })
    }

    async fn execute(&self, request: RequestBuilder, path: &str) -> Result<Response, UniboxError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                UniboxError::Timeout {
                    duration: self.timeout,
                }
            } else {
                UniboxError::Upstream {
                    message: format!("HTTP request failed: {e}"),
                    source: Some(Box::new(e)),
                }
            }
        })?;

        let status = response.status();
        debug!(status = %status, path, "broker response received");
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        let err = classify_status(status, retry_after, &body);
        warn!(status = %status, path, error = %err, "broker request failed");
        Err(err)
    }
}

/// Maps a non-2xx broker response to the error taxonomy.
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> UniboxError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.to_string());
    match status {
        StatusCode::TOO_MANY_REQUESTS => UniboxError::RateLimited { retry_after },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            UniboxError::Auth(format!("broker rejected credentials ({status}): {detail}"))
        }
        _ => UniboxError::upstream(format!("broker returned {status}: {detail}")),
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn parse_body<T: DeserializeOwned>(response: Response) -> Result<T, UniboxError> {
    let body = response.text().await.map_err(|e| UniboxError::Upstream {
        message: format!("failed to read response body: {e}"),
        source: Some(Box::new(e)),
    })?;
    if body.trim().is_empty() {
        return serde_json::from_str("{}").map_err(|e| UniboxError::Upstream {
            message: format!("failed to parse empty broker response: {e}"),
            source: Some(Box::new(e)),
        });
    }
    serde_json::from_str(&body).map_err(|e| UniboxError::Upstream {
        message: format!("failed to parse broker response: {e}"),
        source: Some(Box::new(e)),
    })
}

#[async_trait]
impl PluginAdapter for BrokerConnector {
    fn name(&self) -> &str {
        "integration-broker"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Connector
    }

    async fn health_check(&self) -> Result<HealthStatus, UniboxError> {
        if self.tokens.has_credentials() {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Degraded(
                "broker workspace credentials are not configured".to_string(),
            ))
        }
    }

    async fn shutdown(&self) -> Result<(), UniboxError> {
        Ok(())
    }
}

#[async_trait]
impl ConnectorAdapter for BrokerConnector {
    async fn list_connections(&self, customer: &Customer) -> Result<Vec<Connection>, UniboxError> {
        let body: ItemsResponse<WireConnection> = self.get_json(customer, "/connections").await?;
        Ok(body.items.into_iter().map(Connection::from).collect())
    }

    async fn list_conversations(
        &self,
        customer: &Customer,
        connection_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<RawRecord>, UniboxError> {
        let input = CursorInput {
            cursor: cursor.unwrap_or_default(),
        };
        self.run_listing(customer, connection_id, "get-chats", &input)
            .await
    }

    async fn list_messages(
        &self,
        customer: &Customer,
        connection_id: &str,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<RawRecord>, UniboxError> {
        let input = MessagesInput {
            channel_id: conversation_id,
            cursor: cursor.unwrap_or_default(),
        };
        self.run_listing(customer, connection_id, "get-messages", &input)
            .await
    }

    async fn submit_outgoing_message(
        &self,
        customer: &Customer,
        connection_id: &str,
        payload: &OutgoingPayload,
    ) -> Result<SubmitOutcome, UniboxError> {
        let input = CreateMessageInput::new(connection_id, payload);
        let output = self
            .run_action(customer, connection_id, "create-messages", &input)
            .await?;
        let out: SendOutput = if output.is_null() {
            SendOutput::default()
        } else {
            serde_json::from_value(output).map_err(|e| UniboxError::Upstream {
                message: format!("failed to parse create-messages output: {e}"),
                source: Some(Box::new(e)),
            })?
        };

        // A handle only means "await a callback" while the flow is still running.
        if !out.is_terminal()
            && let Some(operation_handle) = out.handle()
        {
            return Ok(SubmitOutcome::Accepted { operation_handle });
        }
        Ok(SubmitOutcome::Completed {
            success: out.succeeded(),
            external_message_id: out.external_message_id(),
        })
    }

    async fn fetch_user_mappings(
        &self,
        customer: &Customer,
        connection_id: &str,
    ) -> Result<HashMap<String, String>, UniboxError> {
        let instances: ItemsResponse<DataLinkTableInstance> = self
            .get_json(customer, "/data-link-table-instances")
            .await?;
        let Some(users) = instances
            .items
            .into_iter()
            .find(|i| i.is_users_table_for(connection_id))
        else {
            debug!(connection_id, "no users data link table for connection");
            return Ok(HashMap::new());
        };

        let path = format!("/data-link-table-instances/{}/links", users.id);
        let links: ItemsResponse<DataLinkTableLink> = self.get_json(customer, &path).await?;
        let mappings: HashMap<String, String> = links
            .items
            .into_iter()
            .filter_map(|link| match (link.external_record_id, link.app_record_id) {
                (Some(ext), Some(app)) if !ext.is_empty() && !app.is_empty() => Some((ext, app)),
                _ => None,
            })
            .collect();
        debug!(connection_id, count = mappings.len(), "fetched user mappings");
        Ok(mappings)
    }

    async fn fetch_current_user(
        &self,
        customer: &Customer,
        connection_id: &str,
    ) -> Result<RawRecord, UniboxError> {
        let output = self
            .run_action(customer, connection_id, "get-user", &serde_json::json!({}))
            .await?;
        let serde_json::Value::Object(object) = output else {
            return Err(UniboxError::upstream("No user data found"));
        };
        if let Some(serde_json::Value::Array(records)) = object.get("records")
            && let Some(serde_json::Value::Object(first)) = records.first()
        {
            return Ok(first.clone());
        }
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_core::ChatType;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_connector(server: &MockServer) -> BrokerConnector {
        let config = BrokerConfig {
            workspace_key: Some("ws-key".into()),
            workspace_secret: Some("ws-secret".into()),
            ..BrokerConfig::default()
        };
        BrokerConnector::new(&config)
            .unwrap()
            .with_base_url(server.uri())
    }

    fn customer() -> Customer {
        Customer::new("cust-1")
    }

    fn payload() -> OutgoingPayload {
        OutgoingPayload {
            customer_id: "cust-1".into(),
            internal_message_id: "msg-1".into(),
            correlation_id: "corr-1".into(),
            content: "hello".into(),
            chat_id: "C1".into(),
            recipient: "C1".into(),
            chat_name: "general".into(),
            chat_type: ChatType::Channel,
            platform_name: "Slack".into(),
            sent_time: "2026-01-01T00:00:00.000Z".into(),
        }
    }

    #[tokio::test]
    async fn list_connections_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/connections"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "conn-1", "name": "Slack", "integration": {"key": "slack"}},
                    {"id": "conn-2"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let conns = make_connector(&server)
            .list_connections(&customer())
            .await
            .unwrap();
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[0].platform_key(), "slack");
        assert_eq!(conns[1].label(), "conn-2");
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let connector = BrokerConnector::new(&BrokerConfig::default())
            .unwrap()
            .with_base_url(server.uri());
        let err = connector.list_connections(&customer()).await.unwrap_err();
        assert!(matches!(err, UniboxError::Auth(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_classified_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/get-chats/run"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_json(serde_json::json!({"message": "slow down"})),
            )
            .mount(&server)
            .await;

        let err = make_connector(&server)
            .list_conversations(&customer(), "conn-1", None)
            .await
            .unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn forbidden_is_auth_and_server_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/connections"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/get-chats/run"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let connector = make_connector(&server);
        let auth = connector.list_connections(&customer()).await.unwrap_err();
        assert!(matches!(auth, UniboxError::Auth(_)));
        let upstream = connector
            .list_conversations(&customer(), "conn-1", None)
            .await
            .unwrap_err();
        assert!(matches!(upstream, UniboxError::Upstream { .. }));
    }

    #[tokio::test]
    async fn list_messages_passes_channel_and_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/get-messages/run"))
            .and(body_partial_json(
                serde_json::json!({"channelId": "C1", "cursor": "page-2"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"records": [{"id": "m1"}, {"id": "m2"}], "cursor": ""}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = make_connector(&server)
            .list_messages(&customer(), "conn-1", "C1", Some("page-2"))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn submit_returns_handle_for_async_flow() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/create-messages/run"))
            .and(body_partial_json(
                serde_json::json!({"type": "created", "internalMessageId": "msg-1"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"status": "running", "flowRunId": "run-9"}
            })))
            .mount(&server)
            .await;

        let outcome = make_connector(&server)
            .submit_outgoing_message(&customer(), "conn-1", &payload())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                operation_handle: "run-9".into()
            }
        );
    }

    #[tokio::test]
    async fn submit_inline_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/create-messages/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"messageId": "ext-1", "status": "completed"}
            })))
            .mount(&server)
            .await;

        let outcome = make_connector(&server)
            .submit_outgoing_message(&customer(), "conn-1", &payload())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Completed {
                success: true,
                external_message_id: Some("ext-1".into())
            }
        );
    }

    #[tokio::test]
    async fn terminal_status_with_handle_completes_inline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/create-messages/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"flowRunId": "r1", "status": "failed"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/create-messages/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"flowRunId": "r2", "status": "success", "messageId": "ts1"}
            })))
            .mount(&server)
            .await;

        let connector = make_connector(&server);
        let failed = connector
            .submit_outgoing_message(&customer(), "conn-1", &payload())
            .await
            .unwrap();
        assert_eq!(
            failed,
            SubmitOutcome::Completed {
                success: false,
                external_message_id: None
            }
        );
        let succeeded = connector
            .submit_outgoing_message(&customer(), "conn-1", &payload())
            .await
            .unwrap();
        assert_eq!(
            succeeded,
            SubmitOutcome::Completed {
                success: true,
                external_message_id: Some("ts1".into())
            }
        );
    }

    #[tokio::test]
    async fn handle_without_status_awaits_callback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/create-messages/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"operationHandle": "op-3"}
            })))
            .mount(&server)
            .await;

        let outcome = make_connector(&server)
            .submit_outgoing_message(&customer(), "conn-1", &payload())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Accepted {
                operation_handle: "op-3".into()
            }
        );
    }

    #[tokio::test]
    async fn user_mappings_follow_users_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data-link-table-instances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "dlt-other", "dataLinkTable": {"key": "users"}, "connectionId": "conn-2"},
                    {"id": "dlt-1", "dataLinkTable": {"key": "users"}, "connectionId": "conn-1"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data-link-table-instances/dlt-1/links"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"externalRecordId": "U1", "appRecordId": "alice"},
                    {"externalRecordId": "U2"}
                ]
            })))
            .mount(&server)
            .await;

        let mappings = make_connector(&server)
            .fetch_user_mappings(&customer(), "conn-1")
            .await
            .unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings.get("U1").map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn current_user_prefers_first_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-1/actions/get-user/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"records": [{"userId": "U1", "name": "alice"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/connections/conn-2/actions/get-user/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": {"userId": "U2", "platform": "Discord"}
            })))
            .mount(&server)
            .await;

        let connector = make_connector(&server);
        let first = connector
            .fetch_current_user(&customer(), "conn-1")
            .await
            .unwrap();
        assert_eq!(first["userId"], "U1");
        let direct = connector
            .fetch_current_user(&customer(), "conn-2")
            .await
            .unwrap();
        assert_eq!(direct["platform"], "Discord");
    }
}
