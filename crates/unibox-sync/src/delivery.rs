// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound send, retry, and asynchronous delivery callbacks.
//!
//! A message is written `pending`, with the attempt's correlation id, before
//! the broker is called, so every attempt leaves a row that can be retried
//! and a completion can find it before the broker's handle is stored.
//! Terminal transitions go through a conditional update and are applied at
//! most once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use unibox_core::types::now_iso;
use unibox_core::{
    ChatType, ConnectorAdapter, Customer, DeliveryOutcome, DeliveryStatus, Message, MessageType,
    OutgoingPayload, StorageAdapter, SubmitOutcome, UniboxError,
};

use crate::backoff::with_rate_limit_retry;

pub const CONTENT_REQUIRED: &str = "Message content is required";
pub const MISSING_FIELDS: &str = "Missing required fields: message, chatId, integrationId";
pub const MESSAGE_NOT_FOUND: &str = "Message not found";

/// An outgoing message as submitted by the caller.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub content: String,
    pub chat_id: String,
    pub connection_id: String,
    pub recipient: Option<String>,
    pub chat_type: Option<ChatType>,
}

/// Result of a send or retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: String,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_message_id: Option<String>,
}

/// Completion notice for an asynchronous send.
///
/// Identified by the broker's operation handle, the correlation id sent with
/// the attempt, or both.
#[derive(Debug, Clone, Default)]
pub struct DeliveryCallback {
    pub operation_handle: Option<String>,
    pub correlation_id: Option<String>,
    pub status: String,
    pub external_message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Settled {
        message_id: String,
        status: DeliveryStatus,
    },
    /// The message had already left `pending`; nothing changed.
    AlreadySettled { message_id: String },
}

/// Process-lifetime delivery counters.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    sent: AtomicU64,
    failed: AtomicU64,
    accepted: AtomicU64,
}

impl DeliveryStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    fn record(&self, status: DeliveryStatus) {
        let counter = match status {
            DeliveryStatus::Sent => &self.sent,
            DeliveryStatus::Failed => &self.failed,
            DeliveryStatus::Pending => &self.accepted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        #[cfg(feature = "prometheus")]
        unibox_prometheus::record_delivery(&status.to_string());
    }
}

/// Sends outbound messages and applies their delivery outcomes.
pub struct DeliveryService {
    connector: Arc<dyn ConnectorAdapter>,
    storage: Arc<dyn StorageAdapter>,
    max_message_length: usize,
    rate_limit_backoff: Duration,
    stats: DeliveryStats,
}

impl DeliveryService {
    pub fn new(
        connector: Arc<dyn ConnectorAdapter>,
        storage: Arc<dyn StorageAdapter>,
        max_message_length: usize,
        rate_limit_backoff: Duration,
    ) -> Self {
        Self {
            connector,
            storage,
            max_message_length,
            rate_limit_backoff,
            stats: DeliveryStats::default(),
        }
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    fn validate(&self, request: &SendRequest) -> Result<(), UniboxError> {
        if request.chat_id.trim().is_empty() || request.connection_id.trim().is_empty() {
            return Err(UniboxError::Validation(MISSING_FIELDS.to_string()));
        }
        if request.content.trim().is_empty() {
            return Err(UniboxError::Validation(CONTENT_REQUIRED.to_string()));
        }
        let length = request.content.chars().count();
        if length > self.max_message_length {
            return Err(UniboxError::Validation(format!(
                "Message exceeds maximum length of {} characters",
                self.max_message_length
            )));
        }
        Ok(())
    }

    /// Stores a new outbound message and submits it to the broker.
    ///
    /// Validation failures make no network call and write nothing. A broker
    /// failure leaves the row `failed` and is returned to the caller.
    pub async fn send(
        &self,
        customer: &Customer,
        request: SendRequest,
    ) -> Result<SendReceipt, UniboxError> {
        self.validate(&request)?;

        let now = now_iso();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let message = Message {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            customer_id: customer.id.clone(),
            content: request.content.clone(),
            sender: customer.id.clone(),
            owner_name: customer.name.clone(),
            timestamp: now.clone(),
            conversation_id: Some(request.chat_id.clone()),
            connection_id: request.connection_id.clone(),
            platform_name: None,
            message_type: MessageType::User,
            status: DeliveryStatus::Pending,
            external_message_id: None,
            error: None,
            operation_handle: None,
            correlation_id: Some(correlation_id.clone()),
            created_at: now.clone(),
            updated_at: now,
        };
        let message = self.with_conversation_label(message).await?;
        self.storage.insert_message(&message).await?;
        debug!(customer_id = %customer.id, message_id = %message.id, "outbound message stored");

        self.submit(
            customer,
            &message,
            &correlation_id,
            request.recipient,
            request.chat_type,
        )
        .await
    }

    /// Re-submits a stored outbound message under its original id.
    pub async fn retry(
        &self,
        customer: &Customer,
        message_id: &str,
    ) -> Result<SendReceipt, UniboxError> {
        let message = self
            .storage
            .get_message(&customer.id, message_id)
            .await?
            .ok_or_else(|| UniboxError::NotFound(MESSAGE_NOT_FOUND.to_string()))?;

        if message.message_type == MessageType::ThirdParty {
            return Err(UniboxError::Conflict(
                "Received messages cannot be resent".to_string(),
            ));
        }
        if message.status == DeliveryStatus::Sent {
            return Err(UniboxError::Conflict("Message was already sent".to_string()));
        }

        let correlation_id = uuid::Uuid::new_v4().to_string();
        self.storage
            .reset_for_delivery(&customer.id, message_id, &correlation_id)
            .await?;
        info!(customer_id = %customer.id, message_id, "retrying message delivery");
        self.submit(customer, &message, &correlation_id, None, None)
            .await
    }

    async fn with_conversation_label(&self, mut message: Message) -> Result<Message, UniboxError> {
        let Some(chat_id) = message.conversation_id.as_deref() else {
            return Ok(message);
        };
        if let Some(conversation) = self
            .storage
            .get_conversation(&message.customer_id, chat_id, Some(&message.connection_id))
            .await?
        {
            message.platform_name = conversation.platform_name;
        }
        Ok(message)
    }

    async fn submit(
        &self,
        customer: &Customer,
        message: &Message,
        correlation_id: &str,
        recipient: Option<String>,
        chat_type: Option<ChatType>,
    ) -> Result<SendReceipt, UniboxError> {
        let chat_id = message.conversation_id.clone().unwrap_or_default();
        let chat_name = self
            .storage
            .get_conversation(&customer.id, &chat_id, Some(&message.connection_id))
            .await?
            .map(|c| c.name)
            .unwrap_or_else(|| chat_id.clone());

        let payload = OutgoingPayload {
            customer_id: customer.id.clone(),
            internal_message_id: message.id.clone(),
            correlation_id: correlation_id.to_string(),
            content: message.content.clone(),
            recipient: recipient
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| chat_id.clone()),
            chat_id,
            chat_name,
            chat_type: chat_type.unwrap_or_default(),
            platform_name: message
                .platform_name
                .clone()
                .unwrap_or_else(|| message.connection_id.clone()),
            sent_time: message.timestamp.clone(),
        };

        let submitted = with_rate_limit_retry("create-messages", self.rate_limit_backoff, || {
            self.connector
                .submit_outgoing_message(customer, &message.connection_id, &payload)
        })
        .await;

        let outcome = match submitted {
            Ok(SubmitOutcome::Accepted { operation_handle }) => {
                if !self
                    .storage
                    .set_operation_handle(&customer.id, &message.id, &operation_handle)
                    .await?
                {
                    debug!(
                        message_id = %message.id,
                        operation_handle = %operation_handle,
                        "message settled before its handle was stored"
                    );
                    return self.current_receipt(&customer.id, &message.id).await;
                }
                self.stats.record(DeliveryStatus::Pending);
                info!(
                    customer_id = %customer.id,
                    message_id = %message.id,
                    operation_handle = %operation_handle,
                    "message accepted by broker"
                );
                return Ok(SendReceipt {
                    message_id: message.id.clone(),
                    status: DeliveryStatus::Pending,
                    external_message_id: None,
                });
            }
            Ok(SubmitOutcome::Completed {
                success: true,
                external_message_id,
            }) => DeliveryOutcome::Sent {
                external_message_id,
            },
            Ok(SubmitOutcome::Completed { success: false, .. }) => DeliveryOutcome::Failed {
                error: "Message delivery failed".to_string(),
            },
            Err(e) => {
                warn!(
                    customer_id = %customer.id,
                    message_id = %message.id,
                    error = %e,
                    "message submission failed"
                );
                let failed = DeliveryOutcome::Failed {
                    error: e.to_string(),
                };
                self.settle(&customer.id, &message.id, Some(correlation_id), &failed)
                    .await?;
                return Err(e);
            }
        };

        if !self
            .settle(&customer.id, &message.id, Some(correlation_id), &outcome)
            .await?
        {
            return self.current_receipt(&customer.id, &message.id).await;
        }
        Ok(SendReceipt {
            message_id: message.id.clone(),
            status: outcome.status(),
            external_message_id: match outcome {
                DeliveryOutcome::Sent {
                    external_message_id,
                } => external_message_id,
                DeliveryOutcome::Failed { .. } => None,
            },
        })
    }

    /// Receipt reflecting the stored state, for attempts a callback overtook.
    async fn current_receipt(
        &self,
        customer_id: &str,
        message_id: &str,
    ) -> Result<SendReceipt, UniboxError> {
        let stored = self
            .storage
            .get_message(customer_id, message_id)
            .await?
            .ok_or_else(|| UniboxError::NotFound(MESSAGE_NOT_FOUND.to_string()))?;
        Ok(SendReceipt {
            message_id: stored.id,
            status: stored.status,
            external_message_id: stored.external_message_id,
        })
    }

    async fn settle(
        &self,
        customer_id: &str,
        message_id: &str,
        reference: Option<&str>,
        outcome: &DeliveryOutcome,
    ) -> Result<bool, UniboxError> {
        let applied = self
            .storage
            .settle_delivery(customer_id, message_id, reference, outcome)
            .await?;
        if applied {
            self.stats.record(outcome.status());
        }
        Ok(applied)
    }

    /// Applies an asynchronous completion.
    ///
    /// The message is looked up by operation handle first, then by
    /// correlation id, so a completion that races ahead of the handle being
    /// stored still lands. Callbacks carrying neither are rejected; unknown
    /// references are [`UniboxError::NotFound`]. Repeats change nothing.
    pub async fn handle_callback(
        &self,
        callback: &DeliveryCallback,
    ) -> Result<CallbackResult, UniboxError> {
        let references: Vec<&str> = [
            callback.operation_handle.as_deref(),
            callback.correlation_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|r| !r.trim().is_empty())
        .collect();
        if references.is_empty() {
            return Err(UniboxError::Validation(
                "Missing operationHandle, flowRunId or correlationId".to_string(),
            ));
        }
        let outcome = callback_outcome(callback)?;

        let mut found = None;
        for reference in references {
            if let Some(message) = self.storage.get_message_by_delivery_ref(reference).await? {
                found = Some((reference, message));
                break;
            }
        }
        let (handle, message) =
            found.ok_or_else(|| UniboxError::NotFound(MESSAGE_NOT_FOUND.to_string()))?;

        if self
            .settle(&message.customer_id, &message.id, Some(handle), &outcome)
            .await?
        {
            info!(
                customer_id = %message.customer_id,
                message_id = %message.id,
                status = %outcome.status(),
                "delivery settled"
            );
            Ok(CallbackResult::Settled {
                message_id: message.id,
                status: outcome.status(),
            })
        } else {
            debug!(message_id = %message.id, operation_handle = handle, "callback for settled message");
            Ok(CallbackResult::AlreadySettled {
                message_id: message.id,
            })
        }
    }
}

fn callback_outcome(callback: &DeliveryCallback) -> Result<DeliveryOutcome, UniboxError> {
    match callback.status.to_ascii_lowercase().as_str() {
        "completed" | "success" | "sent" => Ok(DeliveryOutcome::Sent {
            external_message_id: callback.external_message_id.clone(),
        }),
        "failed" | "error" => Ok(DeliveryOutcome::Failed {
            error: callback
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "Delivery failed".to_string()),
        }),
        other => Err(UniboxError::Validation(format!(
            "Unknown delivery status: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unibox_test_utils::{MockCall, MockConnector, MockFailure, SubmitGate, temp_storage};

    struct Fixture {
        service: DeliveryService,
        storage: Arc<dyn StorageAdapter>,
        connector: Arc<MockConnector>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(connector: MockConnector) -> Fixture {
        let (storage, dir) = temp_storage().await;
        let connector = Arc::new(connector);
        let service = DeliveryService::new(
            connector.clone(),
            Arc::clone(&storage),
            10,
            Duration::ZERO,
        );
        Fixture {
            service,
            storage,
            connector,
            _dir: dir,
        }
    }

    fn request(content: &str) -> SendRequest {
        SendRequest {
            content: content.to_string(),
            chat_id: "C1".into(),
            connection_id: "conn-1".into(),
            ..SendRequest::default()
        }
    }

    fn accepted(handle: &str) -> SubmitOutcome {
        SubmitOutcome::Accepted {
            operation_handle: handle.to_string(),
        }
    }

    fn completed(callback_status: &str, handle: &str) -> DeliveryCallback {
        DeliveryCallback {
            operation_handle: Some(handle.to_string()),
            correlation_id: None,
            status: callback_status.to_string(),
            external_message_id: Some("ext-1".into()),
            error: Some("bounced".into()),
        }
    }

    #[tokio::test]
    async fn content_boundaries() {
        let fx = fixture(MockConnector::new()).await;
        let customer = Customer::new("cust-1");

        for bad in ["", "   "] {
            let err = fx.service.send(&customer, request(bad)).await.unwrap_err();
            assert!(matches!(err, UniboxError::Validation(ref m) if m == CONTENT_REQUIRED));
        }
        let err = fx.service.send(&customer, request("12345678901")).await.unwrap_err();
        assert!(matches!(err, UniboxError::Validation(_)));
        assert_eq!(fx.connector.calls(MockCall::Submit).await, 0);

        let ok = fx.service.send(&customer, request("1234567890")).await.unwrap();
        assert_eq!(ok.status, DeliveryStatus::Sent);
        assert_eq!(fx.connector.calls(MockCall::Submit).await, 1);
    }

    #[tokio::test]
    async fn missing_target_is_rejected() {
        let fx = fixture(MockConnector::new()).await;
        let err = fx
            .service
            .send(&Customer::new("c"), SendRequest { chat_id: String::new(), ..request("hi") })
            .await
            .unwrap_err();
        assert!(matches!(err, UniboxError::Validation(ref m) if m == MISSING_FIELDS));
    }

    #[tokio::test]
    async fn synchronous_completion_marks_sent() {
        let connector = MockConnector::new().with_submit_outcome(SubmitOutcome::Completed {
            success: true,
            external_message_id: Some("ts-1".into()),
        });
        let fx = fixture(connector).await;
        let customer = Customer::new("cust-1");

        let receipt = fx.service.send(&customer, request("hello")).await.unwrap();
        assert_eq!(receipt.status, DeliveryStatus::Sent);
        assert_eq!(receipt.external_message_id.as_deref(), Some("ts-1"));

        let stored = fx.storage.get_message("cust-1", &receipt.message_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
        assert_eq!(stored.message_type, MessageType::User);
        assert_eq!(stored.external_message_id.as_deref(), Some("ts-1"));

        let payloads = fx.connector.submitted().await;
        assert_eq!(payloads[0].internal_message_id, receipt.message_id);
        assert_eq!(payloads[0].recipient, "C1");
    }

    #[tokio::test]
    async fn async_send_then_callbacks_settle_once() {
        let connector = MockConnector::new().with_submit_outcome(accepted("run-1"));
        let fx = fixture(connector).await;
        let customer = Customer::new("cust-1");

        let receipt = fx.service.send(&customer, request("hello")).await.unwrap();
        assert_eq!(receipt.status, DeliveryStatus::Pending);
        let stored = fx.storage.get_message("cust-1", &receipt.message_id).await.unwrap().unwrap();
        assert_eq!(stored.operation_handle.as_deref(), Some("run-1"));

        let first = fx.service.handle_callback(&completed("completed", "run-1")).await.unwrap();
        assert_eq!(first, CallbackResult::Settled {
            message_id: receipt.message_id.clone(),
            status: DeliveryStatus::Sent,
        });
        let second = fx.service.handle_callback(&completed("failed", "run-1")).await.unwrap();
        assert_eq!(second, CallbackResult::AlreadySettled {
            message_id: receipt.message_id.clone(),
        });

        let stored = fx.storage.get_message("cust-1", &receipt.message_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
        assert_eq!(stored.external_message_id.as_deref(), Some("ext-1"));
        assert_eq!(fx.service.stats().sent(), 1);
        assert_eq!(fx.service.stats().failed(), 0);
    }

    #[tokio::test]
    async fn failed_callback_records_error() {
        let connector = MockConnector::new().with_submit_outcome(accepted("run-2"));
        let fx = fixture(connector).await;
        let receipt = fx.service.send(&Customer::new("cust-1"), request("hello")).await.unwrap();

        fx.service.handle_callback(&completed("failed", "run-2")).await.unwrap();
        let stored = fx.storage.get_message("cust-1", &receipt.message_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("bounced"));
    }

    #[tokio::test]
    async fn callback_requires_known_handle() {
        let fx = fixture(MockConnector::new()).await;
        let missing = DeliveryCallback { status: "completed".into(), ..DeliveryCallback::default() };
        assert!(matches!(
            fx.service.handle_callback(&missing).await.unwrap_err(),
            UniboxError::Validation(_)
        ));
        assert!(matches!(
            fx.service.handle_callback(&completed("completed", "nope")).await.unwrap_err(),
            UniboxError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn callback_by_correlation_id_settles_before_handle_is_stored() {
        let gate = SubmitGate::new();
        let connector = MockConnector::new()
            .with_submit_outcome(accepted("run-7"))
            .with_submit_gate(gate.clone());
        let fx = fixture(connector).await;
        let customer = Customer::new("cust-1");

        let early_callback = async {
            gate.reached().await;
            let payload = fx.connector.submitted().await.remove(0);
            let result = fx
                .service
                .handle_callback(&DeliveryCallback {
                    correlation_id: Some(payload.correlation_id.clone()),
                    status: "completed".into(),
                    external_message_id: Some("ts-7".into()),
                    ..DeliveryCallback::default()
                })
                .await;
            gate.release();
            (payload, result)
        };
        let (receipt, (payload, settled)) =
            tokio::join!(fx.service.send(&customer, request("hello")), early_callback);

        let receipt = receipt.unwrap();
        assert_eq!(settled.unwrap(), CallbackResult::Settled {
            message_id: receipt.message_id.clone(),
            status: DeliveryStatus::Sent,
        });
        assert_eq!(receipt.status, DeliveryStatus::Sent);
        assert_eq!(receipt.external_message_id.as_deref(), Some("ts-7"));

        let stored = fx.storage.get_message("cust-1", &receipt.message_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
        assert_eq!(stored.correlation_id.as_deref(), Some(payload.correlation_id.as_str()));
        assert!(stored.operation_handle.is_none());
        assert_eq!(fx.service.stats().sent(), 1);
        assert_eq!(fx.service.stats().accepted(), 0);
    }

    #[tokio::test]
    async fn retry_uses_fresh_correlation_id() {
        let connector = MockConnector::new();
        connector
            .fail_next(MockCall::Submit, MockFailure::Upstream("broker down".into()))
            .await;
        let fx = fixture(connector).await;
        let customer = Customer::new("cust-1");

        fx.service.send(&customer, request("hello")).await.unwrap_err();
        let failed = fx.storage.list_messages("cust-1", None, 10).await.unwrap();
        fx.service.retry(&customer, &failed[0].id).await.unwrap();

        let payloads = fx.connector.submitted().await;
        assert_eq!(payloads.len(), 2);
        assert_ne!(payloads[0].correlation_id, payloads[1].correlation_id);
        let stored = fx.storage.get_message("cust-1", &failed[0].id).await.unwrap().unwrap();
        assert_eq!(stored.correlation_id.as_deref(), Some(payloads[1].correlation_id.as_str()));
    }

    #[tokio::test]
    async fn upstream_failure_is_retryable_under_same_id() {
        let connector = MockConnector::new();
        connector
            .fail_next(MockCall::Submit, MockFailure::Upstream("broker down".into()))
            .await;
        let fx = fixture(connector).await;
        let customer = Customer::new("cust-1");

        let err = fx.service.send(&customer, request("hello")).await.unwrap_err();
        assert!(matches!(err, UniboxError::Upstream { .. }));
        let failed = fx.storage.list_messages("cust-1", None, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, DeliveryStatus::Failed);
        assert!(failed[0].error.is_some());

        let receipt = fx.service.retry(&customer, &failed[0].id).await.unwrap();
        assert_eq!(receipt.message_id, failed[0].id);
        assert_eq!(receipt.status, DeliveryStatus::Sent);
        assert_eq!(fx.storage.count_messages("cust-1").await.unwrap(), 1);

        let err = fx.service.retry(&customer, &failed[0].id).await.unwrap_err();
        assert!(matches!(err, UniboxError::Conflict(_)));
    }

    #[tokio::test]
    async fn rate_limited_submit_is_retried_once() {
        let connector = MockConnector::new();
        connector.fail_next(MockCall::Submit, MockFailure::RateLimited).await;
        let fx = fixture(connector).await;
        let receipt = fx.service.send(&Customer::new("cust-1"), request("hello")).await.unwrap();
        assert_eq!(receipt.status, DeliveryStatus::Sent);
        assert_eq!(fx.connector.calls(MockCall::Submit).await, 2);
    }

    #[tokio::test]
    async fn retry_unknown_message_is_not_found() {
        let fx = fixture(MockConnector::new()).await;
        let err = fx.service.retry(&Customer::new("cust-1"), "msg-x").await.unwrap_err();
        assert!(matches!(err, UniboxError::NotFound(ref m) if m == MESSAGE_NOT_FOUND));
    }
}
