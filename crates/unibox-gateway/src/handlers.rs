// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.
//!
//! Request and response bodies are camelCase JSON. Every success body carries
//! `success: true`; errors are rendered by [`ApiError`].

use axum::{
    Json,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use unibox_core::{
    ChatType, Conversation, DeliveryStatus, Message, PlatformIdentity, SyncState, SyncStatus,
    SyncStatusUpdate,
};
use unibox_sync::delivery::MISSING_FIELDS;
use unibox_sync::identity::ImportNewSetting;
use unibox_sync::normalize::NormalizedConversation;
use unibox_sync::{
    CallbackResult, DeliveryCallback, IdentityRefreshReport, InboundMessage, InboundReceipt,
    SendReceipt, SendRequest,
};

use crate::auth::{Caller, Webhook};
use crate::error::{ApiError, ApiJson, respond};
use crate::server::GatewayState;

const CHAT_LIMIT: u32 = 100;
const MESSAGE_LIMIT: u32 = 1000;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics
///
/// Prometheus text exposition, or 404 when no recorder is installed.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "Metrics are not enabled").into_response(),
    }
}

// --- Sync status ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub success: bool,
    pub is_syncing: bool,
    pub status: String,
    pub sync_id: Option<String>,
    pub start_time: Option<String>,
    pub last_sync_time: Option<String>,
    pub total_messages: i64,
    pub total_chats: i64,
    pub error: Option<String>,
}

impl SyncStatusResponse {
    fn idle() -> Self {
        Self {
            success: true,
            is_syncing: false,
            status: "idle".to_string(),
            sync_id: None,
            start_time: None,
            last_sync_time: None,
            total_messages: 0,
            total_chats: 0,
            error: None,
        }
    }
}

impl From<SyncStatus> for SyncStatusResponse {
    fn from(status: SyncStatus) -> Self {
        Self {
            success: true,
            is_syncing: status.is_syncing,
            status: status.status.to_string(),
            sync_id: Some(status.sync_id),
            start_time: Some(status.start_time),
            last_sync_time: status.last_sync_time,
            total_messages: status.total_messages.unwrap_or_default(),
            total_chats: status.total_chats.unwrap_or_default(),
            error: status.error,
        }
    }
}

/// GET /sync-status
pub async fn get_sync_status(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let current = state
        .pipeline
        .tracker()
        .current(&customer.id)
        .await
        .map_err(respond("Failed to get sync status"))?;
    Ok(Json(current.map_or_else(SyncStatusResponse::idle, Into::into)))
}

/// POST /sync-status
pub async fn begin_sync(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let status = state
        .pipeline
        .tracker()
        .begin(&customer.id)
        .await
        .map_err(respond("Failed to start sync"))?;
    Ok(Json(status.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSyncRequest {
    #[serde(default)]
    pub sync_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub total_messages: Option<i64>,
    #[serde(default)]
    pub total_chats: Option<i64>,
}

/// PUT /sync-status
pub async fn update_sync_status(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
    ApiJson(body): ApiJson<UpdateSyncRequest>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let sync_id = body
        .sync_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("syncId is required"))?;
    let raw_status = body
        .status
        .ok_or_else(|| ApiError::bad_request("status is required"))?;
    let status: SyncState = raw_status
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid status: {raw_status}")))?;

    let update = SyncStatusUpdate {
        status,
        error: body.error,
        total_messages: body.total_messages,
        total_chats: body.total_chats,
    };
    let updated = state
        .pipeline
        .tracker()
        .update(&customer.id, &sync_id, &update)
        .await
        .map_err(respond("Failed to update sync status"))?;
    Ok(Json(updated.into()))
}

// --- Sync run ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSyncRequest {
    #[serde(default)]
    pub sync_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSyncResponse {
    pub success: bool,
    pub sync_id: String,
    pub total_messages: i64,
    pub total_chats: i64,
}

/// POST /messages/sync
///
/// Runs the given sync, or begins and runs a new one when no `syncId` is sent.
pub async fn run_sync(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
    ApiJson(body): ApiJson<RunSyncRequest>,
) -> Result<Json<RunSyncResponse>, ApiError> {
    const FAILED: &str = "Failed to sync messages";
    let tracker = state.pipeline.tracker();
    let sync_id = match body.sync_id.filter(|id| !id.is_empty()) {
        Some(id) => tracker.get(&customer.id, &id).await.map_err(respond(FAILED))?.sync_id,
        None => tracker.begin(&customer.id).await.map_err(respond(FAILED))?.sync_id,
    };

    let report = state
        .pipeline
        .orchestrator()
        .run(&customer, &sync_id)
        .await
        .map_err(respond(FAILED))?;
    Ok(Json(RunSyncResponse {
        success: true,
        sync_id,
        total_messages: report.total_messages,
        total_chats: report.total_chats,
    }))
}

// --- Send and delivery callbacks ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub chat_type: Option<ChatType>,
    /// Set to retry a stored message instead of sending a new one.
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    #[serde(flatten)]
    pub receipt: SendReceipt,
}

/// POST /messages/send
pub async fn send_message(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
    ApiJson(body): ApiJson<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    const FAILED: &str = "Failed to send message";
    let delivery = state.pipeline.delivery();

    let receipt = if let Some(message_id) = body.message_id.filter(|id| !id.is_empty()) {
        delivery
            .retry(&customer, &message_id)
            .await
            .map_err(respond(FAILED))?
    } else {
        let (Some(content), Some(chat_id), Some(connection_id)) =
            (body.message, body.chat_id, body.integration_id)
        else {
            return Err(ApiError::bad_request(MISSING_FIELDS));
        };
        let request = SendRequest {
            content,
            chat_id,
            connection_id,
            recipient: body.recipient,
            chat_type: body.chat_type,
        };
        delivery
            .send(&customer, request)
            .await
            .map_err(respond(FAILED))?
    };

    Ok(Json(SendMessageResponse {
        success: true,
        receipt,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    #[serde(default)]
    pub flow_run_id: Option<String>,
    #[serde(default)]
    pub operation_handle: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub external_message_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub success: bool,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    pub already_settled: bool,
}

/// PUT /messages/send
pub async fn delivery_callback(
    State(state): State<GatewayState>,
    _webhook: Webhook,
    ApiJson(body): ApiJson<CallbackRequest>,
) -> Result<Json<CallbackResponse>, ApiError> {
    let callback = DeliveryCallback {
        operation_handle: body.operation_handle.or(body.flow_run_id),
        correlation_id: body.correlation_id,
        status: body
            .status
            .ok_or_else(|| ApiError::bad_request("status is required"))?,
        external_message_id: body.external_message_id,
        error: body.error,
    };
    let result = state
        .pipeline
        .delivery()
        .handle_callback(&callback)
        .await
        .map_err(respond("Failed to update message status"))?;

    Ok(Json(match result {
        CallbackResult::Settled { message_id, status } => CallbackResponse {
            success: true,
            message_id,
            status: Some(status),
            already_settled: false,
        },
        CallbackResult::AlreadySettled { message_id } => CallbackResponse {
            success: true,
            message_id,
            status: None,
            already_settled: true,
        },
    }))
}

// --- Inbound webhook ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveResponse {
    pub success: bool,
    #[serde(flatten)]
    pub receipt: InboundReceipt,
}

/// POST /messages/receive
pub async fn receive_message(
    State(state): State<GatewayState>,
    _webhook: Webhook,
    ApiJson(body): ApiJson<InboundMessage>,
) -> Result<Json<ReceiveResponse>, ApiError> {
    let receipt = state
        .pipeline
        .inbound()
        .receive(&body)
        .await
        .map_err(respond("Failed to receive message"))?;
    Ok(Json(ReceiveResponse {
        success: true,
        receipt,
    }))
}

// --- Listings ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListResponse {
    pub success: bool,
    pub chats: Vec<Conversation>,
    pub total: usize,
}

/// GET /chats
pub async fn list_chats(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
) -> Result<Json<ChatListResponse>, ApiError> {
    let chats = state
        .pipeline
        .storage()
        .list_conversations(&customer.id, CHAT_LIMIT)
        .await
        .map_err(respond("Failed to fetch chats"))?;
    Ok(Json(ChatListResponse {
        success: true,
        total: chats.len(),
        chats,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    pub success: bool,
    pub messages: Vec<Message>,
    pub total: usize,
}

/// GET /messages
pub async fn list_messages(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let messages = state
        .pipeline
        .storage()
        .list_messages(&customer.id, query.chat_id.as_deref(), MESSAGE_LIMIT)
        .await
        .map_err(respond("Failed to fetch messages"))?;
    Ok(Json(MessageListResponse {
        success: true,
        total: messages.len(),
        messages,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableChatsRequest {
    #[serde(default)]
    pub integration_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AvailableChatsResponse {
    pub success: bool,
    pub chats: Vec<NormalizedConversation>,
}

/// POST /chats/available
pub async fn available_chats(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
    ApiJson(body): ApiJson<AvailableChatsRequest>,
) -> Result<Json<AvailableChatsResponse>, ApiError> {
    let chats = state
        .pipeline
        .orchestrator()
        .available_conversations(&customer, body.integration_key.as_deref().unwrap_or_default())
        .await
        .map_err(respond("Failed to fetch available chats"))?;
    Ok(Json(AvailableChatsResponse {
        success: true,
        chats,
    }))
}

// --- Platform identities ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPlatformsResponse {
    pub success: bool,
    pub user_platforms: Vec<PlatformIdentity>,
    pub total: usize,
}

/// GET /user-platform
pub async fn list_user_platforms(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
) -> Result<Json<UserPlatformsResponse>, ApiError> {
    let user_platforms = state
        .pipeline
        .identities()
        .list(&customer)
        .await
        .map_err(respond("Failed to fetch user platforms"))?;
    Ok(Json(UserPlatformsResponse {
        success: true,
        total: user_platforms.len(),
        user_platforms,
    }))
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: IdentityRefreshReport,
}

/// POST /user-platform/fetch
pub async fn fetch_user_platforms(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
) -> Result<Json<RefreshResponse>, ApiError> {
    let report = state
        .pipeline
        .identities()
        .refresh(&customer)
        .await
        .map_err(respond("Failed to fetch user platform data"))?;
    Ok(Json(RefreshResponse {
        success: true,
        report,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportNewQuery {
    #[serde(default)]
    pub platform_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportNewResponse {
    pub success: bool,
    pub platform_id: String,
    #[serde(flatten)]
    pub setting: ImportNewSetting,
}

/// GET /integrations/import-new
pub async fn get_import_new(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
    Query(query): Query<ImportNewQuery>,
) -> Result<Json<ImportNewResponse>, ApiError> {
    let platform_id = query.platform_id.unwrap_or_default();
    let setting = state
        .pipeline
        .identities()
        .import_new(&customer, &platform_id)
        .await
        .map_err(respond("Failed to get import setting"))?;
    Ok(Json(ImportNewResponse {
        success: true,
        platform_id,
        setting,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetImportNewRequest {
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub import_new: Option<bool>,
}

/// POST /integrations/import-new
pub async fn set_import_new(
    State(state): State<GatewayState>,
    Caller(customer): Caller,
    ApiJson(body): ApiJson<SetImportNewRequest>,
) -> Result<Json<ImportNewResponse>, ApiError> {
    let platform_id = body.platform_id.unwrap_or_default();
    let import_new = body
        .import_new
        .ok_or_else(|| ApiError::bad_request("importNew must be a boolean"))?;
    state
        .pipeline
        .identities()
        .set_import_new(&customer, &platform_id, import_new)
        .await
        .map_err(respond("Failed to update import setting"))?;
    Ok(Json(ImportNewResponse {
        success: true,
        platform_id,
        setting: ImportNewSetting {
            import_new,
            exists: true,
        },
    }))
}
