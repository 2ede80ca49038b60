// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for the Unibox pipeline.
//!
//! Customer routes identify the caller through `x-auth-id`; broker webhooks
//! authenticate with a bearer token. All bodies are camelCase JSON.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

pub use auth::WebhookAuth;
pub use error::ApiError;
pub use server::{GatewayState, HealthState, ServerConfig, build_router, start_server};
