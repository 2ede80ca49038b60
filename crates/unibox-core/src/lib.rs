// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Unibox message aggregator.
//!
//! This crate provides the trait definitions, error types, and domain types
//! used throughout the Unibox workspace. The broker connector and the storage
//! backend implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::UniboxError;
pub use types::{
    AdapterType, ChatType, Connection, Conversation, Customer, DeliveryOutcome, DeliveryStatus,
    HealthStatus, Message, MessageType, OutgoingPayload, Page, PlatformIdentity, RawRecord,
    SubmitOutcome, SyncState, SyncStatus, SyncStatusUpdate,
};

pub use traits::{ConnectorAdapter, PluginAdapter, StorageAdapter};
