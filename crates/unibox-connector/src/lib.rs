// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration broker connector for the Unibox message aggregator.
//!
//! Implements [`unibox_core::ConnectorAdapter`] over the broker's REST API:
//! connection listing, paginated chat and message actions, outgoing message
//! submission, and user mappings for mention rendering.

pub mod client;
pub mod token;
pub mod types;

pub use client::BrokerConnector;
pub use token::TokenIssuer;
