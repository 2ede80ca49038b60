// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics.

use metrics::{describe_counter, describe_histogram};

/// Register all Unibox metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!("unibox_sync_runs_total", "Sync runs by outcome");
    describe_counter!(
        "unibox_messages_imported_total",
        "Messages imported by sync runs"
    );
    describe_counter!(
        "unibox_conversations_imported_total",
        "Conversations upserted by sync runs"
    );
    describe_counter!(
        "unibox_deliveries_total",
        "Outbound deliveries settled by status"
    );
    describe_counter!(
        "unibox_inbound_messages_total",
        "Inbound webhook messages by outcome"
    );
    describe_histogram!("unibox_sync_duration_seconds", "Sync run duration in seconds");
}

/// Record a finished sync run and what it imported.
pub fn record_sync_run(outcome: &str, messages: u64, conversations: u64, seconds: f64) {
    metrics::counter!("unibox_sync_runs_total", "outcome" => outcome.to_string()).increment(1);
    metrics::counter!("unibox_messages_imported_total").increment(messages);
    metrics::counter!("unibox_conversations_imported_total").increment(conversations);
    metrics::histogram!("unibox_sync_duration_seconds").record(seconds);
}

/// Record an outbound delivery reaching `sent` or `failed`.
pub fn record_delivery(status: &str) {
    metrics::counter!("unibox_deliveries_total", "status" => status.to_string()).increment(1);
}

/// Record an inbound webhook message (`stored`, `duplicate`, `import_disabled`).
pub fn record_inbound(outcome: &str) {
    metrics::counter!("unibox_inbound_messages_total", "outcome" => outcome.to_string())
        .increment(1);
}
