// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronization and delivery pipeline for Unibox.
//!
//! [`Pipeline`] wires the broker connector and the storage backend into the
//! services the gateway exposes: sync status tracking, the sync
//! orchestrator, outbound delivery, inbound ingestion, and platform
//! identities.

pub mod backoff;
pub mod delivery;
pub mod identity;
pub mod inbound;
pub mod mentions;
pub mod normalize;
pub mod orchestrator;
pub mod status;
pub mod timestamp;

use std::sync::Arc;
use std::time::Duration;

use unibox_config::UniboxConfig;
use unibox_core::{ConnectorAdapter, StorageAdapter};

pub use backoff::Pacing;
pub use delivery::{CallbackResult, DeliveryCallback, DeliveryService, SendReceipt, SendRequest};
pub use identity::{IdentityRefreshReport, IdentityService, ImportNewSetting};
pub use inbound::{InboundMessage, InboundReceipt, InboundReceiver};
pub use mentions::{MentionPattern, MentionRegistry, MentionResolver};
pub use orchestrator::{SyncOrchestrator, SyncReport};
pub use status::SyncTracker;

/// Every service of the pipeline, sharing one connector and one store.
pub struct Pipeline {
    storage: Arc<dyn StorageAdapter>,
    connector: Arc<dyn ConnectorAdapter>,
    tracker: SyncTracker,
    orchestrator: SyncOrchestrator,
    delivery: DeliveryService,
    inbound: InboundReceiver,
    identities: IdentityService,
}

impl Pipeline {
    pub fn new(
        connector: Arc<dyn ConnectorAdapter>,
        storage: Arc<dyn StorageAdapter>,
        config: &UniboxConfig,
    ) -> Self {
        Self::with_pacing(connector, storage, config, Pacing::from_config(&config.sync))
    }

    /// Builds the pipeline with explicit pacing instead of the configured delays.
    pub fn with_pacing(
        connector: Arc<dyn ConnectorAdapter>,
        storage: Arc<dyn StorageAdapter>,
        config: &UniboxConfig,
        pacing: Pacing,
    ) -> Self {
        let tracker = SyncTracker::new(
            Arc::clone(&storage),
            Duration::from_secs(config.sync.stale_after_secs),
        );
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&connector),
            Arc::clone(&storage),
            tracker.clone(),
            MentionResolver::default(),
            pacing,
        );
        let delivery = DeliveryService::new(
            Arc::clone(&connector),
            Arc::clone(&storage),
            config.delivery.max_message_length,
            pacing.rate_limit_backoff,
        );
        let inbound = InboundReceiver::new(Arc::clone(&connector), Arc::clone(&storage), pacing);
        let identities = IdentityService::new(
            Arc::clone(&connector),
            Arc::clone(&storage),
            pacing.rate_limit_backoff,
        );

        Self {
            storage,
            connector,
            tracker,
            orchestrator,
            delivery,
            inbound,
            identities,
        }
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn connector(&self) -> &Arc<dyn ConnectorAdapter> {
        &self.connector
    }

    pub fn tracker(&self) -> &SyncTracker {
        &self.tracker
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn delivery(&self) -> &DeliveryService {
        &self.delivery
    }

    pub fn inbound(&self) -> &InboundReceiver {
        &self.inbound
    }

    pub fn identities(&self) -> &IdentityService {
        &self.identities
    }
}
