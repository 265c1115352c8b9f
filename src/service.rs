// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Process bootstrap: load caches, start the feed, wait for it.

use std::sync::Arc;
use tracing::{error, info};

use crate::config::HierarchySyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::loader::LoaderFactory;
use crate::manager::CacheManager;
use crate::reconnect::{ConnectionState, ControllerHandle, ReconnectionController};
use crate::resilience::retry::RetryConfig;
use crate::stream::{EventRouter, HttpSessionConnector, SessionConnector};

/// Running caches plus their change feed.
#[derive(Debug)]
pub struct HierarchySync {
    manager: Arc<CacheManager>,
    feed: ControllerHandle,
}

impl HierarchySync {
    /// Start against the configured upstream over HTTP and WebSocket.
    pub async fn start(
        config: &HierarchySyncConfig,
        loaders: Arc<dyn LoaderFactory>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let connector = HttpSessionConnector::new(config.stream.clone())
            .map_err(|e| SyncError::Config(e.to_string()))?;
        Self::start_with(config, loaders, Arc::new(connector), None).await
    }

    /// Start with an explicit connector and optional retry override.
    ///
    /// Fails when no cache loads, when the feed gives up, or when it is not
    /// streaming within `connection_timeout_secs`. The feed is stopped on
    /// every failure path.
    #[tracing::instrument(skip_all, fields(tenant = %config.tenant_id))]
    pub async fn start_with(
        config: &HierarchySyncConfig,
        loaders: Arc<dyn LoaderFactory>,
        connector: Arc<dyn SessionConnector>,
        retry: Option<RetryConfig>,
    ) -> SyncResult<Self> {
        let manager = Arc::new(CacheManager::new(loaders));
        if !manager.initialize(&config.tenant_id).await {
            return Err(SyncError::NoCachesLoaded);
        }
        info!(stats = ?manager.statistics(), "Caches initialized");

        let router = EventRouter::new(manager.clone()).with_unrouted_kind(config.unrouted_kind);
        let feed = ReconnectionController::spawn(connector, router, config.stream.clone(), retry);

        if let Err(e) = feed.wait_until_established(config.stream.connection_timeout()).await {
            error!(error = %e, "Aborting startup, change feed unavailable");
            feed.shutdown().await;
            return Err(e);
        }

        info!("Hierarchy sync ready");
        Ok(Self { manager, feed })
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    #[must_use]
    pub fn feed(&self) -> &ControllerHandle {
        &self.feed
    }

    /// Stop the change feed. Caches stay readable through the manager.
    pub async fn shutdown(self) -> ConnectionState {
        info!("Shutting down hierarchy sync");
        self.feed.shutdown().await
    }
}
