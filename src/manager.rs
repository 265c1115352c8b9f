// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Owner of one [`HierarchicalCache`] per entity kind.
//!
//! The manager is constructed explicitly and handed to whoever needs it
//! (the change-feed router, request handlers). [`global`] is a thin shim for
//! call sites that cannot take it by injection.
//!
//! # Startup
//!
//! [`CacheManager::initialize`] loads every kind concurrently. A kind whose
//! loader fails stays absent rather than half-populated; the manager counts
//! as initialized when at least one kind loaded.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use hierarchy_sync::{CacheManager, EntityKind, SnapshotRecord};
//! use hierarchy_sync::loader::memory::StaticLoaderFactory;
//! use std::sync::Arc;
//!
//! let factory = StaticLoaderFactory::new()
//!     .with_page(EntityKind::Location, vec![SnapshotRecord::new(1, "HQ", None)]);
//! let manager = CacheManager::new(Arc::new(factory));
//!
//! assert!(manager.initialize("acme").await);
//! assert!(manager.get_cache(EntityKind::Location).is_some());
//! # }
//! ```

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::{CacheStats, HierarchicalCache};
use crate::error::LoadError;
use crate::loader::{EntityKind, LoaderFactory};
use crate::metrics;

/// Snapshot of the manager for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub initialized: bool,
    pub tenant: Option<String>,
    pub caches: BTreeMap<EntityKind, CacheStats>,
    pub unavailable: Vec<EntityKind>,
}

pub struct CacheManager {
    factory: Arc<dyn LoaderFactory>,
    caches: DashMap<EntityKind, Arc<HierarchicalCache>>,
    initialized: AtomicBool,
    tenant: Mutex<Option<String>>,
    /// Serializes concurrent `initialize` calls
    init_lock: tokio::sync::Mutex<()>,
}

impl CacheManager {
    #[must_use]
    pub fn new(factory: Arc<dyn LoaderFactory>) -> Self {
        Self {
            factory,
            caches: DashMap::new(),
            initialized: AtomicBool::new(false),
            tenant: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load every entity kind for `tenant` and build indices eagerly.
    ///
    /// Returns `true` if at least one kind is available. Once that holds,
    /// further calls are no-ops returning `true`.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self, tenant: &str) -> bool {
        if self.is_initialized() {
            return true;
        }
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return true;
        }

        info!("Loading hierarchy caches...");
        let results = join_all(EntityKind::ALL.iter().map(|&kind| self.load_kind(kind, tenant))).await;

        for (kind, result) in EntityKind::ALL.iter().zip(results) {
            match result {
                Ok(cache) => {
                    self.caches.insert(*kind, Arc::new(cache));
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Entity kind unavailable");
                }
            }
        }

        let loaded = self.caches.len();
        if loaded == 0 {
            warn!("No hierarchy cache could be loaded");
            return false;
        }

        *self.tenant.lock() = Some(tenant.to_string());
        self.initialized.store(true, Ordering::Release);
        info!(loaded, total = EntityKind::ALL.len(), "Hierarchy caches ready");
        true
    }

    async fn load_kind(&self, kind: EntityKind, tenant: &str) -> Result<HierarchicalCache, LoadError> {
        let start = Instant::now();
        let cache = HierarchicalCache::new(kind.as_str());
        let mut loader = self.factory.loader(kind, tenant);

        let result = async {
            loader.connect().await?;
            loader.load_into(&cache).await
        }
        .await;

        metrics::record_load(kind.as_str(), result.is_ok(), start.elapsed());
        let loaded = result?;

        cache.rebuild();
        metrics::set_cache_nodes(kind.as_str(), cache.len());
        info!(
            kind = %kind,
            index = %loader.index_name(),
            loaded,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cache loaded and indexed"
        );
        Ok(cache)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Tenant the caches were loaded for.
    #[must_use]
    pub fn tenant(&self) -> Option<String> {
        self.tenant.lock().clone()
    }

    /// The cache for `kind`, or `None` if that kind never loaded.
    #[must_use]
    pub fn get_cache(&self, kind: EntityKind) -> Option<Arc<HierarchicalCache>> {
        self.caches.get(&kind).map(|c| c.value().clone())
    }

    /// Kinds with a loaded cache, in declaration order.
    #[must_use]
    pub fn loaded_kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|k| self.caches.contains_key(k))
            .collect()
    }

    /// Insert or replace the cache for `kind`, bypassing the loaders.
    ///
    /// For embedders that populate caches themselves.
    pub fn install_cache(&self, kind: EntityKind, cache: HierarchicalCache) -> Arc<HierarchicalCache> {
        cache.rebuild();
        let cache = Arc::new(cache);
        self.caches.insert(kind, cache.clone());
        self.initialized.store(true, Ordering::Release);
        cache
    }

    #[must_use]
    pub fn statistics(&self) -> ManagerStats {
        let caches: BTreeMap<EntityKind, CacheStats> = self
            .caches
            .iter()
            .map(|entry| (*entry.key(), entry.value().stats()))
            .collect();
        let unavailable = EntityKind::ALL
            .into_iter()
            .filter(|k| !caches.contains_key(k))
            .collect();

        ManagerStats {
            initialized: self.is_initialized(),
            tenant: self.tenant(),
            caches,
            unavailable,
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("initialized", &self.is_initialized())
            .field("loaded", &self.loaded_kinds())
            .finish_non_exhaustive()
    }
}

/// Process-wide access to one injected [`CacheManager`].
///
/// The shim holds whatever the bootstrap installed; it never constructs a
/// manager itself. [`reset`](global::reset) exists for test isolation.
pub mod global {
    use super::CacheManager;
    use parking_lot::RwLock;
    use std::sync::Arc;

    static INSTANCE: RwLock<Option<Arc<CacheManager>>> = parking_lot::const_rwlock(None);

    /// Install `manager` as the shared instance, returning the previous one.
    pub fn install(manager: Arc<CacheManager>) -> Option<Arc<CacheManager>> {
        INSTANCE.write().replace(manager)
    }

    /// The installed instance, if any.
    #[must_use]
    pub fn instance() -> Option<Arc<CacheManager>> {
        INSTANCE.read().clone()
    }

    /// Drop the installed instance.
    pub fn reset() -> Option<Arc<CacheManager>> {
        INSTANCE.write().take()
    }
}
