// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory loaders serving fixed snapshot pages.
//!
//! Used by tests and demos, and by embedders that obtain the snapshot some
//! other way and only want the cache and the live feed.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

use super::{EntityKind, EntityLoader, LoaderFactory, SnapshotRecord};
use crate::cache::HierarchicalCache;
use crate::error::LoadError;

/// How a kind's loader should fail, for exercising partial availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Connect,
    Load,
}

#[derive(Default)]
struct Shared {
    pages: DashMap<EntityKind, Vec<Vec<SnapshotRecord>>>,
    failures: DashMap<EntityKind, FailAt>,
    loads: AtomicUsize,
}

/// Factory handing out [`StaticLoader`]s over shared pages.
#[derive(Clone, Default)]
pub struct StaticLoaderFactory {
    shared: Arc<Shared>,
}

impl StaticLoaderFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page of records for `kind`.
    #[must_use]
    pub fn with_page(self, kind: EntityKind, page: Vec<SnapshotRecord>) -> Self {
        self.shared.pages.entry(kind).or_default().push(page);
        self
    }

    /// Make every loader for `kind` fail at the given stage.
    #[must_use]
    pub fn failing(self, kind: EntityKind, at: FailAt) -> Self {
        self.shared.failures.insert(kind, at);
        self
    }

    /// Number of completed `load_into` calls across all loaders.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.shared.loads.load(Ordering::SeqCst)
    }
}

impl LoaderFactory for StaticLoaderFactory {
    fn loader(&self, kind: EntityKind, tenant: &str) -> Box<dyn EntityLoader> {
        Box::new(StaticLoader {
            kind,
            tenant: tenant.to_string(),
            shared: self.shared.clone(),
            connected: false,
        })
    }
}

/// Loader that replays the pages registered on its factory.
pub struct StaticLoader {
    kind: EntityKind,
    tenant: String,
    shared: Arc<Shared>,
    connected: bool,
}

impl StaticLoader {
    fn failure(&self) -> Option<FailAt> {
        self.shared.failures.get(&self.kind).map(|f| *f)
    }
}

#[async_trait]
impl EntityLoader for StaticLoader {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn index_name(&self) -> String {
        super::index_name(&self.tenant, self.kind)
    }

    async fn connect(&mut self) -> Result<(), LoadError> {
        if self.failure() == Some(FailAt::Connect) {
            return Err(LoadError::Connect(format!("{} store unreachable", self.kind)));
        }
        self.connected = true;
        Ok(())
    }

    async fn load_into(&mut self, cache: &HierarchicalCache) -> Result<usize, LoadError> {
        if !self.connected {
            return Err(LoadError::NotConnected(self.kind));
        }
        if self.failure() == Some(FailAt::Load) {
            return Err(LoadError::Load {
                index: self.index_name(),
                message: "snapshot read failed".to_string(),
            });
        }

        let pages = self
            .shared
            .pages
            .get(&self.kind)
            .map(|p| p.clone())
            .unwrap_or_default();

        let mut loaded = 0;
        for page in &pages {
            loaded += self.ingest_page(cache, page);
        }

        self.shared.loads.fetch_add(1, Ordering::SeqCst);
        info!(kind = %self.kind, index = %self.index_name(), loaded, "Loaded snapshot");
        Ok(loaded)
    }
}
