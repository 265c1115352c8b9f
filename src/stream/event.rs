// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change events and their routing to caches.
//!
//! A MESSAGE body is one JSON object:
//!
//! ```json
//! {"id": 42, "parentId": 7, "name": "Lyon", "model": "location", "removed": false}
//! ```
//!
//! `parentId` of `0` (or absent) means root. `model` picks the cache. Without
//! `model` the id is looked up in every loaded cache and the event applies
//! only when exactly one cache holds it.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::loader::EntityKind;
use crate::manager::CacheManager;
use crate::metrics;
use crate::node::Identifier;

/// Decoded change notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChangeEvent {
    pub id: Identifier,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<Identifier>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl ChangeEvent {
    #[must_use]
    pub fn is_removal(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// Parent with root sentinels collapsed to `None`.
    #[must_use]
    pub fn parent(&self) -> Option<Identifier> {
        Identifier::parent_from(self.parent_id.clone())
    }

    fn model(&self) -> Option<&str> {
        self.model.as_deref().map(str::trim).filter(|m| !m.is_empty())
    }
}

/// Why an event was not applied. None of these end the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Valid JSON that is not a change event
    Malformed(String),
    MissingName,
    UnknownModel(String),
    /// The event names a kind whose cache never loaded
    KindUnavailable(EntityKind),
    /// No loaded cache holds the id
    NotFound,
    /// Several caches hold the id and the event has no `model`
    Ambiguous(Vec<EntityKind>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Upserted { kind: EntityKind, id: Identifier },
    Removed { kind: EntityKind, id: Identifier },
    Skipped(SkipReason),
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }
}

/// Applies change events to the manager's caches.
#[derive(Debug, Clone)]
pub struct EventRouter {
    manager: Arc<CacheManager>,
    unrouted_kind: Option<EntityKind>,
}

impl EventRouter {
    #[must_use]
    pub fn new(manager: Arc<CacheManager>) -> Self {
        Self {
            manager,
            unrouted_kind: None,
        }
    }

    /// Cache that takes upserts with no `model` whose id no cache holds yet.
    #[must_use]
    pub fn with_unrouted_kind(mut self, kind: Option<EntityKind>) -> Self {
        self.unrouted_kind = kind;
        self
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    /// Dispatch one MESSAGE body.
    ///
    /// Invalid JSON is a protocol error and ends the connection attempt.
    /// Anything else that cannot be applied is logged and skipped.
    pub fn dispatch_body(&self, body: &str) -> Result<DispatchOutcome, StreamError> {
        if body.trim().is_empty() {
            warn!("MESSAGE frame has empty body");
            return Ok(self.skipped("unknown", SkipReason::Malformed("empty body".into())));
        }
        let value: Value = serde_json::from_str(body)?;
        match serde_json::from_value::<ChangeEvent>(value) {
            Ok(event) => Ok(self.dispatch(&event)),
            Err(e) => {
                warn!(error = %e, body, "Incomplete change event");
                Ok(self.skipped("unknown", SkipReason::Malformed(e.to_string())))
            }
        }
    }

    pub fn dispatch(&self, event: &ChangeEvent) -> DispatchOutcome {
        let removal = event.is_removal();
        let name = event.name.as_deref().filter(|n| !n.is_empty());
        if !removal && name.is_none() {
            warn!(id = %event.id, "Upsert event without name");
            return self.skipped("unknown", SkipReason::MissingName);
        }

        let kind = match event.model() {
            Some(model) => match model.parse::<EntityKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    warn!(id = %event.id, model, "Event for unknown model");
                    return self.skipped("unknown", SkipReason::UnknownModel(model.to_string()));
                }
            },
            None => match self.route_unlabelled(event, removal) {
                Ok(kind) => kind,
                Err(reason) => return self.skipped("unknown", reason),
            },
        };

        let Some(cache) = self.manager.get_cache(kind) else {
            warn!(id = %event.id, kind = %kind, "Event for unavailable cache");
            return self.skipped(kind.as_str(), SkipReason::KindUnavailable(kind));
        };

        info!(
            id = %event.id,
            kind = %kind,
            name = name.unwrap_or_default(),
            parent = ?event.parent(),
            removed = removal,
            "Applying change event"
        );

        let outcome = if removal {
            if !cache.apply_remove(&event.id) {
                return self.skipped(kind.as_str(), SkipReason::NotFound);
            }
            DispatchOutcome::Removed {
                kind,
                id: event.id.clone(),
            }
        } else {
            cache.apply_upsert(event.id.clone(), name.unwrap_or_default(), event.parent());
            DispatchOutcome::Upserted {
                kind,
                id: event.id.clone(),
            }
        };

        metrics::record_event(kind.as_str(), if removal { "removed" } else { "upserted" });
        metrics::set_cache_nodes(kind.as_str(), cache.len());
        outcome
    }

    /// Pick a cache for an event without `model`.
    fn route_unlabelled(&self, event: &ChangeEvent, removal: bool) -> Result<EntityKind, SkipReason> {
        let holders: Vec<EntityKind> = self
            .manager
            .loaded_kinds()
            .into_iter()
            .filter(|k| {
                self.manager
                    .get_cache(*k)
                    .is_some_and(|c| c.contains(&event.id))
            })
            .collect();

        match holders.as_slice() {
            [kind] => Ok(*kind),
            [] => match self.unrouted_kind {
                Some(kind) if !removal => {
                    debug!(id = %event.id, kind = %kind, "Routing unlabelled event to default kind");
                    Ok(kind)
                }
                _ => {
                    warn!(id = %event.id, "Entity not found in any cache, may not be loaded yet");
                    Err(SkipReason::NotFound)
                }
            },
            _ => {
                warn!(id = %event.id, kinds = ?holders, "Entity id present in several caches, refusing to guess");
                Err(SkipReason::Ambiguous(holders))
            }
        }
    }

    fn skipped(&self, kind: &str, reason: SkipReason) -> DispatchOutcome {
        metrics::record_event(kind, "skipped");
        DispatchOutcome::Skipped(reason)
    }
}
