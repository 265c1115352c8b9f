// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk snapshot loading into caches.
//!
//! Loaders are the boundary to the external store that holds the authoritative
//! snapshot. They page through every record of one entity kind and call
//! [`HierarchicalCache::add_node`] for each. The store itself is pluggable via
//! [`LoaderFactory`]; [`memory::StaticLoaderFactory`] serves fixed pages.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::cache::HierarchicalCache;
use crate::error::LoadError;
use crate::node::Identifier;

/// Category of hierarchical data, each with its own cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Location,
    Department,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Location, EntityKind::Department];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Department => "department",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "location" => Ok(Self::Location),
            "department" => Ok(Self::Department),
            other => Err(format!("unknown entity kind '{}'", other)),
        }
    }
}

/// One record of a snapshot, already mapped to cache fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub id: Identifier,
    pub name: String,
    pub parent_id: Option<Identifier>,
}

impl SnapshotRecord {
    pub fn new(id: impl Into<Identifier>, name: impl Into<String>, parent_id: Option<Identifier>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: Identifier::parent_from(parent_id),
        }
    }

    /// Map a search-store document (`dbid`, `<kind>_name`, `<kind>_parentid`).
    ///
    /// Returns `None` when the id is missing or the name is empty.
    #[must_use]
    pub fn from_document(kind: EntityKind, source: &Value) -> Option<Self> {
        let id: Identifier = serde_json::from_value(source.get("dbid")?.clone()).ok()?;
        let name = source
            .get(format!("{}_name", kind.as_str()))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())?;
        let parent = source
            .get(format!("{}_parentid", kind.as_str()))
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<Identifier>(v.clone()).ok());

        Some(Self::new(id, name, parent))
    }
}

/// Bulk loader for one entity kind and tenant.
#[async_trait]
pub trait EntityLoader: Send {
    fn kind(&self) -> EntityKind;

    /// Name of the upstream index this loader reads.
    fn index_name(&self) -> String;

    /// Establish the connection to the store.
    async fn connect(&mut self) -> Result<(), LoadError>;

    /// Page through the snapshot into `cache`. Returns the number of nodes loaded.
    async fn load_into(&mut self, cache: &HierarchicalCache) -> Result<usize, LoadError>;

    /// Apply one page of records, skipping malformed ones.
    fn ingest_page(&self, cache: &HierarchicalCache, page: &[SnapshotRecord]) -> usize {
        let mut loaded = 0;
        for record in page {
            if record.name.is_empty() {
                warn!(kind = %self.kind(), id = %record.id, "Skipping record with empty name");
                continue;
            }
            cache.add_node(record.name.clone(), record.id.clone(), record.parent_id.clone());
            loaded += 1;
        }
        loaded
    }
}

/// Produces loaders bound to a kind and tenant.
pub trait LoaderFactory: Send + Sync {
    fn loader(&self, kind: EntityKind, tenant: &str) -> Box<dyn EntityLoader>;
}

/// `{tenant}_{kind}` index naming used by the upstream store.
#[must_use]
pub fn index_name(tenant: &str, kind: EntityKind) -> String {
    format!("{}_{}", tenant, kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_kind_parse_and_display() {
        assert_eq!("location".parse::<EntityKind>().unwrap(), EntityKind::Location);
        assert_eq!(" Department ".parse::<EntityKind>().unwrap(), EntityKind::Department);
        assert!("user".parse::<EntityKind>().is_err());
        assert_eq!(EntityKind::Location.to_string(), "location");
    }

    #[test]
    fn test_entity_kind_serde() {
        let kind: EntityKind = serde_json::from_str("\"department\"").unwrap();
        assert_eq!(kind, EntityKind::Department);
        assert_eq!(serde_json::to_string(&EntityKind::Location).unwrap(), "\"location\"");
    }

    #[test]
    fn test_record_from_document() {
        let doc = json!({"dbid": 12, "location_name": "Lyon", "location_parentid": 3});
        let record = SnapshotRecord::from_document(EntityKind::Location, &doc).unwrap();
        assert_eq!(record.id, Identifier::Int(12));
        assert_eq!(record.name, "Lyon");
        assert_eq!(record.parent_id, Some(Identifier::Int(3)));
    }

    #[test]
    fn test_record_zero_parent_is_root() {
        let doc = json!({"dbid": 1, "department_name": "Company", "department_parentid": 0});
        let record = SnapshotRecord::from_document(EntityKind::Department, &doc).unwrap();
        assert_eq!(record.parent_id, None);

        let doc = json!({"dbid": 2, "department_name": "Other", "department_parentid": null});
        let record = SnapshotRecord::from_document(EntityKind::Department, &doc).unwrap();
        assert_eq!(record.parent_id, None);
    }

    #[test]
    fn test_record_missing_fields_skipped() {
        let no_id = json!({"location_name": "Nowhere"});
        assert!(SnapshotRecord::from_document(EntityKind::Location, &no_id).is_none());

        let empty_name = json!({"dbid": 4, "location_name": ""});
        assert!(SnapshotRecord::from_document(EntityKind::Location, &empty_name).is_none());

        // Name field of the other kind does not count
        let wrong_kind = json!({"dbid": 4, "department_name": "HR"});
        assert!(SnapshotRecord::from_document(EntityKind::Location, &wrong_kind).is_none());
    }

    #[test]
    fn test_index_name() {
        assert_eq!(index_name("acme", EntityKind::Location), "acme_location");
    }
}
