// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Node and identifier types shared by every cache.
//!
//! Upstream systems hand out integer ids for some entity kinds and string ids
//! for others, sometimes both in the same feed. [`Identifier`] keeps the two
//! apart with value-based equality: `Int(1)` and `Str("1")` are different keys.
//!
//! # Example
//!
//! ```
//! use hierarchy_sync::{HierarchicalNode, Identifier};
//!
//! let node = HierarchicalNode::new("Berlin", 7, Some(Identifier::from(3)));
//! assert_eq!(node.id, Identifier::Int(7));
//! assert!(!node.is_root());
//!
//! // 0 is the upstream "no parent" sentinel
//! assert_eq!(Identifier::parent_from(Some(Identifier::Int(0))), None);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque entity identifier: integer or string.
///
/// Deserializes from either a JSON number or a JSON string without coercion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Int(i64),
    Str(String),
}

impl Identifier {
    /// True for the values upstream uses to mean "no parent".
    #[must_use]
    pub fn is_root_sentinel(&self) -> bool {
        match self {
            Self::Int(v) => *v == 0,
            Self::Str(s) => s.is_empty() || s == "0",
        }
    }

    /// Normalize a raw parent reference, mapping root sentinels to `None`.
    #[must_use]
    pub fn parent_from(raw: Option<Identifier>) -> Option<Identifier> {
        raw.filter(|id| !id.is_root_sentinel())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Identifier {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Identifier {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<&str> for Identifier {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Identifier {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// One entity in a hierarchy.
///
/// Nodes are immutable values; the cache replaces them wholesale on update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchicalNode {
    pub name: String,
    pub id: Identifier,
    pub parent_id: Option<Identifier>,
}

impl HierarchicalNode {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<Identifier>,
        parent_id: Option<Identifier>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            parent_id,
        }
    }

    #[must_use]
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Copy of this node detached from its parent.
    #[must_use]
    pub fn orphaned(&self) -> Self {
        Self {
            name: self.name.clone(),
            id: self.id.clone(),
            parent_id: None,
        }
    }
}
