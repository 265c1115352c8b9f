// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Root-to-node path computation.
//!
//! Paths are derived by walking `parent_id` links upward. The walk stops at a
//! root, at a dangling parent reference, or when it revisits a node. Upstream
//! updates can race with removals, so cycles are truncated rather than treated
//! as errors. A rebuild reports them once, however many paths they touch.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::metrics;
use crate::node::{HierarchicalNode, Identifier};

/// Separator between path segments.
pub const PATH_SEPARATOR: &str = " -> ";

#[derive(Debug, Default)]
pub(super) struct PathCache {
    by_id: HashMap<Identifier, String>,
    by_name: HashMap<Identifier, String>,
    valid: bool,
}

impl PathCache {
    #[inline]
    pub(super) fn is_valid(&self) -> bool {
        self.valid
    }

    #[inline]
    pub(super) fn invalidate(&mut self) {
        self.valid = false;
    }

    pub(super) fn purge(&mut self, id: &Identifier) {
        self.by_id.remove(id);
        self.by_name.remove(id);
    }

    pub(super) fn id_path(&self, id: &Identifier) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    pub(super) fn name_path(&self, id: &Identifier) -> Option<&str> {
        self.by_name.get(id).map(String::as_str)
    }

    /// Recompute every path from scratch.
    ///
    /// Returns how many paths were truncated at a cycle.
    pub(super) fn rebuild(&mut self, nodes: &HashMap<Identifier, HierarchicalNode>, kind: &str) -> usize {
        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut by_name = HashMap::with_capacity(nodes.len());
        let mut truncated = 0usize;

        for id in nodes.keys() {
            let (chain, cyclic) = ancestry(nodes, id);
            if cyclic {
                debug!(kind, id = %id, "Path truncated at cycle");
                truncated += 1;
            }
            by_id.insert(id.clone(), join_ids(&chain));
            by_name.insert(id.clone(), join_names(&chain));
        }

        if truncated > 0 {
            warn!(kind, paths = truncated, "Circular reference in hierarchy, truncating paths");
            metrics::record_cycle_detected(kind);
        }

        self.by_id = by_id;
        self.by_name = by_name;
        self.valid = true;
        truncated
    }
}

/// Nodes from the topmost reachable ancestor down to `id`, and whether the
/// walk stopped at a cycle.
///
/// Returns an empty vec if `id` is unknown. On a cycle the chain collected so
/// far is returned. Silent: callers decide how to report cycles.
pub(super) fn ancestry<'a>(
    nodes: &'a HashMap<Identifier, HierarchicalNode>,
    id: &Identifier,
) -> (Vec<&'a HierarchicalNode>, bool) {
    let mut chain = Vec::new();
    let mut visited: HashSet<&Identifier> = HashSet::new();
    let mut current = nodes.get(id);
    let mut cyclic = false;

    while let Some(node) = current {
        if !visited.insert(&node.id) {
            cyclic = true;
            break;
        }
        chain.push(node);
        current = node.parent_id.as_ref().and_then(|p| nodes.get(p));
    }

    chain.reverse();
    (chain, cyclic)
}

fn join_ids(chain: &[&HierarchicalNode]) -> String {
    chain
        .iter()
        .map(|n| n.id.to_string())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR)
}

fn join_names(chain: &[&HierarchicalNode]) -> String {
    chain
        .iter()
        .map(|n| n.name.as_str())
        .collect::<Vec<_>>()
        .join(PATH_SEPARATOR)
}
