// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sorted name indices for prefix search.
//!
//! Two sorted `(name, id)` sequences are kept: one case-preserving, one
//! lowercased. Prefix queries binary-search the lowercased sequence for the
//! first candidate, then scan forward while the prefix still matches.

use crate::node::{HierarchicalNode, Identifier};

#[derive(Debug, Default)]
pub(super) struct NameIndex {
    sorted: Vec<(String, Identifier)>,
    sorted_lower: Vec<(String, Identifier)>,
    valid: bool,
}

impl NameIndex {
    #[inline]
    pub(super) fn is_valid(&self) -> bool {
        self.valid
    }

    #[inline]
    pub(super) fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Full rebuild from the current node set.
    pub(super) fn rebuild<'a>(&mut self, nodes: impl Iterator<Item = &'a HierarchicalNode>) {
        let (mut sorted, mut sorted_lower): (Vec<_>, Vec<_>) = nodes
            .map(|n| {
                (
                    (n.name.clone(), n.id.clone()),
                    (n.name.to_lowercase(), n.id.clone()),
                )
            })
            .unzip();

        sorted.sort_unstable();
        sorted_lower.sort_unstable();

        self.sorted = sorted;
        self.sorted_lower = sorted_lower;
        self.valid = true;
    }

    /// Ids whose lowercased name starts with `prefix_lower`, in name order.
    pub(super) fn prefix_matches<'a>(
        &'a self,
        prefix_lower: &'a str,
    ) -> impl Iterator<Item = &'a Identifier> + 'a {
        let start = self
            .sorted_lower
            .partition_point(|(name, _)| name.as_str() < prefix_lower);

        self.sorted_lower[start..]
            .iter()
            .take_while(move |(name, _)| name.starts_with(prefix_lower))
            .map(|(_, id)| id)
    }

    /// Case-preserving `(name, id)` pairs in sorted order.
    pub(super) fn sorted(&self) -> &[(String, Identifier)] {
        &self.sorted
    }
}
