// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Indexed hierarchical entity cache.
//!
//! One [`HierarchicalCache`] holds every node of one entity kind plus the
//! structures derived from them:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ nodes:     Identifier → HierarchicalNode   (primary)     │
//! │ children:  parent id  → [child id]         (insert order)│
//! │ names:     lowercase  → [id]               (duplicates)  │
//! ├──────────────────────────────────────────────────────────┤
//! │ index:     sorted (name, id), sorted (lower, id)  [lazy] │
//! │ paths:     id → "1 -> 2 -> 3", id → "A -> B -> C" [lazy] │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation invalidates the lazy structures; the next read that needs
//! them rebuilds them in full. All of it sits behind one `RwLock`, so a query
//! sees either the state before a mutation or after it, never in between.
//!
//! # Example
//!
//! ```
//! use hierarchy_sync::{HierarchicalCache, Identifier};
//!
//! let cache = HierarchicalCache::new("location");
//! cache.add_node("Root", 1, None);
//! cache.add_node("Child", 2, Some(Identifier::Int(1)));
//! cache.add_node("Grandchild", 3, Some(Identifier::Int(2)));
//!
//! assert_eq!(cache.get_full_path(&Identifier::Int(3)), "1 -> 2 -> 3");
//! assert_eq!(
//!     cache.get_full_path_by_name(3).into_paths(),
//!     vec!["Root -> Child -> Grandchild".to_string()]
//! );
//! ```

mod index;
mod paths;

pub use paths::PATH_SEPARATOR;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::metrics;
use crate::node::{HierarchicalNode, Identifier};
use index::NameIndex;
use paths::PathCache;

/// Result of a path lookup by id-or-name.
///
/// Names are not unique, so a name lookup can resolve to several nodes. Each
/// match gets its own path; nothing is picked arbitrarily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    NotFound,
    One(String),
    Many(Vec<String>),
}

impl PathMatch {
    #[must_use]
    pub fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    /// Flatten into a list of paths (empty when nothing matched).
    #[must_use]
    pub fn into_paths(self) -> Vec<String> {
        match self {
            Self::NotFound => Vec::new(),
            Self::One(path) => vec![path],
            Self::Many(paths) => paths,
        }
    }
}

/// Point-in-time statistics for one cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entity_kind: String,
    pub total_nodes: usize,
    pub root_nodes: usize,
    pub max_depth: usize,
    pub avg_depth: f64,
    pub indices_built: bool,
    pub paths_computed: bool,
}

#[derive(Debug, Default)]
struct CacheState {
    nodes: HashMap<Identifier, HierarchicalNode>,
    children: HashMap<Identifier, Vec<Identifier>>,
    names: HashMap<String, Vec<Identifier>>,
    index: NameIndex,
    paths: PathCache,
}

impl CacheState {
    fn invalidate(&mut self) {
        self.index.invalidate();
        self.paths.invalidate();
    }

    fn is_fresh(&self, need_paths: bool) -> bool {
        self.index.is_valid() && (!need_paths || self.paths.is_valid())
    }

    fn refresh(&mut self, need_paths: bool, kind: &str) {
        if self.is_fresh(need_paths) {
            return;
        }
        let _timer = metrics::RebuildTimer::new(kind);
        if !self.index.is_valid() {
            self.index.rebuild(self.nodes.values());
        }
        if need_paths && !self.paths.is_valid() {
            self.paths.rebuild(&self.nodes, kind);
        }
    }

    fn link_child(&mut self, parent: &Identifier, child: &Identifier) {
        self.children
            .entry(parent.clone())
            .or_default()
            .push(child.clone());
    }

    fn unlink_child(&mut self, parent: &Identifier, child: &Identifier, kind: &str) {
        let Some(siblings) = self.children.get_mut(parent) else {
            return;
        };
        match siblings.iter().position(|c| c == child) {
            Some(pos) => {
                siblings.remove(pos);
            }
            None => warn!(kind, id = %child, parent = %parent, "Node missing from parent's children list"),
        }
        if siblings.is_empty() {
            self.children.remove(parent);
        }
    }

    fn link_name(&mut self, name: &str, id: &Identifier) {
        self.names
            .entry(name.to_lowercase())
            .or_default()
            .push(id.clone());
    }

    fn unlink_name(&mut self, name: &str, id: &Identifier, kind: &str) {
        let key = name.to_lowercase();
        let Some(ids) = self.names.get_mut(&key) else {
            return;
        };
        match ids.iter().position(|i| i == id) {
            Some(pos) => {
                ids.remove(pos);
            }
            None => warn!(kind, id = %id, name, "Node missing from name index"),
        }
        if ids.is_empty() {
            self.names.remove(&key);
        }
    }

    fn upsert(&mut self, id: Identifier, name: String, parent_id: Option<Identifier>, kind: &str) {
        match self.nodes.get(&id).cloned() {
            None => {
                if let Some(ref parent) = parent_id {
                    self.link_child(parent, &id);
                }
                self.link_name(&name, &id);
                self.nodes.insert(id.clone(), HierarchicalNode { name, id, parent_id });
            }
            Some(old) => {
                self.unlink_name(&old.name, &id, kind);
                if let Some(ref old_parent) = old.parent_id {
                    self.unlink_child(old_parent, &id, kind);
                }
                if let Some(ref parent) = parent_id {
                    self.link_child(parent, &id);
                }
                self.link_name(&name, &id);
                debug!(
                    kind,
                    id = %id,
                    old_name = %old.name,
                    new_name = %name,
                    old_parent = ?old.parent_id,
                    new_parent = ?parent_id,
                    "Updated node"
                );
                self.nodes.insert(id.clone(), HierarchicalNode { name, id, parent_id });
            }
        }
        self.invalidate();
    }

    fn remove(&mut self, id: &Identifier, kind: &str) -> bool {
        let Some(node) = self.nodes.get(id).cloned() else {
            warn!(kind, id = %id, "Cannot remove node: not in cache");
            return false;
        };

        if let Some(child_ids) = self.children.remove(id) {
            for child_id in &child_ids {
                if let Some(child) = self.nodes.get_mut(child_id) {
                    child.parent_id = None;
                }
            }
            warn!(kind, id = %id, orphaned = child_ids.len(), "Orphaned children of removed node");
        }

        if let Some(ref parent) = node.parent_id {
            self.unlink_child(parent, id, kind);
        }
        self.unlink_name(&node.name, id, kind);
        self.paths.purge(id);
        self.nodes.remove(id);
        self.invalidate();

        debug!(kind, id = %id, name = %node.name, "Removed node");
        true
    }

    fn resolve(&self, ids: &[Identifier]) -> Vec<HierarchicalNode> {
        ids.iter().filter_map(|id| self.nodes.get(id).cloned()).collect()
    }
}

/// Thread-safe indexed tree of one entity kind.
///
/// Mutations take the write lock. Queries take the read lock; if a query finds
/// the derived structures stale it re-acquires the lock exclusively, rebuilds,
/// and downgrades back to shared access before reading.
pub struct HierarchicalCache {
    kind: String,
    state: RwLock<CacheState>,
}

impl HierarchicalCache {
    /// Create an empty cache for the given entity kind (used in logs and stats).
    #[must_use]
    pub fn new(entity_kind: impl Into<String>) -> Self {
        Self {
            kind: entity_kind.into(),
            state: RwLock::new(CacheState::default()),
        }
    }

    #[must_use]
    pub fn entity_kind(&self) -> &str {
        &self.kind
    }

    /// Insert a node. An existing id is updated in place (upsert).
    pub fn add_node(
        &self,
        name: impl Into<String>,
        id: impl Into<Identifier>,
        parent_id: Option<Identifier>,
    ) {
        self.state
            .write()
            .upsert(id.into(), name.into(), parent_id, &self.kind);
    }

    /// Update a node, adding it if the id is unknown. Always returns `true`.
    pub fn update_node(
        &self,
        id: impl Into<Identifier>,
        name: impl Into<String>,
        parent_id: Option<Identifier>,
    ) -> bool {
        self.state
            .write()
            .upsert(id.into(), name.into(), parent_id, &self.kind);
        true
    }

    /// Remove a node, orphaning its direct children. Returns `false` if absent.
    pub fn remove_node(&self, id: &Identifier) -> bool {
        self.state.write().remove(id, &self.kind)
    }

    /// Upsert and rebuild indices and paths inside one exclusive section.
    pub fn apply_upsert(
        &self,
        id: impl Into<Identifier>,
        name: impl Into<String>,
        parent_id: Option<Identifier>,
    ) {
        let mut state = self.state.write();
        state.upsert(id.into(), name.into(), parent_id, &self.kind);
        state.refresh(true, &self.kind);
    }

    /// Remove and rebuild indices and paths inside one exclusive section.
    pub fn apply_remove(&self, id: &Identifier) -> bool {
        let mut state = self.state.write();
        let removed = state.remove(id, &self.kind);
        if removed {
            state.refresh(true, &self.kind);
        }
        removed
    }

    /// Eagerly build indices and paths so the next queries do no work.
    pub fn rebuild(&self) {
        self.state.write().refresh(true, &self.kind);
    }

    fn read_fresh(&self, need_paths: bool) -> RwLockReadGuard<'_, CacheState> {
        {
            let state = self.state.read();
            if state.is_fresh(need_paths) {
                return state;
            }
        }
        let mut state = self.state.write();
        // Another reader may have rebuilt while we waited
        if !state.is_fresh(need_paths) {
            state.refresh(need_paths, &self.kind);
        }
        RwLockWriteGuard::downgrade(state)
    }

    #[must_use]
    pub fn get(&self, id: &Identifier) -> Option<HierarchicalNode> {
        self.state.read().nodes.get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &Identifier) -> bool {
        self.state.read().nodes.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().nodes.is_empty()
    }

    /// All nodes with this name, compared case-insensitively.
    #[must_use]
    pub fn search_by_name_exact(&self, name: &str) -> Vec<HierarchicalNode> {
        let state = self.state.read();
        state
            .names
            .get(&name.to_lowercase())
            .map(|ids| state.resolve(ids))
            .unwrap_or_default()
    }

    /// All nodes whose name starts with `prefix`, compared case-insensitively.
    #[must_use]
    pub fn search_by_name_prefix(&self, prefix: &str) -> Vec<HierarchicalNode> {
        let prefix_lower = prefix.to_lowercase();
        let state = self.read_fresh(false);
        state
            .index
            .prefix_matches(&prefix_lower)
            .filter_map(|id| state.nodes.get(id).cloned())
            .collect()
    }

    /// Case-preserving `(name, id)` pairs sorted by name.
    #[must_use]
    pub fn sorted_names(&self) -> Vec<(String, Identifier)> {
        self.read_fresh(false).index.sorted().to_vec()
    }

    /// Root-to-node path of ids, or an empty string for an unknown id.
    #[must_use]
    pub fn get_full_path(&self, id: &Identifier) -> String {
        self.read_fresh(true)
            .paths
            .id_path(id)
            .map(str::to_string)
            .unwrap_or_default()
    }

    /// Root-to-node path of names, looked up by id first and then by name.
    #[must_use]
    pub fn get_full_path_by_name(&self, identifier: impl Into<Identifier>) -> PathMatch {
        let identifier = identifier.into();
        let state = self.read_fresh(true);

        if state.nodes.contains_key(&identifier) {
            return state
                .paths
                .name_path(&identifier)
                .map(|p| PathMatch::One(p.to_string()))
                .unwrap_or(PathMatch::NotFound);
        }

        let key = identifier.to_string().to_lowercase();
        let Some(ids) = state.names.get(&key) else {
            return PathMatch::NotFound;
        };

        let mut paths: Vec<String> = ids
            .iter()
            .filter_map(|id| state.paths.name_path(id).map(str::to_string))
            .collect();

        match paths.len() {
            0 => PathMatch::NotFound,
            1 => PathMatch::One(paths.remove(0)),
            _ => PathMatch::Many(paths),
        }
    }

    /// Direct children in insertion order.
    #[must_use]
    pub fn get_children(&self, id: &Identifier) -> Vec<HierarchicalNode> {
        let state = self.state.read();
        state
            .children
            .get(id)
            .map(|ids| state.resolve(ids))
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        let total_nodes = state.nodes.len();
        let root_nodes = state.nodes.values().filter(|n| n.is_root()).count();

        let depths: Vec<usize> = state
            .nodes
            .keys()
            .map(|id| paths::ancestry(&state.nodes, id).0.len().saturating_sub(1))
            .collect();
        let max_depth = depths.iter().copied().max().unwrap_or(0);
        let avg_depth = if depths.is_empty() {
            0.0
        } else {
            depths.iter().sum::<usize>() as f64 / depths.len() as f64
        };

        CacheStats {
            entity_kind: self.kind.clone(),
            total_nodes,
            root_nodes,
            max_depth,
            avg_depth,
            indices_built: state.index.is_valid(),
            paths_computed: state.paths.is_valid(),
        }
    }
}

impl std::fmt::Debug for HierarchicalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchicalCache")
            .field("kind", &self.kind)
            .field("nodes", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn int(v: i64) -> Identifier {
        Identifier::Int(v)
    }

    fn three_levels() -> HierarchicalCache {
        let cache = HierarchicalCache::new("location");
        cache.add_node("Root", 1, None);
        cache.add_node("Child", 2, Some(int(1)));
        cache.add_node("Grandchild", 3, Some(int(2)));
        cache
    }

    #[test]
    fn test_new_cache_is_empty() {
        let cache = HierarchicalCache::new("department");
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.entity_kind(), "department");
        assert_eq!(cache.get_full_path(&int(1)), "");
        assert_eq!(cache.get_full_path_by_name("x"), PathMatch::NotFound);
    }

    #[test]
    fn test_full_paths() {
        let cache = three_levels();
        assert_eq!(cache.get_full_path(&int(3)), "1 -> 2 -> 3");
        assert_eq!(
            cache.get_full_path_by_name(3),
            PathMatch::One("Root -> Child -> Grandchild".into())
        );
        assert_eq!(
            cache.get_full_path_by_name("child"),
            PathMatch::One("Root -> Child".into())
        );
        assert_eq!(cache.get_full_path(&int(42)), "");
    }

    #[test]
    fn test_duplicate_names_return_every_path() {
        let cache = HierarchicalCache::new("department");
        cache.add_node("Company", 1, None);
        cache.add_node("HR", 2, Some(int(1)));
        cache.add_node("HR", 3, Some(int(1)));

        let paths = cache.get_full_path_by_name("HR").into_paths();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.contains("-> HR")));

        assert_eq!(cache.search_by_name_exact("hr").len(), 2);
    }

    #[test]
    fn test_prefix_search() {
        let cache = HierarchicalCache::new("location");
        cache.add_node("California", 1, None);
        cache.add_node("Canada", 2, None);
        cache.add_node("Texas", 3, None);

        let mut ids: Vec<_> = cache
            .search_by_name_prefix("Ca")
            .into_iter()
            .map(|n| n.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![int(1), int(2)]);
        assert!(cache.search_by_name_prefix("Zz").is_empty());
    }

    #[test]
    fn test_prefix_search_sees_mutations() {
        let cache = HierarchicalCache::new("location");
        cache.add_node("Canada", 1, None);
        assert_eq!(cache.search_by_name_prefix("can").len(), 1);

        cache.update_node(1, "Mexico", None);
        assert!(cache.search_by_name_prefix("can").is_empty());
        assert_eq!(cache.search_by_name_prefix("mex").len(), 1);
    }

    #[test]
    fn test_add_existing_id_is_upsert() {
        let cache = HierarchicalCache::new("location");
        cache.add_node("Root", 1, None);
        cache.add_node("Other", 9, None);
        cache.add_node("Leaf", 2, Some(int(1)));
        cache.add_node("Leaf Renamed", 2, Some(int(9)));

        assert_eq!(cache.len(), 3);
        assert!(cache.get_children(&int(1)).is_empty());
        assert_eq!(cache.get_children(&int(9)).len(), 1);
        assert!(cache.search_by_name_exact("leaf").is_empty());
        assert_eq!(cache.search_by_name_exact("leaf renamed").len(), 1);
    }

    #[test]
    fn test_update_unknown_id_adds() {
        let updated = HierarchicalCache::new("location");
        assert!(updated.update_node(5, "New", None));

        let added = HierarchicalCache::new("location");
        added.add_node("New", 5, None);

        assert_eq!(updated.get(&int(5)), added.get(&int(5)));
        assert_eq!(updated.stats().total_nodes, added.stats().total_nodes);
    }

    #[test]
    fn test_update_moves_between_parents() {
        let cache = three_levels();
        cache.add_node("Other Root", 10, None);
        cache.update_node(3, "Grandchild", Some(int(10)));

        assert!(cache.get_children(&int(2)).is_empty());
        assert_eq!(cache.get_children(&int(10))[0].id, int(3));
        assert_eq!(cache.get_full_path(&int(3)), "10 -> 3");
    }

    #[test]
    fn test_update_keeps_own_children() {
        let cache = three_levels();
        cache.update_node(2, "Renamed", Some(int(1)));
        assert_eq!(cache.get_children(&int(2)).len(), 1);
        assert_eq!(
            cache.get_full_path_by_name(3),
            PathMatch::One("Root -> Renamed -> Grandchild".into())
        );
    }

    #[test]
    fn test_remove_orphans_children() {
        let cache = three_levels();
        cache.add_node("Sibling", 4, Some(int(2)));

        assert!(cache.remove_node(&int(2)));
        assert!(!cache.contains(&int(2)));

        for id in [int(3), int(4)] {
            let child = cache.get(&id).expect("orphan must survive");
            assert_eq!(child.parent_id, None);
            assert_eq!(cache.get_full_path(&id), id.to_string());
        }
        assert!(cache.get_children(&int(1)).is_empty());
        assert!(cache.get_children(&int(2)).is_empty());
        assert!(cache.search_by_name_exact("child").is_empty());
    }

    #[test]
    fn test_remove_unknown_returns_false() {
        let cache = three_levels();
        assert!(!cache.remove_node(&int(77)));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_children_in_insertion_order() {
        let cache = HierarchicalCache::new("location");
        cache.add_node("Root", 1, None);
        for (id, name) in [(5, "e"), (3, "c"), (4, "d")] {
            cache.add_node(name, id, Some(int(1)));
        }
        let ids: Vec<_> = cache.get_children(&int(1)).into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![int(5), int(3), int(4)]);
    }

    #[test]
    fn test_cycle_terminates() {
        let cache = HierarchicalCache::new("location");
        cache.add_node("A", "a", Some(Identifier::from("b")));
        cache.add_node("B", "b", Some(Identifier::from("a")));

        let path = cache.get_full_path(&Identifier::from("a"));
        assert_eq!(path.split(PATH_SEPARATOR).count(), 2);
        assert_eq!(cache.stats().max_depth, 1);
    }

    #[test]
    fn test_cycle_counted_once_per_rebuild() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        ::metrics::with_local_recorder(&recorder, || {
            let cache = HierarchicalCache::new("location");
            cache.add_node("A", 1, Some(int(2)));
            cache.add_node("B", 2, Some(int(1)));
            cache.add_node("C", 3, Some(int(2)));

            cache.rebuild();
            for _ in 0..5 {
                let _ = cache.get_full_path(&int(3));
                let _ = cache.stats();
            }
        });

        let cycles: u64 = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter(|(key, ..)| key.key().name() == "hierarchy_sync_cycles_detected_total")
            .map(|(.., value)| match value {
                DebugValue::Counter(c) => c,
                _ => 0,
            })
            .sum();
        assert_eq!(cycles, 1);
    }

    #[test]
    fn test_string_ids() {
        let cache = HierarchicalCache::new("department");
        cache.add_node("Engineering", "eng", None);
        cache.add_node("Platform", "plat", Some(Identifier::from("eng")));
        assert_eq!(cache.get_full_path(&Identifier::from("plat")), "eng -> plat");
        // Int(1) and Str("1") do not collide
        cache.add_node("Numeric", 1, None);
        cache.add_node("Textual", "1", None);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_stats_and_lazy_flags() {
        let cache = three_levels();
        cache.add_node("Second Root", 20, None);

        let stats = cache.stats();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.root_nodes, 2);
        assert_eq!(stats.max_depth, 2);
        assert!((stats.avg_depth - 0.75).abs() < f64::EPSILON);
        assert!(!stats.indices_built);
        assert!(!stats.paths_computed);

        cache.rebuild();
        let stats = cache.stats();
        assert!(stats.indices_built);
        assert!(stats.paths_computed);

        cache.remove_node(&int(20));
        assert!(!cache.stats().paths_computed);
    }

    #[test]
    fn test_apply_leaves_cache_fresh() {
        let cache = three_levels();
        cache.rebuild();

        cache.apply_upsert(4, "New Leaf", Some(int(3)));
        let stats = cache.stats();
        assert!(stats.indices_built && stats.paths_computed);
        assert_eq!(cache.get_full_path(&int(4)), "1 -> 2 -> 3 -> 4");

        assert!(cache.apply_remove(&int(3)));
        let stats = cache.stats();
        assert!(stats.indices_built && stats.paths_computed);
        assert_eq!(cache.get_full_path(&int(4)), "4");
        assert!(!cache.apply_remove(&int(3)));
    }

    #[test]
    fn test_sorted_names() {
        let cache = HierarchicalCache::new("location");
        cache.add_node("beta", 2, None);
        cache.add_node("Alpha", 1, None);
        let names: Vec<_> = cache.sorted_names().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Alpha", "beta"]);
    }

    #[test]
    fn test_concurrent_reads_never_see_torn_state() {
        let cache = Arc::new(HierarchicalCache::new("location"));
        cache.add_node("Root", 1_000_000_i64, None);
        cache.rebuild();

        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0..500_i64 {
                    cache.apply_upsert(i, format!("Node {}", i), Some(int(1_000_000)));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..500 {
                        let found = cache.search_by_name_prefix("node").len();
                        // Inserts only grow the set, so a torn read would show as a regression
                        assert!(found >= last);
                        last = found;
                        for node in cache.get_children(&int(1_000_000)) {
                            assert!(!cache.get_full_path(&node.id).is_empty());
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cache.search_by_name_prefix("node").len(), 500);
    }
}
