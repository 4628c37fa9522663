//! The module dependency graph: canonical ids, forward/reverse indices,
//! memoized transitive closures, and the dynamic-dependency overlay.

pub mod builder;
pub mod closure;
pub mod resolve;
pub mod serialize;

pub use builder::GraphBuilder;

use crate::core::{dotted_ancestors, FileKind, ModuleScope};
use crate::errors::Error;
use closure::ClosureCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

pub(crate) type NodeId = u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Node {
    pub(crate) id: String,
    pub(crate) scope: ModuleScope,
    pub(crate) kind: FileKind,
    /// Authoritative file: the `.pyi` when one shadows the implementation.
    pub(crate) path: Option<PathBuf>,
    /// Shadowed implementation file, when `path` is an interface file.
    pub(crate) impl_path: Option<PathBuf>,
    /// Whether the module is a package (`__init__` file).
    pub(crate) package: bool,
    /// Resolved direct dependencies (sorted, deduplicated).
    pub(crate) deps: Vec<NodeId>,
    /// Extra direct deps contributed by a shadowed implementation file.
    /// They participate in the reverse index only.
    pub(crate) impl_deps: Vec<NodeId>,
}

/// Extra dependencies installed at a leaf module, visible to modules of one
/// local scope whose closure contains the leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OverlayEntry {
    pub(crate) leaf: NodeId,
    pub(crate) scope: String,
    pub(crate) extras: Vec<NodeId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct GraphData {
    pub(crate) nodes: Vec<Node>,
    pub(crate) global_index: HashMap<String, NodeId>,
    /// local scope key (source-root path) → id → node
    pub(crate) local_index: BTreeMap<String, HashMap<String, NodeId>>,
    /// local scope key → module prefix of the owning source root
    pub(crate) local_prefixes: BTreeMap<String, String>,
    /// every known file, interface and implementation alike
    pub(crate) file_index: HashMap<PathBuf, NodeId>,
    /// only files whose imports are authoritative for `depends_on`
    pub(crate) dep_file_index: HashMap<PathBuf, NodeId>,
    /// transpose of the direct-dependency relation (deps ∪ impl_deps)
    pub(crate) reverse: Vec<Vec<NodeId>>,
    pub(crate) unresolved: BTreeSet<String>,
    pub(crate) overlay: Vec<OverlayEntry>,
}

impl GraphData {
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    /// All nodes carrying this id: the global one and any local-scope ones.
    fn nodes_named(&self, id: &str) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(&n) = self.global_index.get(id) {
            out.push(n);
        }
        for index in self.local_index.values() {
            if let Some(&n) = index.get(id) {
                out.push(n);
            }
        }
        out
    }

    /// Non-ancestor direct dependencies; a leaf has none.
    fn substantive_deps(&self, node: NodeId) -> Vec<NodeId> {
        let n = self.node(node);
        let ancestors: HashSet<&str> = dotted_ancestors(&n.id).collect();
        n.deps
            .iter()
            .copied()
            .filter(|&d| !ancestors.contains(self.node(d).id.as_str()))
            .collect()
    }
}

/// Static import graph over one or more source roots.
///
/// Queries are read-only and may run concurrently; mutation
/// ([`ModuleGraph::add_dynamic_dependencies_at_leaves`]) requires exclusive
/// access.
#[derive(Debug)]
pub struct ModuleGraph {
    pub(crate) data: GraphData,
    closures: RwLock<ClosureCache>,
}

impl Clone for ModuleGraph {
    fn clone(&self) -> Self {
        // closures are recomputed on demand so the copy is fully independent
        ModuleGraph {
            data: self.data.clone(),
            closures: RwLock::new(ClosureCache::default()),
        }
    }
}

impl ModuleGraph {
    pub(crate) fn from_data(data: GraphData) -> Self {
        ModuleGraph {
            data,
            closures: RwLock::new(ClosureCache::default()),
        }
    }

    /// Transitive dependencies of the module backed by `path`, or `None` if
    /// the path is unknown (or shadowed by an interface file).
    pub fn file_depends_on(&self, path: impl AsRef<Path>) -> Option<HashSet<String>> {
        let node = *self.data.dep_file_index.get(path.as_ref())?;
        Some(self.ids_of(&self.effective_closure(node)))
    }

    /// Transitive dependencies of a module id. Local-scope ids must be
    /// qualified with their package key.
    pub fn module_depends_on(&self, id: &str, pkg: Option<&str>) -> Option<HashSet<String>> {
        let node = self.lookup_module(id, pkg)?;
        Some(self.ids_of(&self.effective_closure(node)))
    }

    /// Files affected by a change to any of `paths`: every file whose module
    /// transitively depends on one of the given files. An input file is
    /// reported only when its module belongs to an import cycle and so
    /// depends on itself.
    pub fn affected_by_files<I, P>(&self, paths: I) -> HashSet<PathBuf>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let seeds: Vec<NodeId> = paths
            .into_iter()
            .filter_map(|p| self.data.file_index.get(p.as_ref()).copied())
            .collect();
        let affected = self.affected_nodes(&seeds);
        let mut out = HashSet::new();
        for n in affected {
            let node = self.data.node(n);
            if let Some(p) = &node.path {
                out.insert(p.clone());
            }
            if let Some(p) = &node.impl_path {
                out.insert(p.clone());
            }
        }
        out
    }

    /// Module ids affected by a change to any of `ids`.
    pub fn affected_by_modules<I, S>(&self, ids: I) -> HashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seeds: Vec<NodeId> = ids
            .into_iter()
            .flat_map(|id| self.data.nodes_named(id.as_ref()))
            .collect();
        self.ids_of(&self.affected_nodes(&seeds))
    }

    /// Files of the modules affected by a change to any of `ids`. Externals
    /// carry no file and are not reported.
    pub fn files_affected_by_modules<I, S>(&self, ids: I) -> HashSet<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seeds: Vec<NodeId> = ids
            .into_iter()
            .flat_map(|id| self.data.nodes_named(id.as_ref()))
            .collect();
        let mut out = HashSet::new();
        for n in self.affected_nodes(&seeds) {
            let node = self.data.node(n);
            if let Some(p) = &node.path {
                out.insert(p.clone());
            }
            if let Some(p) = &node.impl_path {
                out.insert(p.clone());
            }
        }
        out
    }

    /// Affected files, restricted to local scopes and grouped by scope key.
    pub fn local_affected_by_files<I, P>(&self, paths: I) -> BTreeMap<String, HashSet<PathBuf>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let seeds: Vec<NodeId> = paths
            .into_iter()
            .filter_map(|p| self.data.file_index.get(p.as_ref()).copied())
            .collect();
        let mut out: BTreeMap<String, HashSet<PathBuf>> = BTreeMap::new();
        for n in self.affected_nodes(&seeds) {
            let node = self.data.node(n);
            if let (ModuleScope::Local(key), Some(p)) = (&node.scope, &node.path) {
                out.entry(key.clone()).or_default().insert(p.clone());
            }
        }
        out
    }

    /// Affected module ids, restricted to local scopes and grouped by scope
    /// key.
    pub fn local_affected_by_modules<I, S>(&self, ids: I) -> BTreeMap<String, HashSet<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seeds: Vec<NodeId> = ids
            .into_iter()
            .flat_map(|id| self.data.nodes_named(id.as_ref()))
            .collect();
        let mut out: BTreeMap<String, HashSet<String>> = BTreeMap::new();
        for n in self.affected_nodes(&seeds) {
            let node = self.data.node(n);
            if let ModuleScope::Local(key) = &node.scope {
                out.entry(key.clone()).or_default().insert(node.id.clone());
            }
        }
        out
    }

    /// Install extra dependencies at leaf modules. Each entry is
    /// `(module id or file path, {local scope key → extra dep ids})`; every
    /// module of the named scope whose closure contains the leaf inherits the
    /// extras and their transitive closures.
    ///
    /// Targets must be leaves: modules with no resolved direct dependencies
    /// beyond their own ancestor packages. All entries are validated before
    /// any mutation, so a failed call leaves the graph unchanged.
    pub fn add_dynamic_dependencies_at_leaves(
        &mut self,
        edges: &[(String, BTreeMap<String, BTreeSet<String>>)],
    ) -> Result<(), Error> {
        let mut staged: Vec<OverlayEntry> = Vec::new();
        for (target, per_scope) in edges {
            let leaf = self
                .lookup_module_or_file(target)
                .ok_or_else(|| Error::UnknownModule(target.clone()))?;
            let substantive = self.data.substantive_deps(leaf);
            if !substantive.is_empty() {
                return Err(Error::NotALeaf {
                    id: self.data.node(leaf).id.clone(),
                    deps: substantive
                        .iter()
                        .map(|&d| self.data.node(d).id.clone())
                        .collect(),
                });
            }
            for (scope, extra_ids) in per_scope {
                let mut extras = Vec::new();
                for extra in extra_ids {
                    let node = self
                        .lookup_module(extra, Some(scope))
                        .ok_or_else(|| Error::UnknownModule(extra.clone()))?;
                    extras.push(node);
                }
                extras.sort_unstable();
                extras.dedup();
                staged.push(OverlayEntry {
                    leaf,
                    scope: scope.clone(),
                    extras,
                });
            }
        }
        self.data.overlay.extend(staged);
        self.closures.write().clear();
        Ok(())
    }

    /// Persist the graph in the versioned binary format.
    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        serialize::to_file(self, path.as_ref())
    }

    /// Load a graph persisted by [`ModuleGraph::to_file`].
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<ModuleGraph> {
        serialize::from_file(path.as_ref())
    }

    /// Raw references that could not be resolved to any module, plus the ids
    /// of files whose source could not be parsed.
    pub fn unresolved(&self) -> BTreeSet<String> {
        self.data.unresolved.clone()
    }

    /// Whether two module ids belong to the same import cycle. Cycle members
    /// share a single closure set, so this is an object-identity check.
    pub fn in_same_cycle(&self, a: &str, b: &str) -> bool {
        let (Some(na), Some(nb)) = (self.lookup_module(a, None), self.lookup_module(b, None))
        else {
            return false;
        };
        let mut cache = self.closures.write();
        let deps = |n: NodeId| self.data.node(n).deps.clone();
        cache.ensure(na, &deps);
        cache.ensure(nb, &deps);
        cache.slot_of(na) == cache.slot_of(nb)
    }

    // ---- internals ----

    fn lookup_module(&self, id: &str, pkg: Option<&str>) -> Option<NodeId> {
        if let Some(pkg) = pkg {
            if let Some(&n) = self.data.local_index.get(pkg).and_then(|m| m.get(id)) {
                return Some(n);
            }
        }
        self.data.global_index.get(id).copied()
    }

    fn lookup_module_or_file(&self, target: &str) -> Option<NodeId> {
        if let Some(&n) = self.data.dep_file_index.get(Path::new(target)) {
            return Some(n);
        }
        if let Some(&n) = self.data.file_index.get(Path::new(target)) {
            return Some(n);
        }
        if let Some(&n) = self.data.global_index.get(target) {
            return Some(n);
        }
        for index in self.data.local_index.values() {
            if let Some(&n) = index.get(target) {
                return Some(n);
            }
        }
        None
    }

    fn ids_of(&self, nodes: &HashSet<NodeId>) -> HashSet<String> {
        nodes
            .iter()
            .map(|&n| self.data.node(n).id.clone())
            .collect()
    }

    /// Closure of `node` with overlay extras folded in for local-scope
    /// modules.
    pub(crate) fn effective_closure(&self, node: NodeId) -> HashSet<NodeId> {
        let mut cache = self.closures.write();
        let deps = |n: NodeId| self.data.node(n).deps.clone();
        cache.ensure(node, &deps);
        let mut set = cache.set(node).expect("closure just computed").clone();

        if let ModuleScope::Local(scope) = &self.data.node(node).scope {
            let mut applied = vec![false; self.data.overlay.len()];
            loop {
                let mut changed = false;
                for (i, entry) in self.data.overlay.iter().enumerate() {
                    if applied[i] || entry.scope != *scope || !set.contains(&entry.leaf) {
                        continue;
                    }
                    applied[i] = true;
                    changed = true;
                    for &extra in &entry.extras {
                        set.insert(extra);
                        cache.ensure(extra, &deps);
                        set.extend(cache.set(extra).expect("closure just computed"));
                    }
                }
                if !changed {
                    break;
                }
            }
        }
        set
    }

    /// Transitive reverse reachability from `seeds`, overlay-aware. A seed
    /// is reported only when its own closure contains it (it sits on an
    /// import cycle), keeping `affected_by` the exact transpose of
    /// `depends_on`.
    fn affected_nodes(&self, seeds: &[NodeId]) -> HashSet<NodeId> {
        let mut affected = self.reverse_reachable(seeds);

        if !self.data.overlay.is_empty() {
            let seed_set: HashSet<NodeId> = seeds.iter().copied().collect();
            let mut cache = self.closures.write();
            let deps = |n: NodeId| self.data.node(n).deps.clone();

            // which overlays a change to `seeds` flows through; an overlay
            // also triggers when its extras reach another triggered leaf
            let mut triggered = vec![false; self.data.overlay.len()];
            let mut effective: Vec<HashSet<NodeId>> = Vec::with_capacity(self.data.overlay.len());
            for entry in &self.data.overlay {
                let mut eff = HashSet::new();
                for &extra in &entry.extras {
                    eff.insert(extra);
                    cache.ensure(extra, &deps);
                    eff.extend(cache.set(extra).expect("closure just computed"));
                }
                effective.push(eff);
            }
            loop {
                let mut changed = false;
                for (i, entry) in self.data.overlay.iter().enumerate() {
                    if triggered[i] {
                        continue;
                    }
                    let hit_seed = effective[i].iter().any(|n| seed_set.contains(n));
                    let hit_leaf = self
                        .data
                        .overlay
                        .iter()
                        .enumerate()
                        .any(|(j, other)| {
                            triggered[j]
                                && other.scope == entry.scope
                                && effective[i].contains(&other.leaf)
                        });
                    if hit_seed || hit_leaf {
                        triggered[i] = true;
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }
            drop(cache);
            for (i, entry) in self.data.overlay.iter().enumerate() {
                if !triggered[i] {
                    continue;
                }
                let upstream = self.reverse_reachable(&[entry.leaf]);
                for n in upstream {
                    if matches!(&self.data.node(n).scope, ModuleScope::Local(s) if *s == entry.scope)
                    {
                        affected.insert(n);
                    }
                }
            }
        }

        // a cycle member's closure contains itself, so a change to it
        // affects it; only strip seeds that sit on no cycle
        let mut cache = self.closures.write();
        let deps = |n: NodeId| self.data.node(n).deps.clone();
        for s in seeds {
            cache.ensure(*s, &deps);
            let cyclic = cache.set(*s).is_some_and(|c| c.contains(s));
            if !cyclic {
                affected.remove(s);
            }
        }
        affected
    }

    fn reverse_reachable(&self, seeds: &[NodeId]) -> HashSet<NodeId> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue: Vec<NodeId> = seeds.to_vec();
        while let Some(n) = queue.pop() {
            for &dependent in &self.data.reverse[n as usize] {
                if seen.insert(dependent) {
                    queue.push(dependent);
                }
            }
        }
        seen
    }
}
