//! Import reference resolution.
//!
//! Applied to each raw reference from a module, in order: relative
//! absolutization, exact global match, from-import of an object, external
//! prefixes, local-scope retries, unresolved.

use super::{GraphData, Node, NodeId};
use crate::core::{dotted_ancestors, FileKind, ImportRef, ModuleScope, RefKind};
use std::collections::BTreeSet;

pub(crate) struct Resolver<'a> {
    pub(crate) data: &'a mut GraphData,
    pub(crate) external_prefixes: &'a BTreeSet<String>,
}

impl Resolver<'_> {
    /// Resolve all references of one module into direct dependency node ids.
    /// Unresolvable references are recorded, never fatal.
    pub(crate) fn resolve_refs(&mut self, importer: NodeId, refs: &[ImportRef]) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = Vec::new();
        for r in refs {
            self.resolve_ref(importer, r, &mut deps);
        }
        // every module implicitly depends on its existing ancestor packages
        let (id, scope) = {
            let n = self.data.node(importer);
            (n.id.clone(), n.scope.clone())
        };
        for ancestor in dotted_ancestors(&id) {
            if let Some(n) = self.lookup_in_scope(&scope, ancestor) {
                deps.push(n);
            }
        }
        deps.retain(|&d| d != importer);
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    fn resolve_ref(&mut self, importer: NodeId, r: &ImportRef, deps: &mut Vec<NodeId>) {
        let (importer_id, importer_scope, importer_is_package) = {
            let n = self.data.node(importer);
            (n.id.clone(), n.scope.clone(), n.package)
        };

        // 1. absolutize relative references against the importer
        let target = if r.level > 0 {
            match absolutize(&importer_id, importer_is_package, r.level, &r.target) {
                Some(t) => t,
                None => {
                    self.data
                        .unresolved
                        .insert(format!("{}{}", ".".repeat(r.level as usize), r.target));
                    return;
                }
            }
        } else {
            r.target.clone()
        };
        if target.is_empty() {
            return;
        }

        // 2. exact global match
        if let Some(&n) = self.data.global_index.get(&target) {
            self.push_with_ancestors(n, deps);
            return;
        }
        // 3. from-import of an object: depend on the containing module
        if r.kind == RefKind::FromImport {
            if let Some(parent) = target.rsplit_once('.').map(|(p, _)| p) {
                if let Some(&n) = self.data.global_index.get(parent) {
                    self.push_with_ancestors(n, deps);
                    return;
                }
            }
        }
        // 4. external prefixes, longest match first
        if let Some(prefix) = self.longest_external_prefix(&target) {
            let n = self.external_node(&prefix);
            self.push_with_ancestors(n, deps);
            return;
        }
        // 5. local-scope retries
        if let ModuleScope::Local(scope) = &importer_scope {
            if let Some(n) = self.resolve_local(scope, &target, r.kind) {
                self.push_with_ancestors(n, deps);
                return;
            }
        }
        // 6. unresolved is data, not an error
        self.data.unresolved.insert(target);
    }

    fn resolve_local(&self, scope: &str, target: &str, kind: RefKind) -> Option<NodeId> {
        let index = self.data.local_index.get(scope)?;
        if let Some(&n) = index.get(target) {
            return Some(n);
        }
        if kind == RefKind::FromImport {
            if let Some(parent) = target.rsplit_once('.').map(|(p, _)| p) {
                if let Some(&n) = index.get(parent) {
                    return Some(n);
                }
            }
        }
        // retry with the local root's prefix prepended, for test folders that
        // sit directly on the import path
        let prefix = self.data.local_prefixes.get(scope)?;
        if prefix.is_empty() {
            return None;
        }
        let prefixed = format!("{}.{}", prefix, target);
        if let Some(&n) = index.get(&prefixed) {
            return Some(n);
        }
        if kind == RefKind::FromImport {
            if let Some(parent) = prefixed.rsplit_once('.').map(|(p, _)| p) {
                if let Some(&n) = index.get(parent) {
                    return Some(n);
                }
            }
        }
        None
    }

    /// A resolved target pulls in its ancestor packages too, since loading a
    /// submodule loads every parent on the way down.
    fn push_with_ancestors(&mut self, node: NodeId, deps: &mut Vec<NodeId>) {
        deps.push(node);
        let (id, scope, external) = {
            let n = self.data.node(node);
            (n.id.clone(), n.scope.clone(), n.kind == FileKind::External)
        };
        let ancestors: Vec<String> = dotted_ancestors(&id).map(str::to_string).collect();
        for ancestor in ancestors {
            if let Some(n) = self.lookup_in_scope(&scope, &ancestor) {
                deps.push(n);
            } else if external {
                deps.push(self.external_node(&ancestor));
            }
        }
    }

    fn lookup_in_scope(&self, scope: &ModuleScope, id: &str) -> Option<NodeId> {
        match scope {
            ModuleScope::Global => self.data.global_index.get(id).copied(),
            ModuleScope::Local(key) => self
                .data
                .local_index
                .get(key)
                .and_then(|m| m.get(id))
                .copied()
                .or_else(|| self.data.global_index.get(id).copied()),
        }
    }

    fn longest_external_prefix(&self, target: &str) -> Option<String> {
        if self.external_prefixes.contains(target) {
            return Some(target.to_string());
        }
        let mut best: Option<&str> = None;
        for ancestor in dotted_ancestors(target) {
            if self.external_prefixes.contains(ancestor) {
                best = Some(ancestor);
            }
        }
        best.map(str::to_string)
    }

    /// External leaves are materialized on first use.
    fn external_node(&mut self, id: &str) -> NodeId {
        if let Some(&n) = self.data.global_index.get(id) {
            return n;
        }
        let n = self.data.nodes.len() as NodeId;
        self.data.nodes.push(Node {
            id: id.to_string(),
            scope: ModuleScope::Global,
            kind: FileKind::External,
            path: None,
            impl_path: None,
            package: false,
            deps: Vec::new(),
            impl_deps: Vec::new(),
        });
        self.data.global_index.insert(id.to_string(), n);
        n
    }
}

/// Resolve a relative reference against the importing module.
///
/// Level 1 is the importer's own package; each additional level strips one
/// more component. Returns `None` when the levels walk past the top.
pub(crate) fn absolutize(
    importer: &str,
    importer_is_package: bool,
    level: u32,
    target: &str,
) -> Option<String> {
    let mut base: Vec<&str> = importer.split('.').collect();
    if !importer_is_package {
        base.pop();
    }
    for _ in 1..level {
        if base.pop().is_none() {
            return None;
        }
    }
    if base.is_empty() {
        return None;
    }
    let mut parts = base.join(".");
    if !target.is_empty() {
        parts.push('.');
        parts.push_str(target);
    }
    Some(parts)
}
