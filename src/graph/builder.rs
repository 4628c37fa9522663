//! Graph construction: file discovery, parallel parsing, serial merge.

use super::resolve::Resolver;
use super::serialize;
use super::{GraphData, ModuleGraph, Node, NodeId};
use crate::core::{FileKind, ImportRef, ModuleScope, ParsedFile, RefKind};
use crate::hook::GraphHook;
use crate::parser;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Builds a [`ModuleGraph`] from hook-provided project configuration.
pub struct GraphBuilder<'a> {
    hook: &'a dyn GraphHook,
}

struct DiscoveredFile {
    path: PathBuf,
    module_id: String,
    scope: ModuleScope,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(hook: &'a dyn GraphHook) -> Self {
        GraphBuilder { hook }
    }

    /// Discover, parse and resolve every file under every source root.
    /// Per-file parsing runs in parallel; the merge into the shared graph is
    /// serial so resolution order stays deterministic.
    pub fn build(self) -> Result<ModuleGraph> {
        let local_ns = self.hook.local_namespaces();
        let mut external = self.hook.external_imports();
        // the import machinery itself is always tracked, whatever the hook
        // declares, so modules reaching it stay visible to the selector's
        // dynamic-import guard
        external.insert("importlib".to_string());
        external.insert("__import__".to_string());
        let include_typechecking = self.hook.include_typechecking();

        let mut data = GraphData::default();
        let mut files: Vec<DiscoveredFile> = Vec::new();

        for (root_path, prefix) in self.hook.source_roots() {
            if !root_path.is_dir() {
                log::warn!("source root {} does not exist, skipped", root_path.display());
                continue;
            }
            let (eff_path, eff_prefix) = parser::resolve_root(&root_path, &prefix)
                .with_context(|| format!("bad source root {}", root_path.display()))?;
            let scope = if local_ns.contains(crate::core::top_level(&eff_prefix)) {
                let key = root_path.display().to_string();
                data.local_prefixes
                    .insert(key.clone(), eff_prefix.clone());
                ModuleScope::Local(key)
            } else {
                ModuleScope::Global
            };
            for path in discover_python_files(&eff_path) {
                let rel = match path.strip_prefix(&eff_path) {
                    Ok(rel) => rel,
                    Err(_) => continue,
                };
                let Some(module_id) = parser::layout::module_id_under(&eff_prefix, rel) else {
                    continue;
                };
                files.push(DiscoveredFile {
                    path,
                    module_id,
                    scope: scope.clone(),
                });
            }
        }

        // pure per-file work, order preserved by collect
        let parsed: Vec<(ParsedFile, ModuleScope)> = files
            .par_iter()
            .map(|f| {
                let parsed = match parser::parse_file(&f.path, &f.module_id) {
                    Ok(p) => p,
                    Err(err) => {
                        log::warn!("cannot read {}: {}", f.path.display(), err);
                        ParsedFile {
                            module_id: f.module_id.clone(),
                            path: f.path.clone(),
                            kind: FileKind::Source,
                            imports: Vec::new(),
                            malformed: true,
                        }
                    }
                };
                (parsed, f.scope.clone())
            })
            .collect();

        // merge: one node per (scope, module id); the interface file is
        // authoritative when both it and the implementation exist
        let mut node_refs: Vec<(Vec<ImportRef>, Vec<ImportRef>)> = Vec::new();
        let mut by_module: HashMap<(ModuleScope, String), NodeId> = HashMap::new();
        for (parsed, scope) in &parsed {
            if parsed.malformed {
                data.unresolved.insert(parsed.module_id.clone());
            }
            let key = (scope.clone(), parsed.module_id.clone());
            let node = match by_module.get(&key) {
                Some(&n) => n,
                None => {
                    let n = data.nodes.len() as NodeId;
                    data.nodes.push(Node {
                        id: parsed.module_id.clone(),
                        scope: scope.clone(),
                        kind: parsed.kind,
                        path: None,
                        impl_path: None,
                        package: is_init_file(&parsed.path),
                        deps: Vec::new(),
                        impl_deps: Vec::new(),
                    });
                    node_refs.push((Vec::new(), Vec::new()));
                    by_module.insert(key, n);
                    match scope {
                        ModuleScope::Global => {
                            data.global_index.insert(parsed.module_id.clone(), n);
                        }
                        ModuleScope::Local(s) => {
                            data.local_index
                                .entry(s.clone())
                                .or_default()
                                .insert(parsed.module_id.clone(), n);
                        }
                    }
                    n
                }
            };
            let slot = &mut data.nodes[node as usize];
            data.file_index.insert(parsed.path.clone(), node);
            match parsed.kind {
                FileKind::Interface => {
                    if let Some(prev) = slot.path.take() {
                        if slot.kind == FileKind::Source {
                            // demote the implementation file
                            slot.impl_path = Some(prev);
                            node_refs[node as usize].1 =
                                std::mem::take(&mut node_refs[node as usize].0);
                        }
                    }
                    slot.kind = FileKind::Interface;
                    slot.path = Some(parsed.path.clone());
                    slot.package = is_init_file(&parsed.path);
                    node_refs[node as usize].0 = parsed.imports.clone();
                }
                _ => {
                    if slot.kind == FileKind::Interface {
                        slot.impl_path = Some(parsed.path.clone());
                        node_refs[node as usize].1 = parsed.imports.clone();
                    } else if slot.path.is_some() {
                        log::warn!(
                            "duplicate module {} at {}, keeping first",
                            parsed.module_id,
                            parsed.path.display()
                        );
                    } else {
                        slot.path = Some(parsed.path.clone());
                        node_refs[node as usize].0 = parsed.imports.clone();
                    }
                }
            }
        }
        for (n, node) in data.nodes.iter().enumerate() {
            if let Some(path) = &node.path {
                data.dep_file_index.insert(path.clone(), n as NodeId);
            }
        }

        // resolve all references now that every node exists
        let filter = |refs: &[ImportRef]| -> Vec<ImportRef> {
            refs.iter()
                .filter(|r| include_typechecking || !r.typechecking_only)
                .cloned()
                .collect()
        };
        let mut resolver = Resolver {
            data: &mut data,
            external_prefixes: &external,
        };
        for n in 0..node_refs.len() {
            let node = n as NodeId;
            let main = filter(&node_refs[n].0);
            let deps = resolver.resolve_refs(node, &main);
            resolver.data.nodes[n].deps = deps;
            if !node_refs[n].1.is_empty() {
                let shadow = filter(&node_refs[n].1);
                let impl_deps = resolver.resolve_refs(node, &shadow);
                resolver.data.nodes[n].impl_deps = impl_deps;
            }
        }

        // hook-declared dynamic dependencies are ordinary direct deps
        for (id, extras) in self.hook.dynamic_dependencies() {
            let Some(node) = find_any(resolver.data, &id) else {
                log::warn!("dynamic dependency on unknown module {}", id);
                continue;
            };
            let refs: Vec<ImportRef> = extras
                .iter()
                .map(|e| ImportRef {
                    target: e.clone(),
                    kind: RefKind::Absolute,
                    level: 0,
                    typechecking_only: false,
                })
                .collect();
            let mut extra_deps = resolver.resolve_refs(node, &refs);
            let slot = &mut resolver.data.nodes[node as usize];
            extra_deps.extend(slot.deps.iter().copied());
            extra_deps.sort_unstable();
            extra_deps.dedup();
            extra_deps.retain(|&d| d != node);
            slot.deps = extra_deps;
        }

        // reverse index: transpose of the direct-dependency relation,
        // recording both interface and implementation edges
        data.reverse = vec![Vec::new(); data.nodes.len()];
        for n in 0..data.nodes.len() {
            let node = n as NodeId;
            let mut targets: Vec<NodeId> = data.nodes[n]
                .deps
                .iter()
                .chain(data.nodes[n].impl_deps.iter())
                .copied()
                .collect();
            targets.sort_unstable();
            targets.dedup();
            for t in targets {
                data.reverse[t as usize].push(node);
            }
        }
        for dependents in &mut data.reverse {
            dependents.sort_unstable();
            dependents.dedup();
        }

        Ok(ModuleGraph::from_data(data))
    }
}

/// Load a previously serialized graph, or build a fresh one from the hook
/// (applying the hook's leaf overlays) and optionally persist it.
pub fn load_or_build(hook: &dyn GraphHook, file: Option<&Path>) -> Result<ModuleGraph> {
    if let Some(file) = file {
        if file.exists() {
            log::debug!("loading existing import graph from {}", file.display());
            return serialize::from_file(file);
        }
    }
    log::debug!("building fresh import graph");
    let mut graph = GraphBuilder::new(hook).build()?;
    let unresolved = graph.unresolved();
    if !unresolved.is_empty() {
        log::info!("unresolved imports: {:?}", unresolved);
    }
    let leaves = hook.dynamic_dependencies_at_leaves();
    if !leaves.is_empty() {
        graph
            .add_dynamic_dependencies_at_leaves(&leaves)
            .context("applying dynamic dependencies at leaves")?;
    }
    if let Some(file) = file {
        serialize::to_file(&graph, file)?;
    }
    Ok(graph)
}

fn discover_python_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("py") | Some("pyi")
            )
        })
        .collect();
    files.sort();
    files
}

fn is_init_file(path: &Path) -> bool {
    matches!(
        path.file_stem().and_then(|s| s.to_str()),
        Some("__init__")
    )
}

fn find_any(data: &GraphData, id: &str) -> Option<NodeId> {
    if let Some(&n) = data.global_index.get(id) {
        return Some(n);
    }
    for index in data.local_index.values() {
        if let Some(&n) = index.get(id) {
            return Some(n);
        }
    }
    None
}
