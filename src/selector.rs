//! Test selection: decide which collected test items can be skipped for a
//! given set of modified files.

use crate::graph::ModuleGraph;
use crate::hook::ValidatorHook;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

/// One collected test item: the file it lives in, an optional data file it
/// is parameterized from, and its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestItem {
    pub file: PathBuf,
    pub data: Option<PathBuf>,
    pub name: String,
}

impl TestItem {
    pub fn new(file: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        TestItem {
            file: file.into(),
            data: None,
            name: name.into(),
        }
    }

    pub fn with_data(mut self, data: impl Into<PathBuf>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// Outcome of a selection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Indices (into the input items) that are safe to deselect.
    Pruned {
        deselected: Vec<usize>,
        /// Test files kept because they transitively use dynamic imports the
        /// hook does not account for.
        unhandled_dynamic: BTreeSet<PathBuf>,
    },
    /// A modified file could not be accounted for; nothing may be pruned.
    Disabled { unexplained: BTreeSet<PathBuf> },
}

/// Apply the pruning contract. A test item is deselected iff its file is
/// covered by the graph and unaffected, its data file is neither modified nor
/// always-run, neither file nor test name is always-run, and the file has no
/// unhandled dynamic-import dependency.
///
/// Safety valve: when any modified file is unknown to the graph, not a data
/// file of some collected item, not always-run and not filtered as
/// irrelevant, pruning is disabled entirely.
pub fn select_tests(
    graph: &ModuleGraph,
    hook: &dyn ValidatorHook,
    modified: &BTreeSet<PathBuf>,
    items: &[TestItem],
) -> Selection {
    let mut affected = graph.affected_by_files(modified.iter());
    affected.extend(modified.iter().cloned());

    let always_run = hook.always_run();

    // without hook-provided dynamic-dependency data, any test reaching the
    // dynamic import machinery cannot be pruned safely
    let hook_handles_dynamic = !hook.dynamic_dependencies().is_empty()
        || !hook.dynamic_dependencies_at_leaves().is_empty();
    let unhandled_dynamic: BTreeSet<PathBuf> = if hook_handles_dynamic {
        BTreeSet::new()
    } else {
        graph
            .files_affected_by_modules(["importlib", "__import__"])
            .into_iter()
            .collect()
    };
    if !unhandled_dynamic.is_empty() {
        log::warn!(
            "pruning disabled for files with unhandled dynamic imports: {:?}",
            unhandled_dynamic
        );
    }

    let mut remaining: HashSet<PathBuf> = modified.iter().cloned().collect();
    let mut covered: HashMap<&PathBuf, bool> = HashMap::new();
    let mut deselected = Vec::new();

    for (idx, item) in items.iter().enumerate() {
        let is_covered = *covered
            .entry(&item.file)
            .or_insert_with(|| graph.file_depends_on(&item.file).is_some());
        if is_covered {
            remaining.remove(&item.file);
        }
        if let Some(data) = &item.data {
            remaining.remove(data);
        }

        let data_modified = item.data.as_ref().is_some_and(|d| modified.contains(d));
        let file_str = item.file.to_string_lossy();
        let data_always = item
            .data
            .as_ref()
            .is_some_and(|d| always_run.contains(d.to_string_lossy().as_ref()));
        let keep = !is_covered
            || affected.contains(&item.file)
            || data_modified
            || always_run.contains(file_str.as_ref())
            || data_always
            || always_run.contains(&item.name)
            || unhandled_dynamic.contains(&item.file);
        if !keep {
            deselected.push(idx);
        }
    }

    let mut unexplained: BTreeSet<PathBuf> = remaining
        .into_iter()
        .filter(|p| !always_run.contains(p.to_string_lossy().as_ref()))
        .filter(|p| graph.file_depends_on(p).is_none())
        .collect();
    unexplained = hook.filter_irrelevant_files(unexplained);

    if !unexplained.is_empty() {
        log::warn!("pruning disabled, unhandled modified files: {:?}", unexplained);
        return Selection::Disabled { unexplained };
    }

    Selection::Pruned {
        deselected,
        unhandled_dynamic,
    }
}
