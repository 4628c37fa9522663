//! Project configuration surface consumed by the graph, tracker, selector
//! and validator.
//!
//! Projects supply an implementation of these traits (usually through the
//! TOML config file, see [`crate::config`]); [`ZeroConfHook`] covers the
//! common src/tests layout with explicit field values.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Configuration needed to build a [`crate::ModuleGraph`].
pub trait GraphHook {
    /// Top-level prefixes sharing the single global namespace.
    fn global_namespaces(&self) -> BTreeSet<String>;

    /// Top-level prefixes where each source root owns its own namespace.
    fn local_namespaces(&self) -> BTreeSet<String>;

    /// `{filesystem path → module prefix}` bindings.
    fn source_roots(&self) -> BTreeMap<PathBuf, String>;

    /// Prefixes tracked as dependencies even though no source file backs
    /// them (native extensions, vendored namespaces, ...). The graph builder
    /// always adds `importlib` and `__import__` on top of these.
    fn external_imports(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Extra direct dependencies merged into named modules at build time.
    fn dynamic_dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        BTreeMap::new()
    }

    /// Extra dependencies installed at leaf modules after construction, per
    /// local scope; see
    /// [`crate::ModuleGraph::add_dynamic_dependencies_at_leaves`].
    fn dynamic_dependencies_at_leaves(
        &self,
    ) -> Vec<(String, BTreeMap<String, BTreeSet<String>>)> {
        Vec::new()
    }

    /// Whether typechecking-only imports count as dependencies.
    fn include_typechecking(&self) -> bool {
        false
    }
}

/// Additional configuration for the runtime [`crate::tracker::Tracker`].
pub trait TrackerHook: GraphHook {
    /// `{module → attribute selectors}` patched right after a module loads.
    fn import_patches(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::new()
    }

    /// Whether to classify and attribute dynamic imports.
    fn record_dynamic(&self) -> bool {
        false
    }

    /// `{module → function selectors}` that aggregate dynamic imports.
    fn dynamic_anchors(&self) -> BTreeMap<String, BTreeSet<String>> {
        BTreeMap::new()
    }

    /// `{module → function selectors}` whose dynamic imports are treated as
    /// static.
    fn dynamic_ignores(&self) -> BTreeMap<String, BTreeSet<String>> {
        BTreeMap::new()
    }

    /// Enable per-import trace logging in the tracker.
    fn tracker_log(&self) -> bool {
        false
    }
}

/// Full surface used by the validator and the test selector.
pub trait ValidatorHook: TrackerHook {
    /// `{test folder path → local scope prefix}`.
    fn test_folders(&self) -> BTreeMap<PathBuf, String>;

    /// Test files, data files or test names that are never pruned.
    fn always_run(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Drop modified files known to be irrelevant to test outcomes; whatever
    /// remains unexplained disables pruning.
    fn filter_irrelevant_files(&self, files: BTreeSet<PathBuf>) -> BTreeSet<PathBuf> {
        files
    }

    /// Test-file naming convention.
    fn is_test_file(&self, name: &str) -> bool {
        default_is_test_file(name)
    }
}

/// pytest discovery convention: `test_*.py` or `*_test.py`.
pub fn default_is_test_file(name: &str) -> bool {
    (name.starts_with("test_") && name.ends_with(".py")) || name.ends_with("_test.py")
}

/// Hook carrying explicit values, for projects with a conventional layout
/// and for tests.
#[derive(Debug, Clone, Default)]
pub struct ZeroConfHook {
    pub global_ns: BTreeSet<String>,
    pub local_ns: BTreeSet<String>,
    pub src_roots: BTreeMap<PathBuf, String>,
    pub tst_dirs: BTreeMap<PathBuf, String>,
    pub external: BTreeSet<String>,
    pub typechecking: bool,
    pub always_run_set: BTreeSet<String>,
}

impl ZeroConfHook {
    pub fn new(
        global_ns: BTreeSet<String>,
        local_ns: BTreeSet<String>,
        src_roots: BTreeMap<PathBuf, String>,
        tst_dirs: BTreeMap<PathBuf, String>,
    ) -> Self {
        ZeroConfHook {
            global_ns,
            local_ns,
            src_roots,
            tst_dirs,
            ..Default::default()
        }
    }
}

impl GraphHook for ZeroConfHook {
    fn global_namespaces(&self) -> BTreeSet<String> {
        self.global_ns.clone()
    }

    fn local_namespaces(&self) -> BTreeSet<String> {
        self.local_ns.clone()
    }

    fn source_roots(&self) -> BTreeMap<PathBuf, String> {
        let mut roots = self.src_roots.clone();
        for (path, prefix) in &self.tst_dirs {
            roots.entry(path.clone()).or_insert_with(|| prefix.clone());
        }
        roots
    }

    fn external_imports(&self) -> BTreeSet<String> {
        self.external.clone()
    }

    fn include_typechecking(&self) -> bool {
        self.typechecking
    }
}

impl TrackerHook for ZeroConfHook {}

impl ValidatorHook for ZeroConfHook {
    fn test_folders(&self) -> BTreeMap<PathBuf, String> {
        self.tst_dirs.clone()
    }

    fn always_run(&self) -> BTreeSet<String> {
        self.always_run_set.clone()
    }
}
