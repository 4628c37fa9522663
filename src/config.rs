//! TOML project configuration, deserialized into a [`ValidatorHook`].
//!
//! ```toml
//! include-typechecking = false
//! external = ["importlib", "__import__"]
//!
//! [namespaces]
//! global = ["pkg"]
//! local = ["tests"]
//!
//! [roots]
//! "src/pkg" = "pkg"
//! "tests" = "tests"
//!
//! [test-folders]
//! "tests" = "tests"
//!
//! [tracker]
//! record-dynamic = true
//!
//! [tracker.anchors]
//! "pkg.loader" = ["import_by_name"]
//! ```

use crate::hook::{GraphHook, TrackerHook, ValidatorHook};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub namespaces: Namespaces,
    /// `{source root path → module prefix}`
    #[serde(default)]
    pub roots: BTreeMap<String, String>,
    /// `{test folder path → local scope prefix}`
    #[serde(default)]
    pub test_folders: BTreeMap<String, String>,
    #[serde(default)]
    pub external: BTreeSet<String>,
    #[serde(default)]
    pub always_run: BTreeSet<String>,
    #[serde(default)]
    pub include_typechecking: bool,
    /// Extra build-time dependencies, `{module → deps}`
    #[serde(default)]
    pub dynamic_deps: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub tracker: TrackerSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Namespaces {
    #[serde(default)]
    pub global: BTreeSet<String>,
    #[serde(default)]
    pub local: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TrackerSection {
    #[serde(default)]
    pub record_dynamic: bool,
    #[serde(default)]
    pub log: bool,
    #[serde(default)]
    pub anchors: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub ignores: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub patches: BTreeMap<String, Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

impl GraphHook for FileConfig {
    fn global_namespaces(&self) -> BTreeSet<String> {
        self.namespaces.global.clone()
    }

    fn local_namespaces(&self) -> BTreeSet<String> {
        self.namespaces.local.clone()
    }

    fn source_roots(&self) -> BTreeMap<PathBuf, String> {
        let mut roots: BTreeMap<PathBuf, String> = self
            .roots
            .iter()
            .map(|(p, prefix)| (PathBuf::from(p), prefix.clone()))
            .collect();
        for (p, prefix) in &self.test_folders {
            roots.entry(PathBuf::from(p)).or_insert_with(|| prefix.clone());
        }
        roots
    }

    fn external_imports(&self) -> BTreeSet<String> {
        self.external.clone()
    }

    fn dynamic_dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.dynamic_deps.clone()
    }

    fn include_typechecking(&self) -> bool {
        self.include_typechecking
    }
}

impl TrackerHook for FileConfig {
    fn import_patches(&self) -> BTreeMap<String, Vec<String>> {
        self.tracker.patches.clone()
    }

    fn record_dynamic(&self) -> bool {
        self.tracker.record_dynamic
    }

    fn dynamic_anchors(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.tracker.anchors.clone()
    }

    fn dynamic_ignores(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.tracker.ignores.clone()
    }

    fn tracker_log(&self) -> bool {
        self.tracker.log
    }
}

impl ValidatorHook for FileConfig {
    fn test_folders(&self) -> BTreeMap<PathBuf, String> {
        self.test_folders
            .iter()
            .map(|(p, prefix)| (PathBuf::from(p), prefix.clone()))
            .collect()
    }

    fn always_run(&self) -> BTreeSet<String> {
        self.always_run.clone()
    }
}
