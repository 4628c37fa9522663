use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What kind of file backs a module node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Regular implementation file (`.py`)
    Source,
    /// Typed interface file (`.pyi`); authoritative for dependencies
    /// when both it and the implementation exist
    Interface,
    /// Tracked external prefix with no backing file
    External,
}

/// Namespace scope a module id lives in.
///
/// Global-scope ids are unique across all source roots. Local-scope ids are
/// only unique within one local root (typically a tests folder), identified
/// by the root's filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleScope {
    Global,
    Local(String),
}

impl ModuleScope {
    pub fn local_key(&self) -> Option<&str> {
        match self {
            ModuleScope::Global => None,
            ModuleScope::Local(key) => Some(key),
        }
    }
}

/// How an import reference was written at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefKind {
    /// `import a.b.c`
    Absolute,
    /// `from X import Y` where `Y` may be a submodule or an object;
    /// the resolver decides which at graph-build time
    FromImport,
    /// String-literal argument of `__import__(...)` / `import_module(...)`
    DynamicLiteral,
}

/// One raw import reference extracted from a source file.
///
/// `target` is the dotted name as written, already joined for from-imports
/// (`from a.b import c` yields target `a.b.c` with [`RefKind::FromImport`]).
/// Relative imports carry a non-zero `level` and are absolutized by the
/// resolver against the importing module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRef {
    pub target: String,
    pub kind: RefKind,
    pub level: u32,
    pub typechecking_only: bool,
}

impl ImportRef {
    pub fn absolute(target: impl Into<String>) -> Self {
        ImportRef {
            target: target.into(),
            kind: RefKind::Absolute,
            level: 0,
            typechecking_only: false,
        }
    }

    pub fn from_import(target: impl Into<String>, level: u32) -> Self {
        ImportRef {
            target: target.into(),
            kind: RefKind::FromImport,
            level,
            typechecking_only: false,
        }
    }

    pub fn dynamic(target: impl Into<String>) -> Self {
        ImportRef {
            target: target.into(),
            kind: RefKind::DynamicLiteral,
            level: 0,
            typechecking_only: false,
        }
    }

    pub fn typechecking(mut self) -> Self {
        self.typechecking_only = true;
        self
    }
}

/// Parser output for one source file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// Dotted module id relative to the owning source root's prefix.
    pub module_id: String,
    pub path: PathBuf,
    pub kind: FileKind,
    pub imports: Vec<ImportRef>,
    /// Source failed to parse; the module contributes no imports and is
    /// reported through `ModuleGraph::unresolved`.
    pub malformed: bool,
}

/// Top-level component of a dotted name.
pub fn top_level(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Parent package of a dotted name, if any.
pub fn parent_package(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(parent, _)| parent)
}

/// All strict ancestors of a dotted name, outermost first:
/// `a.b.c` yields `a`, `a.b`.
pub fn dotted_ancestors(name: &str) -> impl Iterator<Item = &str> {
    name.char_indices()
        .filter(|&(_, c)| c == '.')
        .map(move |(i, _)| &name[..i])
}
