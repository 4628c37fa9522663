//! Shared data model for the import graph and tracker.

pub mod types;

pub use types::{
    dotted_ancestors, parent_package, top_level, FileKind, ImportRef, ModuleScope, ParsedFile,
    RefKind,
};
