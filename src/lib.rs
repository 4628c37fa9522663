// Export modules for library usage
pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod graph;
pub mod hook;
pub mod parser;
pub mod selector;
pub mod tracker;
pub mod validator;

// Re-export commonly used types
pub use crate::core::{FileKind, ImportRef, ModuleScope, RefKind};
pub use crate::errors::Error;
pub use crate::graph::{builder::load_or_build, GraphBuilder, ModuleGraph};
pub use crate::hook::{GraphHook, TrackerHook, ValidatorHook, ZeroConfHook};
pub use crate::selector::{select_tests, Selection, TestItem};
pub use crate::tracker::{
    Frame, ImportError, ImportMachinery, Module, Tracker, TrackerConfig,
};
pub use crate::validator::{validate_subset, DepMismatch, ImportEnforcement};
