//! Typed errors for graph mutation and tracker bookkeeping.
//!
//! Construction and I/O paths use `anyhow::Result` and attach context at the
//! call site; the enum below covers the conditions callers are expected to
//! match on.

use std::path::PathBuf;
use thiserror::Error;

use crate::tracker::Frame;

#[derive(Debug, Error)]
pub enum Error {
    /// Dynamic-dependency overlay targets must resolve to a known module.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// Dynamic-dependency overlay targets must be leaves of the dependency
    /// graph (no resolved direct deps beyond their own ancestor packages).
    #[error("not a leaf module: {id} (direct deps: {deps:?})")]
    NotALeaf { id: String, deps: Vec<String> },

    #[error("mismatching context entry/exit: {actual} != {expected}")]
    ContextMismatch { actual: String, expected: String },

    /// An import executed at test time that the graph did not predict.
    /// The frame list has tracker and import-machinery internals removed.
    #[error("unexpected import of {module} (predicted deps do not include it)")]
    UnexpectedImport { module: String, frames: Vec<Frame> },

    #[error("graph file {path} has unsupported format version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("{path} is not a graph file")]
    BadMagic { path: PathBuf },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
