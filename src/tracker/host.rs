//! Host import-machinery abstraction.
//!
//! The tracker instruments whatever module loader the host language exposes.
//! The seam is this trait: the tracker owns bookkeeping, the host owns module
//! resolution, execution and its own cache. Nested imports performed while a
//! module body executes must re-enter the tracker through
//! [`crate::tracker::Tracker::on_find_and_load`], which is what lets the
//! state machine observe the full load tree.

use super::frames::Frame;
use super::Tracker;
use thiserror::Error;

/// A successfully loaded module handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    /// Backing file, when the host knows one (`__file__`-equivalent).
    pub file: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum ImportError {
    #[error("no module named {0}")]
    NotFound(String),
    #[error("error while importing {module}: {message}")]
    ExecutionFailed { module: String, message: String },
}

impl ImportError {
    pub fn module(&self) -> &str {
        match self {
            ImportError::NotFound(name) => name,
            ImportError::ExecutionFailed { module, .. } => module,
        }
    }
}

/// The host side of the tracker seam.
pub trait ImportMachinery {
    /// Resolve and execute a module, consulting the host's module cache.
    /// Body execution re-enters the tracker for each nested import.
    fn load(&mut self, tracker: &mut Tracker, name: &str) -> Result<Module, ImportError>;

    /// Current call stack, deepest frame last.
    fn call_stack(&self) -> Vec<Frame>;

    /// Backing file of a module the host can already name, before the module
    /// finishes loading. Lets the classifier resolve frames of modules whose
    /// bodies are still executing.
    fn module_file(&self, _name: &str) -> Option<String> {
        None
    }

    /// Apply one configured attribute patch to a freshly loaded module.
    fn apply_patch(&mut self, _module: &str, _selector: &str) {}

    /// Wrap an anchored function (`name` or `obj.attr` selector) so its
    /// invocations report back through
    /// [`crate::tracker::Tracker::on_anchored_call`].
    fn wrap_anchor(&mut self, _module: &str, _selector: &str) {}
}
