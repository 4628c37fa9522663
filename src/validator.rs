//! Cross-checking runtime-tracked imports against the static graph.
//!
//! The static parser over-approximates (it records imports in branches that
//! never execute), so extra graph deps are expected. What must never happen
//! is the reverse: a module observed at runtime that the graph missed, since
//! that would let a modified file skip tests it actually affects.

use crate::errors::Error;
use crate::graph::ModuleGraph;
use crate::tracker::{omit_tracker_frames, Frame, Tracker};
use std::collections::{BTreeSet, HashSet};

/// A module whose runtime imports exceed the graph's prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepMismatch {
    pub module: String,
    /// Runtime deps the graph does not know about.
    pub missing: BTreeSet<String>,
    pub graph_count: usize,
    pub tracked_count: usize,
}

/// Compare every tracked module accepted by `filter` against the graph.
/// `package` qualifies local-scope lookups.
pub fn validate_subset<F>(
    tracker: &Tracker,
    graph: &ModuleGraph,
    package: Option<&str>,
    filter: F,
) -> Vec<DepMismatch>
where
    F: Fn(&str) -> bool,
{
    let mut mismatches = Vec::new();
    for module in tracker.modules() {
        if !filter(&module) {
            continue;
        }
        let Some(tracked) = tracker.with_dynamic(&module) else {
            continue;
        };
        let predicted = graph
            .module_depends_on(&module, package)
            .unwrap_or_default();
        let missing: BTreeSet<String> = tracked
            .iter()
            .filter(|d| !predicted.contains(*d) && **d != module)
            .cloned()
            .collect();
        if !missing.is_empty() {
            log::warn!(
                "{}: graph {} / tracked {}: graph missing {:?}",
                module,
                predicted.len(),
                tracked.len(),
                missing
            );
            mismatches.push(DepMismatch {
                module,
                graph_count: predicted.len(),
                tracked_count: tracked.len(),
                missing,
            });
        }
    }
    mismatches
}

/// What to do when a test performs an import the graph did not predict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportEnforcement {
    /// Raise a distinguished error with tracker frames trimmed out.
    Fail,
    /// Log a warning pointing at the deepest non-tracker frame.
    Warn,
}

/// Enforce that `imported` was predicted for `module`. The reported frame
/// list excludes tracker and import-machinery internals in both policies.
pub fn check_unexpected_import(
    module: &str,
    predicted: &HashSet<String>,
    imported: &str,
    stack: &[Frame],
    policy: ImportEnforcement,
) -> Result<(), Error> {
    if predicted.contains(imported) || imported == module {
        return Ok(());
    }
    let frames = omit_tracker_frames(stack);
    match policy {
        ImportEnforcement::Fail => Err(Error::UnexpectedImport {
            module: imported.to_string(),
            frames,
        }),
        ImportEnforcement::Warn => {
            let at = frames
                .last()
                .map(|f| format!("{} ({})", f.file, f.function))
                .unwrap_or_else(|| "<unknown>".to_string());
            log::warn!(
                "unexpected import of {} while running {} at {}",
                imported,
                module,
                at
            );
            Ok(())
        }
    }
}
