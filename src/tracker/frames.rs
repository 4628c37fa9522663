//! Abstract stack frames for dynamic-import classification.
//!
//! The host supplies its call stack as `(file, function, source line)`
//! triples, deepest frame last. Classification must not depend on how the
//! host hooks its import pipeline, only on these frames.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Function names recognized as dynamic import entry points when they appear
/// on the stack: the platform's import-by-name callables.
pub(crate) static DYNAMIC_ENTRY_FUNCTIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["import_module", "load_module"]));

/// Marker file name hosts use for frames internal to their import machinery.
/// Such frames are invisible to classification and trimmed from reported
/// backtraces.
pub const IMPORT_MACHINERY_FILE: &str = "<import-machinery>";

/// Marker file name for frames belonging to the tracker itself.
pub const TRACKER_FILE: &str = "<tracker>";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub file: String,
    pub function: String,
    /// Source text of the frame's current line, used to spot literal
    /// `__import__(` call sites that leave no named frame behind.
    pub line: String,
}

impl Frame {
    pub fn new(
        file: impl Into<String>,
        function: impl Into<String>,
        line: impl Into<String>,
    ) -> Self {
        Frame {
            file: file.into(),
            function: function.into(),
            line: line.into(),
        }
    }
}

pub(crate) fn is_machinery_frame(frame: &Frame) -> bool {
    frame.file == IMPORT_MACHINERY_FILE
        || frame.file == TRACKER_FILE
        || frame.file.starts_with("<frozen importlib")
}

/// Remove frames belonging to the import machinery or the tracker's hooks
/// into it, so reported errors show only code the user wrote.
pub fn omit_tracker_frames(frames: &[Frame]) -> Vec<Frame> {
    frames
        .iter()
        .filter(|f| !is_machinery_frame(f))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_omit_tracker_frames() {
        let frames = vec![
            Frame::new("app/main.py", "<module>", "import app.util"),
            Frame::new(IMPORT_MACHINERY_FILE, "_find_and_load", ""),
            Frame::new(TRACKER_FILE, "on_find_and_load", ""),
            Frame::new("<frozen importlib._bootstrap>", "_gcd_import", ""),
            Frame::new("app/util.py", "<module>", "import json"),
        ];
        let trimmed = omit_tracker_frames(&frames);
        assert_eq!(trimmed.len(), 2);
        assert!(trimmed.iter().all(|f| f.file.ends_with(".py")));
    }
}
