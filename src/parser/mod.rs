//! Python source parsing: module id inference and raw import extraction.
//!
//! The parser is deliberately forgiving: malformed source never fails the
//! build, it yields a [`ParsedFile`] flagged `malformed` that the graph
//! reports through `unresolved()`.

pub mod imports;
pub mod layout;

pub use imports::extract_imports;
pub use layout::{is_namespace_init, module_id_for, resolve_root, SourceRoot};

use crate::core::{FileKind, ParsedFile};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse one source file into its module id and raw import references.
///
/// `module_id` must already be inferred from the file's source root (see
/// [`layout::module_id_for`]); this function only reads and parses the file.
pub fn parse_file(path: &Path, module_id: &str) -> Result<ParsedFile> {
    let kind = match path.extension().and_then(|e| e.to_str()) {
        Some("pyi") => FileKind::Interface,
        _ => FileKind::Source,
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_source(&content, path, module_id, kind))
}

/// Parse already-loaded source. Never fails: unparseable content produces a
/// `malformed` record with no imports.
pub fn parse_source(content: &str, path: &Path, module_id: &str, kind: FileKind) -> ParsedFile {
    match extract_imports(content, path) {
        Ok(imports) => ParsedFile {
            module_id: module_id.to_string(),
            path: path.to_path_buf(),
            kind,
            imports,
            malformed: false,
        },
        Err(err) => {
            log::warn!("skipping malformed source {}: {}", path.display(), err);
            ParsedFile {
                module_id: module_id.to_string(),
                path: path.to_path_buf(),
                kind,
                imports: Vec::new(),
                malformed: true,
            }
        }
    }
}
