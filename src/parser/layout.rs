//! Filesystem layout: source roots, module id inference, namespace packages.

use anyhow::{anyhow, Result};
use rustpython_parser::ast;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One `{filesystem path → module prefix}` binding. The prefix may be empty
/// for roots whose children are top-level modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRoot {
    pub path: PathBuf,
    pub prefix: String,
}

impl SourceRoot {
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        SourceRoot {
            path: path.into(),
            prefix: prefix.into(),
        }
    }
}

/// Infer the dotted module id of `path` from the longest matching source
/// root. `foo/bar.py` under root `(foo, "pkg")` becomes `pkg.bar`;
/// `__init__` collapses to the owning package id.
pub fn module_id_for(roots: &[SourceRoot], path: &Path) -> Option<String> {
    let root = roots
        .iter()
        .filter(|r| path.starts_with(&r.path))
        .max_by_key(|r| r.path.as_os_str().len())?;
    let rel = path.strip_prefix(&root.path).ok()?;
    module_id_under(&root.prefix, rel)
}

/// Module id for a path relative to a root with the given prefix.
pub fn module_id_under(prefix: &str, rel: &Path) -> Option<String> {
    let mut parts: Vec<String> = if prefix.is_empty() {
        Vec::new()
    } else {
        prefix.split('.').map(str::to_string).collect()
    };
    let components: Vec<&str> = rel.iter().map(|c| c.to_str().unwrap_or("")).collect();
    for (i, comp) in components.iter().enumerate() {
        if i + 1 == components.len() {
            let stem = comp
                .strip_suffix(".pyi")
                .or_else(|| comp.strip_suffix(".py"))
                .unwrap_or(comp);
            if stem != "__init__" {
                parts.push(stem.to_string());
            }
        } else {
            parts.push(comp.to_string());
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

/// Descend through single-child namespace-package chains to the first
/// regular package, folding the skipped components into the prefix.
///
/// A namespace package is recognized by an `__init__.py` whose only
/// executable content is the standard namespace-extension stanza.
pub fn resolve_root(path: &Path, prefix: &str) -> Result<(PathBuf, String)> {
    let mut path = path.to_path_buf();
    let mut prefix = prefix.to_string();
    loop {
        let init = path.join("__init__.py");
        if !init.exists() {
            return Ok((path, prefix));
        }
        let content = std::fs::read_to_string(&init)
            .map_err(|e| anyhow!("failed to read {}: {}", init.display(), e))?;
        if !is_namespace_init(&content) {
            return Ok((path, prefix));
        }
        match single_child_package(&path)? {
            Some(child) => {
                let name = child
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow!("bad directory name under {}", path.display()))?
                    .to_string();
                prefix = if prefix.is_empty() {
                    name
                } else {
                    format!("{}.{}", prefix, name)
                };
                path = child;
            }
            None => return Ok((path, prefix)),
        }
    }
}

/// The unique child package directory, if the directory holds nothing else.
fn single_child_package(dir: &Path) -> Result<Option<PathBuf>> {
    let mut child = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if path.join("__init__.py").exists() {
                if child.is_some() {
                    return Ok(None);
                }
                child = Some(path);
            }
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if (name.ends_with(".py") || name.ends_with(".pyi")) && name != "__init__.py" {
                return Ok(None);
            }
        }
    }
    Ok(child)
}

/// Whether an `__init__.py` contains only the namespace-extension stanza
/// (docstring, pkgutil/pkg_resources imports, `extend_path` assignment or
/// `declare_namespace` call).
pub fn is_namespace_init(content: &str) -> bool {
    let module = match rustpython_parser::parse(content, rustpython_parser::Mode::Module, "__init__.py")
    {
        Ok(m) => m,
        Err(_) => return false,
    };
    let ast::Mod::Module(module) = &module else {
        return false;
    };
    let mut saw_stanza = false;
    for stmt in &module.body {
        match stmt {
            ast::Stmt::Import(import) => {
                if !import
                    .names
                    .iter()
                    .all(|a| matches!(a.name.as_str(), "pkgutil" | "pkg_resources"))
                {
                    return false;
                }
            }
            ast::Stmt::ImportFrom(import_from) => {
                let module = import_from.module.as_ref().map(|m| m.as_str()).unwrap_or("");
                if !matches!(module, "pkgutil" | "pkg_resources") {
                    return false;
                }
            }
            ast::Stmt::Assign(assign) => {
                let to_path = assign.targets.iter().any(
                    |t| matches!(t, ast::Expr::Name(n) if n.id.as_str() == "__path__"),
                );
                if to_path && is_ns_call(&assign.value, "extend_path") {
                    saw_stanza = true;
                } else {
                    return false;
                }
            }
            ast::Stmt::Expr(e) => match e.value.as_ref() {
                // docstring
                ast::Expr::Constant(c) if matches!(c.value, ast::Constant::Str(_)) => {}
                call @ ast::Expr::Call(_) if is_ns_call(call, "declare_namespace") => {
                    saw_stanza = true;
                }
                _ => return false,
            },
            _ => return false,
        }
    }
    saw_stanza
}

fn is_ns_call(expr: &ast::Expr, fn_name: &str) -> bool {
    let ast::Expr::Call(call) = expr else {
        return false;
    };
    match call.func.as_ref() {
        ast::Expr::Name(n) => n.id.as_str() == fn_name,
        ast::Expr::Attribute(a) => a.attr.as_str() == fn_name,
        _ => false,
    }
}
