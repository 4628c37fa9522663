//! Import extraction from Python AST.
//!
//! Walks every statement in the module, including function and class bodies,
//! so imports that only execute on rarely-taken branches are still recorded.
//! Better to report a dependency that never materializes at runtime than to
//! miss one that does.

use crate::core::ImportRef;
use anyhow::{anyhow, Result};
use rustpython_parser::ast;
use std::path::Path;

/// Extract all raw import references from Python source.
pub fn extract_imports(content: &str, path: &Path) -> Result<Vec<ImportRef>> {
    let module = rustpython_parser::parse(
        content,
        rustpython_parser::Mode::Module,
        &path.display().to_string(),
    )
    .map_err(|e| anyhow!("parse error: {:?}", e))?;

    let mut out = Vec::new();
    if let ast::Mod::Module(module) = &module {
        for stmt in &module.body {
            collect_stmt(stmt, false, &mut out);
        }
    }
    Ok(out)
}

fn collect_stmt(stmt: &ast::Stmt, typechecking: bool, out: &mut Vec<ImportRef>) {
    match stmt {
        ast::Stmt::Import(import) => {
            for alias in &import.names {
                out.push(flagged(
                    ImportRef::absolute(alias.name.as_str()),
                    typechecking,
                ));
            }
        }
        ast::Stmt::ImportFrom(import_from) => {
            let level = import_from.level.map(|l| l.to_usize() as u32).unwrap_or(0);
            let module = import_from
                .module
                .as_ref()
                .map(|m| m.as_str())
                .unwrap_or("");
            for alias in &import_from.names {
                let name = alias.name.as_str();
                if name == "*" {
                    // star import depends on the module itself
                    let mut r = ImportRef::absolute(module);
                    r.level = level;
                    out.push(flagged(r, typechecking));
                } else {
                    let target = if module.is_empty() {
                        name.to_string()
                    } else {
                        format!("{}.{}", module, name)
                    };
                    out.push(flagged(ImportRef::from_import(target, level), typechecking));
                }
            }
        }
        ast::Stmt::If(if_stmt) => {
            let gated = is_typechecking_guard(&if_stmt.test);
            for s in &if_stmt.body {
                collect_stmt(s, typechecking || gated, out);
            }
            for s in &if_stmt.orelse {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::FunctionDef(f) => {
            for s in &f.body {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::AsyncFunctionDef(f) => {
            for s in &f.body {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::ClassDef(c) => {
            for s in &c.body {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::While(w) => {
            collect_expr(&w.test, typechecking, out);
            for s in &w.body {
                collect_stmt(s, typechecking, out);
            }
            for s in &w.orelse {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::For(f) => {
            collect_expr(&f.iter, typechecking, out);
            for s in &f.body {
                collect_stmt(s, typechecking, out);
            }
            for s in &f.orelse {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::With(w) => {
            for item in &w.items {
                collect_expr(&item.context_expr, typechecking, out);
            }
            for s in &w.body {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::AsyncWith(w) => {
            for item in &w.items {
                collect_expr(&item.context_expr, typechecking, out);
            }
            for s in &w.body {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::AsyncFor(f) => {
            collect_expr(&f.iter, typechecking, out);
            for s in &f.body {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::Try(t) => {
            for s in &t.body {
                collect_stmt(s, typechecking, out);
            }
            for handler in &t.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                for s in &h.body {
                    collect_stmt(s, typechecking, out);
                }
            }
            for s in &t.orelse {
                collect_stmt(s, typechecking, out);
            }
            for s in &t.finalbody {
                collect_stmt(s, typechecking, out);
            }
        }
        ast::Stmt::Expr(e) => collect_expr(&e.value, typechecking, out),
        ast::Stmt::Assign(a) => collect_expr(&a.value, typechecking, out),
        ast::Stmt::AugAssign(a) => collect_expr(&a.value, typechecking, out),
        ast::Stmt::AnnAssign(a) => {
            if let Some(value) = &a.value {
                collect_expr(value, typechecking, out);
            }
        }
        ast::Stmt::Return(r) => {
            if let Some(value) = &r.value {
                collect_expr(value, typechecking, out);
            }
        }
        _ => {}
    }
}

/// Detect dynamic import call sites inside expressions.
///
/// A `__import__` call always contributes a raw `__import__` reference (only
/// resolvable through external prefixes); a string-literal first argument of
/// either `__import__` or `import_module` additionally names the loaded
/// module.
fn collect_expr(expr: &ast::Expr, typechecking: bool, out: &mut Vec<ImportRef>) {
    match expr {
        ast::Expr::Call(call) => {
            match call.func.as_ref() {
                ast::Expr::Name(name) if name.id.as_str() == "__import__" => {
                    out.push(flagged(ImportRef::absolute("__import__"), typechecking));
                    if let Some(target) = call.args.first().and_then(string_literal) {
                        out.push(flagged(ImportRef::dynamic(target), typechecking));
                    }
                }
                ast::Expr::Attribute(attr) if attr.attr.as_str() == "__import__" => {
                    out.push(flagged(ImportRef::absolute("__import__"), typechecking));
                    if let Some(target) = call.args.first().and_then(string_literal) {
                        out.push(flagged(ImportRef::dynamic(target), typechecking));
                    }
                }
                ast::Expr::Name(name) if name.id.as_str() == "import_module" => {
                    if let Some(target) = call.args.first().and_then(string_literal) {
                        out.push(flagged(ImportRef::dynamic(target), typechecking));
                    }
                }
                ast::Expr::Attribute(attr) if attr.attr.as_str() == "import_module" => {
                    if let Some(target) = call.args.first().and_then(string_literal) {
                        out.push(flagged(ImportRef::dynamic(target), typechecking));
                    }
                }
                func => collect_expr(func, typechecking, out),
            }
            for arg in &call.args {
                collect_expr(arg, typechecking, out);
            }
        }
        ast::Expr::BinOp(b) => {
            collect_expr(&b.left, typechecking, out);
            collect_expr(&b.right, typechecking, out);
        }
        ast::Expr::BoolOp(b) => {
            for v in &b.values {
                collect_expr(v, typechecking, out);
            }
        }
        ast::Expr::UnaryOp(u) => collect_expr(&u.operand, typechecking, out),
        ast::Expr::Lambda(l) => collect_expr(&l.body, typechecking, out),
        ast::Expr::IfExp(e) => {
            collect_expr(&e.test, typechecking, out);
            collect_expr(&e.body, typechecking, out);
            collect_expr(&e.orelse, typechecking, out);
        }
        ast::Expr::ListComp(c) => {
            collect_expr(&c.elt, typechecking, out);
            for g in &c.generators {
                collect_expr(&g.iter, typechecking, out);
            }
        }
        ast::Expr::SetComp(c) => {
            collect_expr(&c.elt, typechecking, out);
            for g in &c.generators {
                collect_expr(&g.iter, typechecking, out);
            }
        }
        ast::Expr::DictComp(c) => {
            collect_expr(&c.key, typechecking, out);
            collect_expr(&c.value, typechecking, out);
            for g in &c.generators {
                collect_expr(&g.iter, typechecking, out);
            }
        }
        ast::Expr::GeneratorExp(c) => {
            collect_expr(&c.elt, typechecking, out);
            for g in &c.generators {
                collect_expr(&g.iter, typechecking, out);
            }
        }
        ast::Expr::List(l) => {
            for e in &l.elts {
                collect_expr(e, typechecking, out);
            }
        }
        ast::Expr::Tuple(t) => {
            for e in &t.elts {
                collect_expr(e, typechecking, out);
            }
        }
        ast::Expr::Dict(d) => {
            for k in d.keys.iter().flatten() {
                collect_expr(k, typechecking, out);
            }
            for v in &d.values {
                collect_expr(v, typechecking, out);
            }
        }
        ast::Expr::Await(a) => collect_expr(&a.value, typechecking, out),
        ast::Expr::Starred(s) => collect_expr(&s.value, typechecking, out),
        ast::Expr::Attribute(a) => collect_expr(&a.value, typechecking, out),
        ast::Expr::Subscript(s) => {
            collect_expr(&s.value, typechecking, out);
            collect_expr(&s.slice, typechecking, out);
        }
        _ => {}
    }
}

fn string_literal(expr: &ast::Expr) -> Option<String> {
    if let ast::Expr::Constant(constant) = expr {
        if let ast::Constant::Str(s) = &constant.value {
            return Some(s.to_string());
        }
    }
    None
}

/// `if TYPE_CHECKING:` or `if typing.TYPE_CHECKING:`
fn is_typechecking_guard(test: &ast::Expr) -> bool {
    match test {
        ast::Expr::Name(name) => name.id.as_str() == "TYPE_CHECKING",
        ast::Expr::Attribute(attr) => {
            attr.attr.as_str() == "TYPE_CHECKING"
                && matches!(attr.value.as_ref(), ast::Expr::Name(n) if n.id.as_str() == "typing")
        }
        _ => false,
    }
}

fn flagged(r: ImportRef, typechecking: bool) -> ImportRef {
    if typechecking {
        r.typechecking()
    } else {
        r
    }
}
