//! Shared fixtures: on-disk project trees for graph tests and a simulated
//! import machinery for tracker tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use testprune::tracker::{
    Frame, ImportError, ImportMachinery, Module, Tracker, IMPORT_MACHINERY_FILE,
};
use testprune::ZeroConfHook;

/// A temporary project tree rooted in a scratch directory.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Project {
            dir: TempDir::new().expect("scratch dir"),
        }
    }

    pub fn file(&self, rel: &str, content: &str) -> &Self {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().expect("parent dir")).expect("mkdir");
        fs::write(path, content).expect("write fixture");
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }
}

/// Hook over scratch-dir roots: `roots` maps relative root paths to
/// prefixes, `tests` marks local-scope roots.
pub fn hook(
    project: &Project,
    global: &[&str],
    local: &[&str],
    roots: &[(&str, &str)],
    test_dirs: &[(&str, &str)],
) -> ZeroConfHook {
    ZeroConfHook::new(
        global.iter().map(|s| s.to_string()).collect(),
        local.iter().map(|s| s.to_string()).collect(),
        roots
            .iter()
            .map(|(p, pre)| (project.path(p), pre.to_string()))
            .collect(),
        test_dirs
            .iter()
            .map(|(p, pre)| (project.path(p), pre.to_string()))
            .collect(),
    )
}

/// Scope key used by the graph for a local root: the configured root path.
pub fn scope_key(project: &Project, rel: &str) -> String {
    project.path(rel).display().to_string()
}

pub fn set(items: &[&str]) -> std::collections::HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ---- simulated import machinery ----

/// One statement in a simulated module body or function.
#[derive(Debug, Clone)]
pub enum Action {
    /// `import a.b.c`
    Import(String),
    /// `from X import a, b`
    FromImport(String, Vec<String>),
    /// `importlib.import_module("t")`
    ImportModule(String),
    /// `__import__("t")` literal call
    DunderImport(String),
    /// same as [`Action::Import`] inside try/except: failures are swallowed
    TryImport(String),
    /// call `module.function()`
    Call(String, String),
    /// raise at import time
    Fail(String),
}

pub fn imp(t: &str) -> Action {
    Action::Import(t.to_string())
}

pub fn from_imp(module: &str, names: &[&str]) -> Action {
    Action::FromImport(
        module.to_string(),
        names.iter().map(|s| s.to_string()).collect(),
    )
}

pub fn import_module(t: &str) -> Action {
    Action::ImportModule(t.to_string())
}

pub fn dunder_import(t: &str) -> Action {
    Action::DunderImport(t.to_string())
}

pub fn call(module: &str, function: &str) -> Action {
    Action::Call(module.to_string(), function.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct ModuleSpec {
    pub body: Vec<Action>,
    pub functions: HashMap<String, Vec<Action>>,
}

/// In-memory interpreter standing in for the host's import system. Modules
/// are registered with scripted bodies; loading executes the body, and every
/// nested import re-enters the tracker exactly like a real loader would.
#[derive(Default)]
pub struct SimHost {
    modules: BTreeMap<String, ModuleSpec>,
    loaded: BTreeSet<String>,
    frames: Vec<Frame>,
    /// `(module, selector)` pairs the tracker asked to wrap
    wrapped: Vec<(String, String)>,
    /// `(module, selector)` patches the tracker asked to apply
    pub patched: Vec<(String, String)>,
}

impl SimHost {
    pub fn new() -> Self {
        SimHost::default()
    }

    pub fn module(mut self, name: &str, body: Vec<Action>) -> Self {
        self.modules.insert(
            name.to_string(),
            ModuleSpec {
                body,
                functions: HashMap::new(),
            },
        );
        self
    }

    pub fn function(mut self, module: &str, function: &str, body: Vec<Action>) -> Self {
        self.modules
            .get_mut(module)
            .expect("module registered before functions")
            .functions
            .insert(function.to_string(), body);
        self
    }

    pub fn file_of(name: &str) -> String {
        format!("sim/{}.py", name.replace('.', "/"))
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    /// `import name` from the test driver.
    pub fn import_(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
    ) -> Result<Module, ImportError> {
        self.frames.push(Frame::new(
            "driver.py",
            "driver",
            format!("import {}", name),
        ));
        let result = tracker.on_find_and_load(name, self);
        self.frames.pop();
        result
    }

    /// `from module import names` from the test driver.
    pub fn from_import(
        &mut self,
        tracker: &mut Tracker,
        module: &str,
        names: &[&str],
    ) -> Result<(), ImportError> {
        let action = from_imp(module, names);
        self.frames.push(Frame::new(
            "driver.py",
            "driver",
            format!("from {} import ...", module),
        ));
        let result = self.run_action(tracker, None, "driver", &action);
        self.frames.pop();
        result
    }

    /// `importlib.import_module(name)` from the test driver.
    pub fn import_module(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
    ) -> Result<Module, ImportError> {
        self.frames.push(Frame::new(
            "driver.py",
            "driver",
            format!("import_module(\"{}\")", name),
        ));
        self.frames.push(Frame::new(
            "importlib/__init__.py",
            "import_module",
            "return _bootstrap._gcd_import(name)",
        ));
        let result = tracker.on_find_and_load(name, self);
        self.frames.pop();
        self.frames.pop();
        result
    }

    /// import-by-string through the tracker's public entry point.
    pub fn explicit_import(
        &mut self,
        tracker: &mut Tracker,
        name: &str,
    ) -> Result<Module, ImportError> {
        self.frames.push(Frame::new(
            "driver.py",
            "driver",
            format!("loader.import_by_name(\"{}\")", name),
        ));
        let result = tracker.on_import_call(name, self);
        self.frames.pop();
        result
    }

    /// call `module.function()` from the test driver.
    pub fn call_function(
        &mut self,
        tracker: &mut Tracker,
        module: &str,
        function: &str,
    ) -> Result<(), ImportError> {
        let action = call(module, function);
        self.frames
            .push(Frame::new("driver.py", "driver", format!("{}()", function)));
        let result = self.run_action(tracker, None, "driver", &action);
        self.frames.pop();
        result
    }

    fn run_body(&mut self, tracker: &mut Tracker, name: &str) -> Result<(), ImportError> {
        let body = self.modules[name].body.clone();
        for action in &body {
            self.run_action(tracker, Some(name), "<module>", action)?;
        }
        Ok(())
    }

    fn run_action(
        &mut self,
        tracker: &mut Tracker,
        in_module: Option<&str>,
        in_function: &str,
        action: &Action,
    ) -> Result<(), ImportError> {
        let file = in_module.map(|m| Self::file_of(m)).unwrap_or_else(|| "driver.py".to_string());
        match action {
            Action::Import(t) => {
                self.frames
                    .push(Frame::new(file.as_str(), in_function, format!("import {}", t)));
                let result = tracker.on_find_and_load(t, self);
                self.frames.pop();
                result.map(|_| ())
            }
            Action::TryImport(t) => {
                self.frames
                    .push(Frame::new(file.as_str(), in_function, format!("import {}", t)));
                let _ = tracker.on_find_and_load(t, self);
                self.frames.pop();
                Ok(())
            }
            Action::FromImport(module, names) => {
                self.frames.push(Frame::new(
                    file.as_str(),
                    in_function,
                    format!("from {} import ...", module),
                ));
                let result = (|| {
                    tracker.on_find_and_load(module, self)?;
                    for n in names {
                        let canonical = format!("{}.{}", module, n);
                        if self.modules.contains_key(&canonical) {
                            if self.loaded.contains(&canonical) {
                                tracker.on_from_import_binding(module, n, Some(&canonical));
                            } else {
                                tracker.on_find_and_load(&canonical, self)?;
                            }
                        }
                    }
                    Ok(())
                })();
                self.frames.pop();
                result
            }
            Action::ImportModule(t) => {
                self.frames.push(Frame::new(
                    file.as_str(),
                    in_function,
                    format!("import_module(\"{}\")", t),
                ));
                self.frames.push(Frame::new(
                    "importlib/__init__.py",
                    "import_module",
                    "return _bootstrap._gcd_import(name)",
                ));
                let result = tracker.on_find_and_load(t, self);
                self.frames.pop();
                self.frames.pop();
                result.map(|_| ())
            }
            Action::DunderImport(t) => {
                self.frames.push(Frame::new(
                    file.as_str(),
                    in_function,
                    format!("mod = __import__(\"{}\")", t),
                ));
                let result = tracker.on_find_and_load(t, self);
                self.frames.pop();
                result.map(|_| ())
            }
            Action::Call(module, function) => {
                self.frames
                    .push(Frame::new(file.as_str(), in_function, format!("{}()", function)));
                if self
                    .wrapped
                    .iter()
                    .any(|(m, f)| m == module && f == function)
                {
                    let stack = self.call_stack();
                    tracker.on_anchored_call(module, function, &stack);
                }
                let body = self
                    .modules
                    .get(module)
                    .and_then(|spec| spec.functions.get(function))
                    .cloned()
                    .unwrap_or_default();
                let result = (|| {
                    for action in &body {
                        self.run_action(tracker, Some(module), function, action)?;
                    }
                    Ok(())
                })();
                self.frames.pop();
                result
            }
            Action::Fail(message) => Err(ImportError::ExecutionFailed {
                module: in_module.unwrap_or("driver").to_string(),
                message: message.clone(),
            }),
        }
    }
}

impl ImportMachinery for SimHost {
    fn load(&mut self, tracker: &mut Tracker, name: &str) -> Result<Module, ImportError> {
        if !self.modules.contains_key(name) {
            return Err(ImportError::NotFound(name.to_string()));
        }
        if self.loaded.contains(name) {
            return Ok(Module {
                name: name.to_string(),
                file: Some(Self::file_of(name)),
            });
        }
        // implicit parent-package load, short-circuited by the cache exactly
        // like a real loader
        if let Some((parent, _)) = name.rsplit_once('.') {
            if !self.loaded.contains(parent) {
                self.frames.push(Frame::new(
                    IMPORT_MACHINERY_FILE,
                    "_find_and_load_unlocked",
                    "",
                ));
                let result = tracker.on_find_and_load(parent, self);
                self.frames.pop();
                result?;
            }
        }
        // registered before the body runs, so cyclic imports see the
        // partially initialized module instead of recursing forever
        self.loaded.insert(name.to_string());
        if let Err(err) = self.run_body(tracker, name) {
            self.loaded.remove(name);
            return Err(ImportError::ExecutionFailed {
                module: name.to_string(),
                message: err.to_string(),
            });
        }
        Ok(Module {
            name: name.to_string(),
            file: Some(Self::file_of(name)),
        })
    }

    fn call_stack(&self) -> Vec<Frame> {
        self.frames.clone()
    }

    fn module_file(&self, name: &str) -> Option<String> {
        if self.modules.contains_key(name) {
            Some(Self::file_of(name))
        } else {
            None
        }
    }

    fn apply_patch(&mut self, module: &str, selector: &str) {
        self.patched.push((module.to_string(), selector.to_string()));
    }

    fn wrap_anchor(&mut self, module: &str, selector: &str) {
        // selectors may be `name` or `obj.attr`; calls report the bare name
        let bare = selector.rsplit('.').next().unwrap_or(selector).to_string();
        self.wrapped.push((module.to_string(), bare));
    }
}
