//! Runtime import tracking.
//!
//! Hooks the host's module loader (see [`ImportMachinery`]) and records, per
//! in-flight module, the complete transitive set of modules imported as a
//! side effect of loading it. Import cycles are consolidated on the fly: all
//! members of a cycle end up holding the *same* dep-set object, so later
//! insertions made through any member are visible to the rest without
//! re-walking the cycle.
//!
//! The tracker is single-threaded by construction: it piggy-backs on the
//! host's import lock and every state update happens on the thread performing
//! the import.

pub mod frames;
pub mod host;

pub use frames::{omit_tracker_frames, Frame, IMPORT_MACHINERY_FILE, TRACKER_FILE};
pub use host::{ImportError, ImportMachinery, Module};

use crate::core::{parent_package, top_level};
use crate::errors::Error;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

/// Shared transitive-dependency set. Cycle members alias one another's sets;
/// `Rc::ptr_eq` is the consolidation invariant.
pub type DepSet = Rc<RefCell<HashSet<String>>>;

/// `(module, function)` attribution point for dynamic imports.
pub type Anchor = (String, String);

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Top-level namespaces to track; everything else is forwarded untouched.
    pub prefixes: HashSet<String>,
    /// `{module → attribute selectors}` applied right after a module loads.
    pub patches: BTreeMap<String, Vec<String>>,
    /// Classify and attribute dynamic imports.
    pub record_dynamic: bool,
    pub dynamic_anchors: BTreeMap<String, BTreeSet<String>>,
    pub dynamic_ignores: BTreeMap<String, BTreeSet<String>>,
    /// Functions marking a harness-driven import (e.g. the validator's
    /// capture wrapper); dynamic entries directly below one are static.
    pub context_functions: HashSet<String>,
    /// Per-import trace logging.
    pub log: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            prefixes: HashSet::new(),
            patches: BTreeMap::new(),
            record_dynamic: false,
            dynamic_anchors: BTreeMap::new(),
            dynamic_ignores: BTreeMap::new(),
            context_functions: HashSet::from(["import_with_capture".to_string()]),
            log: false,
        }
    }
}

impl TrackerConfig {
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TrackerConfig {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn from_hook(hook: &dyn crate::hook::TrackerHook) -> Self {
        let mut prefixes: HashSet<String> = hook.global_namespaces().into_iter().collect();
        prefixes.extend(hook.local_namespaces());
        TrackerConfig {
            prefixes,
            patches: hook.import_patches(),
            record_dynamic: hook.record_dynamic(),
            dynamic_anchors: hook.dynamic_anchors(),
            dynamic_ignores: hook.dynamic_ignores(),
            log: hook.tracker_log(),
            ..Default::default()
        }
    }
}

pub struct Tracker {
    cfg: TrackerConfig,
    /// Currently-loading module ids; index 0 is the root context "".
    stack: Vec<String>,
    /// Dep set of the top of `stack`.
    cxt: DepSet,
    tracked: HashMap<String, DepSet>,
    /// Backtraces of dynamic imports nobody claimed.
    dynamic: Vec<Vec<Frame>>,
    /// Stack height of the previous dynamic import, bounding nested
    /// classification walks.
    dynamic_stack: usize,
    dynamic_imports: HashMap<Anchor, HashSet<String>>,
    dynamic_users: HashMap<String, HashSet<Anchor>>,
    file_to_module: HashMap<String, String>,
    /// Set by [`Tracker::on_import_call`] for the next load.
    explicit_call: bool,
}

impl Tracker {
    pub fn new(cfg: TrackerConfig) -> Self {
        let cxt: DepSet = Rc::new(RefCell::new(HashSet::new()));
        let mut tracked = HashMap::new();
        tracked.insert(String::new(), cxt.clone());
        Tracker {
            cfg,
            stack: vec![String::new()],
            cxt,
            tracked,
            dynamic: Vec::new(),
            dynamic_stack: 0,
            dynamic_imports: HashMap::new(),
            dynamic_users: HashMap::new(),
            file_to_module: HashMap::new(),
            explicit_call: false,
        }
    }

    /// Register modules that were already loaded when tracking started:
    /// their files become resolvable and anchored functions get wrapped.
    pub fn prime_loaded(
        &mut self,
        modules: &[(String, Option<String>)],
        host: &mut dyn ImportMachinery,
    ) {
        for (name, file) in modules {
            if let Some(file) = file {
                self.file_to_module.insert(file.clone(), name.clone());
            }
            if let Some(selectors) = self.cfg.dynamic_anchors.get(name).cloned() {
                for selector in selectors {
                    host.wrap_anchor(name, &selector);
                }
            }
        }
    }

    /// Primary hook: fires for every load request, before the host's module
    /// cache check, including implicit parent-package loads.
    pub fn on_find_and_load(
        &mut self,
        name: &str,
        host: &mut dyn ImportMachinery,
    ) -> Result<Module, ImportError> {
        let explicit = std::mem::take(&mut self.explicit_call);
        if !self.cfg.prefixes.contains(top_level(name)) {
            return host.load(self, name);
        }

        let classified = if self.cfg.record_dynamic {
            self.classify_dynamic(&host.call_stack(), explicit)
        } else {
            None
        };
        let Some((prev_height, anchor)) = classified else {
            return self.find_and_load_inner(name, host);
        };

        let dynamic_base = anchor.as_ref().map(|_| self.cxt.borrow().clone());
        if let Some(anchor) = &anchor {
            // the in-flight parent uses this anchor; it cannot be resolved
            // from frames yet because its file may not be mapped
            let parent = self.stack.last().cloned().unwrap_or_default();
            self.trace(format_args!("use from {}", parent));
            self.dynamic_users
                .entry(parent)
                .or_default()
                .insert(anchor.clone());
        }

        let result = self.find_and_load_inner(name, host);

        self.dynamic_stack = prev_height;
        if let (Some(anchor), Some(base)) = (anchor, dynamic_base) {
            let added: Vec<String> = self
                .cxt
                .borrow()
                .iter()
                .filter(|m| !base.contains(*m))
                .cloned()
                .collect();
            self.dynamic_imports.entry(anchor).or_default().extend(added);
        }
        result
    }

    /// Public import-by-string entry point; marks the load as explicitly
    /// dynamic so classification does not depend on frame inspection alone.
    pub fn on_import_call(
        &mut self,
        name: &str,
        host: &mut dyn ImportMachinery,
    ) -> Result<Module, ImportError> {
        self.explicit_call = true;
        let result = self.on_find_and_load(name, host);
        self.explicit_call = false;
        result
    }

    /// Repeat `from X import Y` statements bypass the load hook once `Y` is
    /// cached; the host reports the bindings so submodules still land in the
    /// current context.
    pub fn on_from_import_binding(&mut self, module: &str, name: &str, canonical: Option<&str>) {
        if !self.cfg.prefixes.contains(top_level(module)) {
            return;
        }
        let Some(canonical) = canonical else { return };
        let from_name = format!("{}.{}", module, name);
        if canonical != from_name && !self.cfg.prefixes.contains(top_level(canonical)) {
            return;
        }
        self.trace(format_args!("tracked: {} [fromlist: {}]", canonical, from_name));
        self.cxt.borrow_mut().insert(canonical.to_string());
        if let Some(deps) = self.tracked.get(canonical).cloned() {
            if !Rc::ptr_eq(&deps, &self.cxt) {
                let extra: Vec<String> = deps.borrow().iter().cloned().collect();
                self.cxt.borrow_mut().extend(extra);
            }
        }
    }

    /// Reported by the host when an anchored function runs: every
    /// tracked-prefix caller on the stack becomes a user of the anchor.
    pub fn on_anchored_call(&mut self, module: &str, function: &str, stack: &[Frame]) {
        self.trace(format_args!("use: ({}, {})", module, function));
        for frame in stack {
            let Some(caller) = self.file_to_module.get(&frame.file) else {
                continue;
            };
            if self.cfg.prefixes.contains(top_level(caller)) {
                self.dynamic_users
                    .entry(caller.clone())
                    .or_default()
                    .insert((module.to_string(), function.to_string()));
            }
        }
    }

    /// Attribute subsequent imports to `name`, e.g. while a test harness
    /// loads a file on behalf of the interpreter.
    pub fn enter_context(&mut self, name: &str) {
        self.stack.push(name.to_string());
        let set = self
            .tracked
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(HashSet::new())))
            .clone();
        self.cxt = set;
    }

    /// Leave a context entered with [`Tracker::enter_context`]. Fails with
    /// the actual vs expected names on mismatch.
    pub fn exit_context(&mut self, expected: &str) -> Result<(), Error> {
        let actual = self.stack.pop().unwrap_or_default();
        if actual != expected {
            return Err(Error::ContextMismatch {
                actual,
                expected: expected.to_string(),
            });
        }
        let top = self.stack.last().cloned().unwrap_or_default();
        let set = self
            .tracked
            .entry(top)
            .or_insert_with(|| Rc::new(RefCell::new(HashSet::new())))
            .clone();
        self.cxt = set;
        Ok(())
    }

    /// Transitive deps of `m` plus everything its dynamic anchors loaded.
    pub fn with_dynamic(&self, m: &str) -> Option<HashSet<String>> {
        let base = self.tracked.get(m)?;
        let mut out = base.borrow().clone();
        if let Some(anchors) = self.dynamic_users.get(m) {
            for anchor in anchors {
                if let Some(imports) = self.dynamic_imports.get(anchor) {
                    out.extend(imports.iter().cloned());
                }
            }
        }
        Some(out)
    }

    /// Snapshot of the transitive deps recorded for `m`.
    pub fn deps_of(&self, m: &str) -> Option<HashSet<String>> {
        self.tracked.get(m).map(|s| s.borrow().clone())
    }

    /// All tracked module ids (the synthetic root context excluded).
    pub fn modules(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .tracked
            .keys()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Whether two modules share one dep-set object, i.e. were consolidated
    /// into the same import cycle.
    pub fn shares_deps(&self, a: &str, b: &str) -> bool {
        match (self.tracked.get(a), self.tracked.get(b)) {
            (Some(sa), Some(sb)) => Rc::ptr_eq(sa, sb),
            _ => false,
        }
    }

    pub fn dynamic_imports_of(&self, anchor: &Anchor) -> Option<&HashSet<String>> {
        self.dynamic_imports.get(anchor)
    }

    pub fn dynamic_users_of(&self, m: &str) -> Option<&HashSet<Anchor>> {
        self.dynamic_users.get(m)
    }

    /// Backtraces of dynamic imports that no anchor claimed.
    pub fn unattributed_dynamic(&self) -> &[Vec<Frame>] {
        &self.dynamic
    }

    /// Drop tracking state for one module (validator cleanup between
    /// packages sharing a local namespace).
    pub fn forget(&mut self, m: &str) {
        self.tracked.remove(m);
        self.dynamic_users.remove(m);
    }

    // ---- state machine internals ----

    fn find_and_load_inner(
        &mut self,
        name: &str,
        host: &mut dyn ImportMachinery,
    ) -> Result<Module, ImportError> {
        let mut new_context = false;
        self.cxt.borrow_mut().insert(name.to_string());
        self.trace(format_args!(
            "tracked:{}{}",
            " ".repeat(self.stack.len()),
            name
        ));

        if self.tracked.contains_key(name) {
            match self.stack.iter().position(|v| v == name) {
                None => {
                    // (A) fully resolved earlier: fold its closure in
                    let deps = self.tracked[name].clone();
                    if !Rc::ptr_eq(&deps, &self.cxt) {
                        let extra: Vec<String> = deps.borrow().iter().cloned().collect();
                        self.cxt.borrow_mut().extend(extra);
                    }
                }
                Some(start) => {
                    // (B) import cycle from the first occurrence down.
                    // Preserve the set of the first entry: it may belong to
                    // an earlier, larger cycle, and mutating it in place
                    // extends that cycle transparently.
                    self.trace(format_args!(
                        "warn: cycle {:?} -> {}",
                        &self.stack[start..],
                        name
                    ));
                    let consolidated = self.tracked[name].clone();
                    let members: Vec<String> = self.stack[start + 1..].to_vec();
                    for member in members {
                        let deps = self.tracked[&member].clone();
                        if !Rc::ptr_eq(&deps, &consolidated) {
                            let extra: Vec<String> = deps.borrow().iter().cloned().collect();
                            consolidated.borrow_mut().extend(extra);
                            self.tracked.insert(member, consolidated.clone());
                        }
                    }
                    self.cxt = consolidated;
                }
            }
        } else {
            // (C) fresh: push a new context; the set is shared with
            // tracked[name] so updates need no further bookkeeping
            let tdeps: DepSet = Rc::new(RefCell::new(HashSet::new()));
            self.tracked.insert(name.to_string(), tdeps.clone());
            self.stack.push(name.to_string());
            self.cxt = tdeps;
            new_context = true;
        }

        // map the file eagerly when the host can already name it, so the
        // dynamic classifier resolves frames of in-flight modules
        if let Some(file) = host.module_file(name) {
            self.file_to_module.insert(file, name.to_string());
        }

        let result = host.load(self, name);

        match &result {
            Ok(module) => {
                if let Some(file) = &module.file {
                    self.file_to_module.insert(file.clone(), name.to_string());
                }
                if let Some(selectors) = self.cfg.patches.get(name).cloned() {
                    for selector in selectors {
                        host.apply_patch(name, &selector);
                    }
                }
                self.reify_parent(name);
                if let Some(selectors) = self.cfg.dynamic_anchors.get(name).cloned() {
                    for selector in selectors {
                        host.wrap_anchor(name, &selector);
                    }
                }
            }
            Err(err) => {
                self.trace(format_args!("warn: {}", err));
                if new_context {
                    // keep the entry if an enclosing cycle still references it
                    let referenced = self.stack[..self.stack.len() - 1]
                        .iter()
                        .any(|v| v == name);
                    if !referenced {
                        self.tracked.remove(name);
                    }
                }
            }
        }

        if new_context {
            self.stack.pop();
            let parent = self.stack.last().cloned().unwrap_or_default();
            let down = self
                .tracked
                .entry(parent)
                .or_insert_with(|| Rc::new(RefCell::new(HashSet::new())))
                .clone();
            if !Rc::ptr_eq(&down, &self.cxt) {
                let extra: Vec<String> = self.cxt.borrow().iter().cloned().collect();
                down.borrow_mut().extend(extra);
            }
            self.cxt = down;
            if result.is_err() {
                // the dep was added optimistically before the load resolved
                self.cxt.borrow_mut().remove(name);
            }
        }

        // whoever imported a dynamic user inherits its anchors
        if let Some(users) = self.dynamic_users.get(name).cloned() {
            let importer = self.stack.last().cloned().unwrap_or_default();
            if importer != name {
                self.dynamic_users.entry(importer).or_default().extend(users);
            }
        }

        result
    }

    /// Parent packages are implicitly resolved, but the host's module cache
    /// swallows repeat parent loads, so the first-loaded parent must be
    /// reified manually. The immediate parent suffices: its own deps are
    /// either complete or part of a cycle being consolidated.
    fn reify_parent(&mut self, name: &str) {
        let Some(parent) = parent_package(name) else {
            return;
        };
        if self.cxt.borrow().contains(parent) {
            return;
        }
        let Some(pdeps) = self.tracked.get(parent).cloned() else {
            return;
        };
        if Rc::ptr_eq(&pdeps, &self.cxt) {
            self.cxt.borrow_mut().insert(parent.to_string());
        } else {
            let extra: Vec<String> = pdeps.borrow().iter().cloned().collect();
            let mut cxt = self.cxt.borrow_mut();
            cxt.insert(parent.to_string());
            cxt.extend(extra);
        }
        if let Some(users) = self.dynamic_users.get(parent).cloned() {
            self.dynamic_users
                .entry(name.to_string())
                .or_default()
                .extend(users);
        }
    }

    /// Decide whether the pending load is a dynamic import and, if so, which
    /// anchor it belongs to. Returns the previous dynamic stack height to
    /// restore once the load completes, or `None` for static imports.
    fn classify_dynamic(
        &mut self,
        tb: &[Frame],
        explicit: bool,
    ) -> Option<(usize, Option<Anchor>)> {
        let n = tb.len();
        let prev = self.dynamic_stack.min(n);

        // host stacks contain only host and user frames; the deepest frame
        // is the import call site itself
        let mut found: Option<usize> = None;
        if explicit {
            found = Some(n);
        } else {
            let mut i = 1usize;
            while i < n {
                // reached the previous dynamic import without a new one
                if prev == n - i {
                    break;
                }
                let frame = &tb[n - i];
                if frames::DYNAMIC_ENTRY_FUNCTIONS.contains(frame.function.as_str()) {
                    found = Some(n - i);
                    break;
                }
                if frame.function == "__import__" {
                    found = Some(n - i);
                    break;
                }
                // the builtin is elided from some stacks; fall back to the
                // call-site text
                if frame.line.contains("__import__(") {
                    found = Some(n - i + 1);
                    break;
                }
                i += 1;
            }
        }
        let found = found?;
        if found == 0 || self.is_context_frame(&tb[found - 1]) {
            return None;
        }

        // strip anything above the innermost harness-driven import
        let lo = prev.min(found);
        let start = lo
            + tb[lo..found]
                .iter()
                .rposition(|f| self.is_context_frame(f))
                .map(|i| i + 1)
                .unwrap_or(0);
        let dyn_stack = omit_tracker_frames(&tb[start.min(found)..found]);

        // first explicit anchor wins; an ignore match turns the whole load
        // static; otherwise the deepest tracked-prefix frame is the anchor
        let mut anchor: Option<Anchor> = None;
        let mut last_candidate: Option<Anchor> = None;
        for (i, frame) in tb[..found].iter().enumerate() {
            if frames::is_machinery_frame(frame) {
                continue;
            }
            let Some(module) = self.file_to_module.get(&frame.file) else {
                continue;
            };
            if i < start {
                continue;
            }
            if let Some(fns) = self.cfg.dynamic_ignores.get(module) {
                if fns.contains(&frame.function) {
                    return None;
                }
            }
            if let Some(fns) = self.cfg.dynamic_anchors.get(module) {
                let matches = fns.contains(&frame.function)
                    || fns
                        .iter()
                        .any(|sel| sel.rsplit('.').next() == Some(frame.function.as_str()));
                if matches {
                    anchor = Some((module.clone(), frame.function.clone()));
                    break;
                }
            }
            if self.cfg.prefixes.contains(top_level(module)) {
                last_candidate = Some((module.clone(), frame.function.clone()));
            }
        }
        let anchor = anchor.or(last_candidate);

        self.trace(format_args!("dynamic anchor: {:?}", anchor));
        self.dynamic_stack = n;
        if anchor.is_none() {
            self.dynamic.push(dyn_stack);
        }
        Some((prev, anchor))
    }

    fn is_context_frame(&self, frame: &Frame) -> bool {
        self.cfg.context_functions.contains(&frame.function)
    }

    fn trace(&self, args: std::fmt::Arguments<'_>) {
        if self.cfg.log {
            log::trace!("{}", args);
        }
    }
}
