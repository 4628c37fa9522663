//! Lazy, memoized transitive closures with shared cycle sets.
//!
//! Closures live in an arena of sets; each computed node holds an index into
//! the arena. Every member of an import cycle is assigned the *same* arena
//! index, so the members' closures are one set object and an insertion made
//! through any member is observed by all of them. Queries are a single
//! indirection: node → slot → set.

use std::collections::{HashMap, HashSet};

use super::NodeId;

#[derive(Debug, Default)]
pub(crate) struct ClosureCache {
    slot: HashMap<NodeId, usize>,
    arena: Vec<HashSet<NodeId>>,
}

impl ClosureCache {
    pub(crate) fn clear(&mut self) {
        self.slot.clear();
        self.arena.clear();
    }

    pub(crate) fn slot_of(&self, node: NodeId) -> Option<usize> {
        self.slot.get(&node).copied()
    }

    pub(crate) fn set(&self, node: NodeId) -> Option<&HashSet<NodeId>> {
        self.slot.get(&node).map(|&i| &self.arena[i])
    }

    /// Compute (or return the memoized) closure of `start`.
    ///
    /// `deps` supplies each node's direct dependencies, sorted for
    /// determinism. Iterative Tarjan: strongly connected components are
    /// popped in reverse topological order, so every dependency outside the
    /// popped component already has a closure slot.
    pub(crate) fn ensure(&mut self, start: NodeId, deps: &dyn Fn(NodeId) -> Vec<NodeId>) {
        if self.slot.contains_key(&start) {
            return;
        }

        let mut index: HashMap<NodeId, u32> = HashMap::new();
        let mut low: HashMap<NodeId, u32> = HashMap::new();
        let mut on_stack: HashSet<NodeId> = HashSet::new();
        let mut scc_stack: Vec<NodeId> = Vec::new();
        let mut next_index: u32 = 1;

        // (node, direct deps, next dep position)
        let mut frames: Vec<(NodeId, Vec<NodeId>, usize)> = vec![(start, deps(start), 0)];
        index.insert(start, 0);
        low.insert(start, 0);
        on_stack.insert(start);
        scc_stack.push(start);

        loop {
            let Some(frame) = frames.last_mut() else { break };
            let v = frame.0;
            if frame.2 < frame.1.len() {
                let w = frame.1[frame.2];
                frame.2 += 1;
                if self.slot.contains_key(&w) {
                    // already resolved in an earlier call; contributes via
                    // its arena set when the component is popped
                    continue;
                }
                match index.get(&w) {
                    None => {
                        index.insert(w, next_index);
                        low.insert(w, next_index);
                        next_index += 1;
                        on_stack.insert(w);
                        scc_stack.push(w);
                        frames.push((w, deps(w), 0));
                    }
                    Some(&wi) => {
                        if on_stack.contains(&w) {
                            let lv = low[&v].min(wi);
                            low.insert(v, lv);
                        }
                    }
                }
            } else {
                let (v, v_deps, _) = frames.pop().expect("frame exists");
                if low[&v] == index[&v] {
                    // pop the completed component and build its shared closure
                    let mut members = Vec::new();
                    loop {
                        let m = scc_stack.pop().expect("scc stack underflow");
                        on_stack.remove(&m);
                        members.push(m);
                        if m == v {
                            break;
                        }
                    }
                    let member_set: HashSet<NodeId> = members.iter().copied().collect();
                    let is_cycle = members.len() > 1 || v_deps.contains(&v);
                    let mut closure: HashSet<NodeId> = HashSet::new();
                    if is_cycle {
                        closure.extend(members.iter().copied());
                    }
                    for &m in &members {
                        let m_deps = if m == v { v_deps.clone() } else { deps(m) };
                        for w in m_deps {
                            if member_set.contains(&w) {
                                continue;
                            }
                            closure.insert(w);
                            if let Some(&ws) = self.slot.get(&w) {
                                closure.extend(self.arena[ws].iter().copied());
                            }
                        }
                    }
                    let idx = self.arena.len();
                    self.arena.push(closure);
                    for m in members {
                        self.slot.insert(m, idx);
                    }
                }
                if let Some(parent) = frames.last() {
                    let pv = parent.0;
                    let lv = low[&pv].min(low[&v]);
                    low.insert(pv, lv);
                }
            }
        }
    }
}
