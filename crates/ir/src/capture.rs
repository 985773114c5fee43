//! Capture summaries of nested closures.
//!
//! A closure reaches the locals of its enclosing scopes through their
//! binding frames. The summary of a closure lists the enclosing variables
//! the closure, or any closure nested in it, reads and writes, resolved to
//! the [`VarId`]s of the directly enclosing scope.
use std::collections::BTreeSet;

use cranelift_entity::SecondaryMap;

use crate::{ClosureId, Scope, VarId, Variable};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub reads: BTreeSet<VarId>,
    pub writes: BTreeSet<VarId>,
}

impl CaptureSummary {
    pub fn reads(&self, var: VarId) -> bool {
        self.reads.contains(&var)
    }

    pub fn writes(&self, var: VarId) -> bool {
        self.writes.contains(&var)
    }

    /// Returns `true` if running the closure may read or write `var`.
    pub fn observes(&self, var: VarId) -> bool {
        self.reads(var) || self.writes(var)
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }
}

/// Capture summaries of every closure nested directly in a scope.
#[derive(Debug, Default)]
pub struct CaptureSummaries {
    summaries: SecondaryMap<ClosureId, CaptureSummary>,
}

impl CaptureSummaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the summaries of the closures nested in `scope`.
    ///
    /// Captured variables the scope has not interned are dropped; run
    /// [`collect_used_by_closures`] first to intern them.
    pub fn compute(&mut self, scope: &Scope) {
        self.clear();

        for (closure, body) in scope.closures() {
            let accesses = FreeAccesses::of(body);
            let summary = &mut self.summaries[closure];
            for (name, depth) in accesses.reads {
                if let Some(var) = scope.lookup_local(&name, depth - 1) {
                    summary.reads.insert(var);
                }
            }
            for (name, depth) in accesses.writes {
                if let Some(var) = scope.lookup_local(&name, depth - 1) {
                    summary.writes.insert(var);
                }
            }
        }
    }

    pub fn summary(&self, closure: ClosureId) -> &CaptureSummary {
        &self.summaries[closure]
    }

    pub fn clear(&mut self) {
        self.summaries.clear();
    }
}

/// Interns every variable captured by a nested closure in `scope` and
/// records the own locals among them as used by closures. Nested closures
/// are processed first.
pub fn collect_used_by_closures(scope: &mut Scope) {
    for (_, closure) in scope.closures_mut() {
        collect_used_by_closures(closure);
    }

    let mut captured = BTreeSet::new();
    for (_, closure) in scope.closures() {
        let accesses = FreeAccesses::of(closure);
        captured.extend(accesses.reads);
        captured.extend(accesses.writes);
    }

    for (name, depth) in captured {
        let var = scope.local(&name, depth - 1);
        if depth == 1 {
            scope.used_by_closures.insert(var);
        }
    }
}

/// Enclosing locals accessed by a closure, keyed by name and depth relative
/// to the closure itself. Every depth is at least one.
#[derive(Default)]
struct FreeAccesses {
    reads: BTreeSet<(String, u32)>,
    writes: BTreeSet<(String, u32)>,
}

impl FreeAccesses {
    fn of(closure: &Scope) -> Self {
        let mut accesses = Self::default();

        // Binding instructions only move values between the fast slot and the
        // frame, they are not accesses of the variable.
        for insn in closure.iter_insns() {
            let data = closure.insn(insn);
            if data.is_binding_insn() {
                continue;
            }

            data.for_each_used_var(&mut |var| {
                if let Some(key) = free_key(closure.var(var)) {
                    accesses.reads.insert(key);
                }
            });
            if let Some(key) = data.result().and_then(|var| free_key(closure.var(var))) {
                accesses.writes.insert(key);
            }
        }

        // Accesses of nested closures reaching beyond this closure.
        for (_, nested) in closure.closures() {
            let inner = Self::of(nested);
            let lift = |(name, depth): (String, u32)| (depth > 1).then(|| (name, depth - 1));
            accesses.reads.extend(inner.reads.into_iter().filter_map(lift));
            accesses.writes.extend(inner.writes.into_iter().filter_map(lift));
        }

        accesses
    }
}

fn free_key(var: &Variable) -> Option<(String, u32)> {
    match var {
        Variable::Local { name, depth } if *depth > 0 => Some((name.clone(), *depth)),
        _ => None,
    }
}
