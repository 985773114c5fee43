//! The pass inserting binding frame instructions.
use std::ops::AddAssign;

use bindplace_ir::{ControlFlowGraph, InsnData, InsnId, Scope, ScopeKind, VarId};

use super::{effects::BindingEffects, load::LoadPlacement, store::StorePlacement};
use crate::{
    config::{BindingConfig, ErrorPolicy},
    error::{RewriteError, Violation},
    verify::verify_scope,
};

/// Number of instructions a run inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub allocs: usize,
    pub stores: usize,
    pub loads: usize,
    /// Scopes left unmodified and marked `eager_binding`.
    pub fallbacks: usize,
    /// Block visits of every dataflow solve.
    pub visits: usize,
}

impl RewriteStats {
    pub fn inserted(&self) -> usize {
        self.allocs + self.stores + self.loads
    }
}

impl AddAssign for RewriteStats {
    fn add_assign(&mut self, rhs: Self) {
        self.allocs += rhs.allocs;
        self.stores += rhs.stores;
        self.loads += rhs.loads;
        self.fallbacks += rhs.fallbacks;
        self.visits += rhs.visits;
    }
}

/// Places `alloc_binding`, `store_binding` and `load_binding` instructions
/// so the binding frame of a scope is allocated once and current wherever
/// nested code can observe it, and fast slots are refreshed wherever nested
/// code may have written the frame.
pub struct AddBindingInsns {
    config: BindingConfig,
    cfg: ControlFlowGraph,
    effects: BindingEffects,
    stores: StorePlacement,
    loads: LoadPlacement,
}

impl AddBindingInsns {
    pub fn new(config: BindingConfig) -> Self {
        Self {
            config,
            cfg: ControlFlowGraph::default(),
            effects: BindingEffects::default(),
            stores: StorePlacement::default(),
            loads: LoadPlacement::default(),
        }
    }

    pub fn clear(&mut self) {
        self.cfg.clear();
        self.effects.clear();
        self.stores.clear();
        self.loads.clear();
    }

    /// Rewrites `scope`, after its nested closures when
    /// `include_closures` is set.
    ///
    /// Only the failing scope is restored. With
    /// [`crate::config::ErrorPolicy::Abort`] closures rewritten before their
    /// parent failed stay rewritten.
    pub fn run(&mut self, scope: &mut Scope) -> Result<RewriteStats, RewriteError> {
        let mut stats = RewriteStats::default();

        if self.config.include_closures {
            for (_, closure) in scope.closures_mut() {
                stats += self.run(closure)?;
            }
        }

        stats += self.run_scope(scope)?;
        Ok(stats)
    }

    /// Rewrites `scope` alone. On failure the scope is restored to its state
    /// before the call.
    pub fn run_scope(&mut self, scope: &mut Scope) -> Result<RewriteStats, RewriteError> {
        if scope.kind == ScopeKind::Script || !scope.has_cfg() || scope.eager_binding {
            return Ok(RewriteStats::default());
        }

        let backup = scope.clone();
        match self.place(scope) {
            Ok(stats) => {
                tracing::debug!(
                    scope = %scope.name,
                    allocs = stats.allocs,
                    stores = stats.stores,
                    loads = stats.loads,
                    visits = stats.visits,
                    "binding instructions placed"
                );
                Ok(stats)
            }

            Err(err) => {
                *scope = backup;
                match self.config.on_error {
                    ErrorPolicy::Abort => Err(err),
                    ErrorPolicy::FallbackToEager => {
                        tracing::warn!(scope = %scope.name, error = %err, "falling back to eager binding");
                        scope.eager_binding = true;
                        Ok(RewriteStats {
                            fallbacks: 1,
                            ..RewriteStats::default()
                        })
                    }
                }
            }
        }
    }

    fn place(&mut self, scope: &mut Scope) -> Result<RewriteStats, RewriteError> {
        self.clear();
        let mut stats = RewriteStats::default();

        self.cfg.compute(scope);
        self.effects.compute(scope);

        let stores = self.stores.compute(scope, &self.cfg, &self.effects)?;
        stats.visits += self.stores.visits;
        stats.stores += insert_stores(scope, &stores)?;

        // Binding instructions never raise nor branch, so the graph stays
        // valid while they are inserted.
        let loads = self.loads.compute(scope, &self.cfg, &self.effects)?;
        stats.visits += self.loads.visits;
        stats.loads += insert_loads(scope, &loads)?;

        // The new loads observe the frame, writes reaching them on another
        // path must be stored as well.
        if !loads.is_empty() {
            let stores = self.stores.compute(scope, &self.cfg, &self.effects)?;
            stats.visits += self.stores.visits;
            stats.stores += insert_stores(scope, &stores)?;
        }

        if self.effects.needs_frame(scope) || has_own_binding_insn(scope) {
            stats.allocs += insert_alloc(scope);
        }

        scope.layout.renumber();
        if self.config.verify {
            verify_scope(scope)?;
        }

        Ok(stats)
    }
}

fn insert_stores(scope: &mut Scope, stores: &[(InsnId, VarId)]) -> Result<usize, RewriteError> {
    for &(write, var) in stores {
        if !scope.layout.is_insn_inserted(write) {
            return Err(missing_insertion_point(scope, "store_binding"));
        }
        let store = scope.make_insn(InsnData::StoreToBinding { var });
        scope.layout.insert_insn_after(store, write);
    }
    Ok(stores.len())
}

fn insert_loads(scope: &mut Scope, loads: &[(InsnId, VarId)]) -> Result<usize, RewriteError> {
    for &(read, var) in loads {
        if !scope.layout.is_insn_inserted(read) {
            return Err(missing_insertion_point(scope, "load_binding"));
        }
        let load = scope.make_insn(InsnData::LoadFromBinding { var });
        scope.layout.insert_insn_before(load, read);
    }
    Ok(loads.len())
}

/// Allocates the frame at the top of the entry block unless the entry block
/// already does. Returns the number of inserted instructions.
fn insert_alloc(scope: &mut Scope) -> usize {
    let Some(entry) = scope.layout.entry_block() else {
        return 0;
    };

    let allocated = scope
        .layout
        .iter_insn(entry)
        .any(|insn| matches!(scope.insn(insn), InsnData::AllocBinding));
    if allocated {
        return 0;
    }

    let alloc = scope.make_insn(InsnData::AllocBinding);
    scope.layout.prepend_insn(alloc, entry);
    1
}

fn has_own_binding_insn(scope: &Scope) -> bool {
    scope.iter_insns().any(|insn| match scope.insn(insn) {
        InsnData::StoreToBinding { var } | InsnData::LoadFromBinding { var } => {
            scope.var(*var).depth() == Some(0)
        }
        _ => false,
    })
}

fn missing_insertion_point(scope: &Scope, what: &'static str) -> RewriteError {
    RewriteError::InvariantViolation {
        scope: scope.name.clone(),
        violation: Violation::MissingInsertionPoint(what),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindplace_ir::{builder::ScopeBuilder, Operand};

    #[test]
    fn script_and_empty_scopes_are_skipped() {
        let mut pass = AddBindingInsns::new(BindingConfig::strict());

        let mut script = ScopeBuilder::new("main", ScopeKind::Script);
        let b0 = script.append_block();
        script.switch_to_block(b0);
        script.set_binding_escapes();
        script.ret(Operand::Nil);
        let mut script = script.finish();
        assert_eq!(pass.run(&mut script).unwrap(), RewriteStats::default());

        let mut empty = Scope::new("empty", ScopeKind::Method);
        assert_eq!(pass.run(&mut empty).unwrap(), RewriteStats::default());
    }

    #[test]
    fn escaping_binding_allocates_and_stores_before_calls() {
        let mut builder = ScopeBuilder::new("m", ScopeKind::Method);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        builder.set_binding_escapes();
        let x = builder.local("x");
        builder.copy(x, 1);
        builder.call(None, "binding", vec![], None);
        builder.ret(x);
        let mut scope = builder.finish();
        assert!(scope.used_by_closures.is_empty());

        let stats = AddBindingInsns::new(BindingConfig::strict())
            .run(&mut scope)
            .unwrap();
        assert_eq!(stats.allocs, 1);
        assert_eq!(stats.stores, 1);
        // The call may have written `x` through the binding.
        assert_eq!(stats.loads, 1);
    }

    #[test]
    fn fallback_restores_scope() {
        let mut builder = ScopeBuilder::new("m", ScopeKind::Method);
        let b0 = builder.append_block();
        let dead = builder.append_block();
        builder.switch_to_block(b0);
        let x = builder.local("x");
        builder.copy(x, 1);
        builder.ret(x);
        builder.switch_to_block(dead);
        builder.ret(Operand::Nil);
        let mut scope = builder.finish();
        let before: Vec<_> = scope.iter_insns().collect();

        let stats = AddBindingInsns::new(BindingConfig::default())
            .run(&mut scope)
            .unwrap();
        assert_eq!(stats.fallbacks, 1);
        assert!(scope.eager_binding);
        assert_eq!(scope.iter_insns().collect::<Vec<_>>(), before);

        scope.eager_binding = false;
        let err = AddBindingInsns::new(BindingConfig::strict())
            .run(&mut scope)
            .unwrap_err();
        assert!(matches!(err, RewriteError::Setup(_)));
    }
}
