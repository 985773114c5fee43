//! Load placement.
//!
//! The analysis tracks the candidates whose binding frame may hold a newer
//! value than the fast slot: enclosing locals at the start of a closure, and
//! every variable a nested closure may have written. A read of such a
//! variable is preceded by a `load_binding`, which keeps the slot fresh on
//! every path until nested code may write the variable again.
use bindplace_ir::{ControlFlowGraph, InsnData, InsnId, Scope, VarId};
use smallvec::SmallVec;

use super::effects::BindingEffects;
use crate::{
    bitset::BitSet,
    dataflow::{DataflowProblem, Direction, Solver},
    error::SetupError,
};

pub struct LoadProblem<'a> {
    effects: &'a BindingEffects,
}

impl<'a> LoadProblem<'a> {
    pub fn new(effects: &'a BindingEffects) -> Self {
        Self { effects }
    }
}

impl DataflowProblem for LoadProblem<'_> {
    type Fact = BitSet<VarId>;

    fn name(&self) -> &'static str {
        "binding_load"
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn boundary_fact(&self) -> Self::Fact {
        self.effects.enclosing.clone()
    }

    fn initial_fact(&self) -> Self::Fact {
        BitSet::new()
    }

    fn meet_into(&self, acc: &mut Self::Fact, incoming: &Self::Fact) {
        acc.union_with(incoming);
    }

    fn transfer(&self, scope: &Scope, insn: InsnId, fact: &mut Self::Fact) {
        match scope.insn(insn) {
            InsnData::StoreToBinding { var } | InsnData::LoadFromBinding { var } => {
                fact.remove(*var);
            }

            data => {
                // Stale reads are preceded by a load.
                data.for_each_used_var(&mut |var| {
                    fact.remove(var);
                });
                fact.union_with(self.effects.clobbered(insn));
                if let Some(dst) = data.result() {
                    fact.remove(dst);
                }
            }
        }
    }

    fn transfer_raise(&self, scope: &Scope, insn: InsnId, fact: &mut Self::Fact) {
        scope.insn(insn).for_each_used_var(&mut |var| {
            fact.remove(var);
        });
        fact.union_with(self.effects.clobbered(insn));
    }
}

#[derive(Default)]
pub struct LoadPlacement {
    solver: Solver,
    /// Block visits of the last solve.
    pub visits: usize,
}

impl LoadPlacement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.solver.clear();
        self.visits = 0;
    }

    /// Returns the reads a `load_binding` of the read variable must precede.
    pub fn compute(
        &mut self,
        scope: &Scope,
        cfg: &ControlFlowGraph,
        effects: &BindingEffects,
    ) -> Result<Vec<(InsnId, VarId)>, SetupError> {
        self.clear();

        let problem = LoadProblem::new(effects);
        let solution = self.solver.solve(scope, cfg, &problem)?;
        self.visits = solution.visits;

        let mut loads = Vec::new();
        for block in scope.layout.iter_block() {
            let mut fact = solution.fact_in(block).clone();

            for insn in scope.layout.iter_insn(block) {
                let data = scope.insn(insn);
                if !data.is_binding_insn() {
                    let mut stale: SmallVec<[VarId; 2]> = SmallVec::new();
                    data.for_each_used_var(&mut |var| {
                        if fact.remove(var) {
                            stale.push(var);
                        }
                    });

                    for var in stale {
                        tracing::trace!(scope = %scope.name, var = %scope.var(var), "load before read");
                        loads.push((insn, var));
                    }
                }
                problem.transfer(scope, insn, &mut fact);
            }
        }

        Ok(loads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindplace_ir::{builder::ScopeBuilder, Operand, ScopeKind};

    fn closure_writing(name: &str) -> Scope {
        let mut builder = ScopeBuilder::new("block", ScopeKind::Closure);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let var = builder.outer(name, 1);
        builder.copy(var, 7);
        builder.ret(Operand::Nil);
        builder.finish()
    }

    fn place(scope: &Scope) -> Vec<(InsnId, VarId)> {
        let mut cfg = ControlFlowGraph::new();
        cfg.compute(scope);
        let mut effects = BindingEffects::new();
        effects.compute(scope);
        LoadPlacement::new().compute(scope, &cfg, &effects).unwrap()
    }

    #[test]
    fn enclosing_read_is_loaded_once() {
        let mut builder = ScopeBuilder::new("block", ScopeKind::Closure);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let x = builder.outer("x", 1);
        let t = builder.temp();
        let first = builder.copy(t, Operand::Array(vec![x.into(), x.into()]));
        builder.ret(x);
        let scope = builder.finish();

        assert_eq!(place(&scope), vec![(first, x)]);
    }

    #[test]
    fn read_after_clobbering_call_is_loaded() {
        let mut builder = ScopeBuilder::new("m", ScopeKind::Method);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let x = builder.local("x");
        let y = builder.local("y");
        builder.copy(x, 1);
        let before = builder.call(None, "p", vec![x.into()], None);
        let closure = builder.closure(closure_writing("x"));
        builder.call(None, "each", vec![], Some(closure));
        builder.copy(y, 2);
        let after = builder.call(None, "p", vec![x.into(), y.into()], None);
        builder.ret(x);
        let scope = builder.finish();

        let loads = place(&scope);
        assert_eq!(loads, vec![(after, x)]);
        assert!(!loads.iter().any(|(insn, _)| *insn == before));
    }

    #[test]
    fn direct_write_kills_staleness() {
        let mut builder = ScopeBuilder::new("m", ScopeKind::Method);
        let b0 = builder.append_block();
        builder.switch_to_block(b0);
        let x = builder.local("x");
        let closure = builder.closure(closure_writing("x"));
        builder.call(None, "each", vec![], Some(closure));
        builder.copy(x, 3);
        builder.ret(x);
        let scope = builder.finish();

        assert!(place(&scope).is_empty());
    }

    #[test]
    fn loaded_slot_stays_fresh_in_successors() {
        let mut builder = ScopeBuilder::new("m", ScopeKind::Method);
        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();
        builder.switch_to_block(b0);
        let x = builder.local("x");
        let t = builder.temp();
        let closure = builder.closure(closure_writing("x"));
        builder.call(None, "each", vec![], Some(closure));
        let read = builder.call(Some(t), "p", vec![x.into()], None);
        builder.br(t, b1, b2);

        builder.switch_to_block(b1);
        builder.call(None, "p", vec![x.into()], None);
        builder.jump(b2);

        builder.switch_to_block(b2);
        builder.ret(x);
        let scope = builder.finish();

        assert_eq!(place(&scope), vec![(read, x)]);
    }
}
