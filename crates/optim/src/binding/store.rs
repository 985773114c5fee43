//! Store placement.
//!
//! The analysis tracks, per program point, the candidates whose binding
//! frame slot is known to hold the current value on every path ("synced").
//! Wherever the frame can be observed while a variable is not synced, the
//! direct writes reaching that point are found by walking backwards until a
//! sync point, and a `store_binding` is placed right after each of them.
use std::collections::BTreeSet;

use bindplace_ir::{BlockId, ControlFlowGraph, InsnData, InsnId, Scope, VarId};
use rustc_hash::FxHashSet;

use super::effects::BindingEffects;
use crate::{
    bitset::BitSet,
    dataflow::{DataflowProblem, Direction, Solution, Solver},
    error::SetupError,
};

pub struct StoreProblem<'a> {
    effects: &'a BindingEffects,
}

impl<'a> StoreProblem<'a> {
    pub fn new(effects: &'a BindingEffects) -> Self {
        Self { effects }
    }
}

impl DataflowProblem for StoreProblem<'_> {
    type Fact = BitSet<VarId>;

    fn name(&self) -> &'static str {
        "binding_store"
    }

    fn direction(&self) -> Direction {
        Direction::Forward
    }

    fn boundary_fact(&self) -> Self::Fact {
        self.effects.candidates.clone()
    }

    fn initial_fact(&self) -> Self::Fact {
        self.effects.candidates.clone()
    }

    fn meet_into(&self, acc: &mut Self::Fact, incoming: &Self::Fact) {
        acc.intersect_with(incoming);
    }

    fn transfer(&self, scope: &Scope, insn: InsnId, fact: &mut Self::Fact) {
        match scope.insn(insn) {
            InsnData::StoreToBinding { var } | InsnData::LoadFromBinding { var } => {
                if self.effects.is_candidate(*var) {
                    fact.insert(*var);
                }
            }

            data => {
                // Nested code observing a variable runs before the result
                // is written.
                fact.union_with(self.effects.observed(insn));
                if let Some(dst) = data.result() {
                    fact.remove(dst);
                }
            }
        }
    }

    fn transfer_raise(&self, _scope: &Scope, insn: InsnId, fact: &mut Self::Fact) {
        fact.union_with(self.effects.observed(insn));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScanFrom {
    Bottom(BlockId),
    Before(InsnId),
}

#[derive(Default)]
pub struct StorePlacement {
    solver: Solver,
    worklist: Vec<ScanFrom>,
    visited: FxHashSet<(VarId, ScanFrom)>,
    marked: BTreeSet<(InsnId, VarId)>,
    /// Block visits of the last solve.
    pub visits: usize,
}

impl StorePlacement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.solver.clear();
        self.worklist.clear();
        self.visited.clear();
        self.marked.clear();
        self.visits = 0;
    }

    /// Returns the writes a `store_binding` of the written variable must
    /// follow.
    pub fn compute(
        &mut self,
        scope: &Scope,
        cfg: &ControlFlowGraph,
        effects: &BindingEffects,
    ) -> Result<Vec<(InsnId, VarId)>, SetupError> {
        self.clear();

        let problem = StoreProblem::new(effects);
        let solution = self.solver.solve(scope, cfg, &problem)?;
        self.visits = solution.visits;

        for block in scope.layout.iter_block() {
            let can_leave = scope.handler_of(block).is_none();
            let mut fact = solution.fact_in(block).clone();

            for insn in scope.layout.iter_insn(block) {
                let observed = observation(scope, effects, insn, can_leave);
                for var in observed.iter() {
                    if !fact.contains(var) {
                        self.mark_reaching_writes(
                            scope,
                            cfg,
                            &solution,
                            effects,
                            var,
                            ScanFrom::Before(insn),
                        );
                    }
                }
                problem.transfer(scope, insn, &mut fact);
            }

            if falls_off_end(scope, cfg, block) {
                for var in effects.exit_observed.iter() {
                    if !fact.contains(var) {
                        self.mark_reaching_writes(
                            scope,
                            cfg,
                            &solution,
                            effects,
                            var,
                            ScanFrom::Bottom(block),
                        );
                    }
                }
            }
        }

        Ok(self.marked.iter().copied().collect())
    }

    /// Marks every direct write of `var` reaching `start` without passing a
    /// sync point.
    fn mark_reaching_writes(
        &mut self,
        scope: &Scope,
        cfg: &ControlFlowGraph,
        solution: &Solution<BitSet<VarId>>,
        effects: &BindingEffects,
        var: VarId,
        start: ScanFrom,
    ) {
        self.worklist.push(start);

        while let Some(from) = self.worklist.pop() {
            if !self.visited.insert((var, from)) {
                continue;
            }

            let (block, mut cursor) = match from {
                ScanFrom::Bottom(block) => (block, scope.layout.last_insn_of(block)),
                ScanFrom::Before(insn) => {
                    (scope.layout.insn_block(insn), scope.layout.prev_insn_of(insn))
                }
            };

            let mut reached_top = true;
            while let Some(insn) = cursor {
                let data = scope.insn(insn);
                if writes_slot(data, var) {
                    tracing::trace!(scope = %scope.name, var = %scope.var(var), "store after write");
                    self.marked.insert((insn, var));
                    reached_top = false;
                    break;
                }
                if is_sync(data, effects, insn, var) {
                    reached_top = false;
                    break;
                }
                cursor = scope.layout.prev_insn_of(insn);
            }
            if !reached_top {
                continue;
            }

            for &pred in cfg.preds_of(block) {
                if !solution.fact_out(pred).contains(var) {
                    self.worklist.push(ScanFrom::Bottom(pred));
                }
            }
            for &pred in cfg.exc_preds_of(block) {
                if solution.exc_fact_out(pred).contains(var) {
                    continue;
                }
                for insn in scope.layout.iter_insn(pred) {
                    if scope.insn(insn).can_raise() && !effects.observed(insn).contains(var) {
                        self.worklist.push(ScanFrom::Before(insn));
                    }
                }
            }
        }
    }
}

/// Returns the candidates whose frame value must be current right before
/// `insn`.
fn observation(
    scope: &Scope,
    effects: &BindingEffects,
    insn: InsnId,
    can_leave: bool,
) -> BitSet<VarId> {
    match scope.insn(insn) {
        InsnData::LoadFromBinding { var } if effects.is_candidate(*var) => BitSet::from([*var]),

        InsnData::Call { .. } => {
            let mut observed = effects.observed(insn).clone();
            if can_leave {
                observed.union_with(&effects.exit_observed);
            }
            observed
        }

        InsnData::Return { .. } => effects.exit_observed.clone(),
        InsnData::Raise { .. } if can_leave => effects.exit_observed.clone(),

        _ => BitSet::new(),
    }
}

fn writes_slot(data: &InsnData, var: VarId) -> bool {
    !matches!(data, InsnData::LoadFromBinding { .. }) && data.result() == Some(var)
}

fn is_sync(data: &InsnData, effects: &BindingEffects, insn: InsnId, var: VarId) -> bool {
    match data {
        InsnData::StoreToBinding { var: synced } | InsnData::LoadFromBinding { var: synced } => {
            *synced == var
        }
        _ => effects.observed(insn).contains(var),
    }
}

/// Returns `true` if control leaves the scope by running past the last
/// instruction of `block`.
fn falls_off_end(scope: &Scope, cfg: &ControlFlowGraph, block: BlockId) -> bool {
    cfg.succs_of(block).next().is_none()
        && scope
            .layout
            .last_insn_of(block)
            .map_or(true, |insn| !scope.insn(insn).is_terminator())
}
