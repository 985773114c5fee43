//! A generic fixed point engine for monotone dataflow problems over a
//! [`ControlFlowGraph`].
//!
//! The policy of a problem (its lattice, meet and transfer functions) is
//! injected through [`DataflowProblem`]; [`Solver`] only owns the iteration
//! mechanics. Exception edges are first class: the state flowing from a
//! block into its handler is the meet of the states at each raising
//! instruction of the block, not the state at the end of the block.
use std::{collections::VecDeque, fmt};

use bindplace_ir::{BlockId, ControlFlowGraph, InsnId, Scope};
use cranelift_entity::SecondaryMap;

use crate::error::SetupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub trait DataflowProblem {
    type Fact: Clone + PartialEq + fmt::Debug;

    fn name(&self) -> &'static str;

    fn direction(&self) -> Direction;

    /// The fact at the entry (forward) or at the exits (backward).
    fn boundary_fact(&self) -> Self::Fact;

    /// The identity of [`Self::meet_into`]: the full universe for must
    /// problems, the empty set for may problems.
    fn initial_fact(&self) -> Self::Fact;

    fn meet_into(&self, acc: &mut Self::Fact, incoming: &Self::Fact);

    /// Applies the effect of `insn` on `fact`.
    fn transfer(&self, scope: &Scope, insn: InsnId, fact: &mut Self::Fact);

    /// Applies the effect of `insn` when it raises. Side effects of the
    /// instruction happen, its result write does not.
    fn transfer_raise(&self, scope: &Scope, insn: InsnId, fact: &mut Self::Fact) {
        let _ = (scope, insn, fact);
    }
}

/// Stable facts of a solved problem.
///
/// For forward problems `fact_in` is the fact at the top of a block and
/// `fact_out` the fact at its bottom; backward problems swap the roles.
#[derive(Debug, Clone)]
pub struct Solution<F: Clone> {
    direction: Direction,
    ins: SecondaryMap<BlockId, F>,
    outs: SecondaryMap<BlockId, F>,
    exc_outs: SecondaryMap<BlockId, F>,
    pub visits: usize,
}

impl<F> Solution<F>
where
    F: Clone + PartialEq + fmt::Debug,
{
    /// Returns the fact flowing into `block` in analysis direction.
    pub fn fact_in(&self, block: BlockId) -> &F {
        &self.ins[block]
    }

    /// Returns the fact flowing out of `block` in analysis direction.
    pub fn fact_out(&self, block: BlockId) -> &F {
        &self.outs[block]
    }

    /// Returns the meet of the facts flowing from `block` into its handler.
    /// Only meaningful for forward problems.
    pub fn exc_fact_out(&self, block: BlockId) -> &F {
        &self.exc_outs[block]
    }

    /// Returns the fact just before `insn` is applied, replaying the block
    /// transfer from the block boundary.
    pub fn fact_before<P>(&self, scope: &Scope, problem: &P, insn: InsnId) -> F
    where
        P: DataflowProblem<Fact = F>,
    {
        let block = scope.layout.insn_block(insn);
        match self.direction {
            Direction::Forward => {
                let mut fact = self.ins[block].clone();
                for cur in scope.layout.iter_insn(block) {
                    if cur == insn {
                        break;
                    }
                    problem.transfer(scope, cur, &mut fact);
                }
                fact
            }

            Direction::Backward => {
                let handler_fact = self.handler_fact(scope, problem, block);
                let mut fact = self.ins[block].clone();
                for cur in scope.layout.iter_insn_rev(block) {
                    if cur == insn {
                        break;
                    }
                    backward_step(scope, problem, cur, &mut fact, &handler_fact);
                }
                fact
            }
        }
    }

    fn handler_fact<P>(&self, scope: &Scope, problem: &P, block: BlockId) -> F
    where
        P: DataflowProblem<Fact = F>,
    {
        match scope.handler_of(block) {
            Some(handler) => self.outs[handler].clone(),
            None => problem.boundary_fact(),
        }
    }
}

#[derive(Default)]
pub struct Solver {
    worklist: VecDeque<BlockId>,
    in_worklist: SecondaryMap<BlockId, bool>,
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.worklist.clear();
        self.in_worklist.clear();
    }

    pub fn solve<P>(
        &mut self,
        scope: &Scope,
        cfg: &ControlFlowGraph,
        problem: &P,
    ) -> Result<Solution<P::Fact>, SetupError>
    where
        P: DataflowProblem,
    {
        self.clear();

        let entry = check_setup(scope, cfg)?;
        let direction = problem.direction();
        let initial = problem.initial_fact();

        let mut solution = Solution {
            direction,
            ins: SecondaryMap::with_default(initial.clone()),
            outs: SecondaryMap::with_default(initial.clone()),
            exc_outs: SecondaryMap::with_default(initial),
            visits: 0,
        };

        let seed = match direction {
            Direction::Forward => cfg.reverse_post_order(),
            Direction::Backward => cfg.post_order().collect(),
        };
        for block in seed {
            self.push(block);
        }

        while let Some(block) = self.worklist.pop_front() {
            self.in_worklist[block] = false;
            solution.visits += 1;

            let changed = match direction {
                Direction::Forward => visit_forward(scope, cfg, problem, entry, block, &mut solution),
                Direction::Backward => visit_backward(scope, cfg, problem, block, &mut solution),
            };
            if !changed {
                continue;
            }

            match direction {
                Direction::Forward => {
                    for succ in cfg.all_succs_of(block) {
                        self.push(succ);
                    }
                }
                Direction::Backward => {
                    for pred in cfg.all_preds_of(block) {
                        self.push(pred);
                    }
                }
            }
        }

        tracing::debug!(
            scope = %scope.name,
            problem = problem.name(),
            visits = solution.visits,
            "dataflow solved"
        );
        Ok(solution)
    }

    fn push(&mut self, block: BlockId) {
        if !self.in_worklist[block] {
            self.in_worklist[block] = true;
            self.worklist.push_back(block);
        }
    }
}

/// Checks that the scope has an entry shared by the layout and the graph,
/// and that every block of the layout is reachable from it.
fn check_setup(scope: &Scope, cfg: &ControlFlowGraph) -> Result<BlockId, SetupError> {
    let missing = || SetupError::MissingEntry(scope.name.clone());
    let layout_entry = scope.layout.entry_block().ok_or_else(missing)?;
    let cfg_entry = cfg.entry().ok_or_else(missing)?;
    if cfg_entry != layout_entry {
        return Err(SetupError::EntryMismatch {
            cfg: cfg_entry,
            layout: layout_entry,
        });
    }

    let mut reachable = SecondaryMap::<BlockId, bool>::new();
    for block in cfg.post_order() {
        reachable[block] = true;
    }
    match scope.layout.iter_block().find(|block| !reachable[*block]) {
        Some(block) => Err(SetupError::UnreachableBlock(block)),
        None => Ok(layout_entry),
    }
}

/// Returns `true` if the normal or exceptional fact leaving `block` changed.
fn visit_forward<P: DataflowProblem>(
    scope: &Scope,
    cfg: &ControlFlowGraph,
    problem: &P,
    entry: BlockId,
    block: BlockId,
    solution: &mut Solution<P::Fact>,
) -> bool {
    let mut fact = if block == entry {
        problem.boundary_fact()
    } else {
        problem.initial_fact()
    };
    for pred in cfg.preds_of(block) {
        problem.meet_into(&mut fact, &solution.outs[*pred]);
    }
    for pred in cfg.exc_preds_of(block) {
        problem.meet_into(&mut fact, &solution.exc_outs[*pred]);
    }
    solution.ins[block] = fact.clone();

    let has_handler = scope.handler_of(block).is_some();
    let mut exc_fact = problem.initial_fact();
    for insn in scope.layout.iter_insn(block) {
        if has_handler && scope.insn(insn).can_raise() {
            let mut raised = fact.clone();
            problem.transfer_raise(scope, insn, &mut raised);
            problem.meet_into(&mut exc_fact, &raised);
        }
        problem.transfer(scope, insn, &mut fact);
    }

    let mut changed = false;
    if solution.outs[block] != fact {
        solution.outs[block] = fact;
        changed = true;
    }
    if solution.exc_outs[block] != exc_fact {
        solution.exc_outs[block] = exc_fact;
        changed = true;
    }
    changed
}

/// Returns `true` if the fact at the top of `block` changed.
fn visit_backward<P: DataflowProblem>(
    scope: &Scope,
    cfg: &ControlFlowGraph,
    problem: &P,
    block: BlockId,
    solution: &mut Solution<P::Fact>,
) -> bool {
    let ends_with_handled_raise = scope.layout.last_insn_of(block).is_some_and(|insn| {
        matches!(scope.insn(insn), bindplace_ir::InsnData::Raise { .. })
            && scope.handler_of(block).is_some()
    });

    let mut fact = if cfg.succs_of(block).next().is_none() && !ends_with_handled_raise {
        problem.boundary_fact()
    } else {
        problem.initial_fact()
    };
    for succ in cfg.succs_of(block) {
        problem.meet_into(&mut fact, &solution.outs[*succ]);
    }
    solution.ins[block] = fact.clone();

    let handler_fact = solution.handler_fact(scope, problem, block);
    for insn in scope.layout.iter_insn_rev(block) {
        backward_step(scope, problem, insn, &mut fact, &handler_fact);
    }

    if solution.outs[block] != fact {
        solution.outs[block] = fact;
        true
    } else {
        false
    }
}

fn backward_step<P: DataflowProblem>(
    scope: &Scope,
    problem: &P,
    insn: InsnId,
    fact: &mut P::Fact,
    handler_fact: &P::Fact,
) {
    problem.transfer(scope, insn, fact);
    if scope.insn(insn).can_raise() {
        let mut raised = handler_fact.clone();
        problem.transfer_raise(scope, insn, &mut raised);
        problem.meet_into(fact, &raised);
    }
}
