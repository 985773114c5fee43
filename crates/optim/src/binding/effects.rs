//! Where the binding frame of a scope can be observed.
use bindplace_ir::{CaptureSummaries, InsnData, InsnId, Operand, Scope, VarId};
use cranelift_entity::SecondaryMap;

use crate::bitset::BitSet;

/// Frame effects of the instructions of a single scope, shared by the store
/// and load analyses.
#[derive(Debug, Default)]
pub struct BindingEffects {
    /// Variables whose value may live in a binding frame: own locals used by
    /// nested closures (every own local once the binding escapes) and every
    /// local of an enclosing scope.
    pub candidates: BitSet<VarId>,

    /// Candidates living in the frame of an enclosing scope.
    pub enclosing: BitSet<VarId>,

    /// Candidates whose frame value must be current when the activation
    /// leaves the scope.
    pub exit_observed: BitSet<VarId>,

    /// Any call can reach the frame, either because the scope says so or
    /// because a closure is handed out as a value.
    pub escapes: bool,

    /// Candidates a call lets nested code read or write.
    observed: SecondaryMap<InsnId, BitSet<VarId>>,

    /// Candidates a call lets nested code write.
    clobbered: SecondaryMap<InsnId, BitSet<VarId>>,

    summaries: CaptureSummaries,
}

impl BindingEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, scope: &Scope) {
        self.clear();

        self.summaries.compute(scope);
        self.escapes = scope.binding_escapes || closure_escapes(scope);

        for &var in &scope.used_by_closures {
            self.candidates.insert(var);
        }
        if self.escapes {
            for var in scope.declared_vars() {
                self.candidates.insert(var);
            }
        }
        for var in scope.enclosing_vars() {
            self.candidates.insert(var);
            self.enclosing.insert(var);
        }

        self.exit_observed = if self.escapes {
            self.candidates.clone()
        } else {
            self.enclosing.clone()
        };

        for insn in scope.iter_insns() {
            let InsnData::Call { closure, .. } = scope.insn(insn) else {
                continue;
            };

            if self.escapes {
                self.observed[insn] = self.candidates.clone();
                self.clobbered[insn] = self.candidates.clone();
                continue;
            }

            let Some(closure) = closure.as_ref().and_then(Operand::as_closure) else {
                continue;
            };
            let summary = self.summaries.summary(closure);
            let observed: BitSet<_> = summary
                .reads
                .union(&summary.writes)
                .copied()
                .filter(|var| self.candidates.contains(*var))
                .collect();
            let clobbered: BitSet<_> = summary
                .writes
                .iter()
                .copied()
                .filter(|var| self.candidates.contains(*var))
                .collect();
            self.observed[insn] = observed;
            self.clobbered[insn] = clobbered;
        }
    }

    pub fn is_candidate(&self, var: VarId) -> bool {
        self.candidates.contains(var)
    }

    /// Returns the candidates nested code may read or write while `insn`
    /// runs.
    pub fn observed(&self, insn: InsnId) -> &BitSet<VarId> {
        &self.observed[insn]
    }

    /// Returns the candidates nested code may write while `insn` runs.
    pub fn clobbered(&self, insn: InsnId) -> &BitSet<VarId> {
        &self.clobbered[insn]
    }

    /// Returns `true` if the scope needs its own frame.
    pub fn needs_frame(&self, scope: &Scope) -> bool {
        self.escapes || !scope.used_by_closures.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
        self.enclosing.clear();
        self.exit_observed.clear();
        self.escapes = false;
        self.observed.clear();
        self.clobbered.clear();
        self.summaries.clear();
    }
}

/// Returns `true` if a closure is used as a value rather than as the block
/// of a call, so it may run at any later point.
fn closure_escapes(scope: &Scope) -> bool {
    scope.iter_insns().any(|insn| {
        let data = scope.insn(insn);
        let mut escaped = false;
        let mut visit = |op: &Operand| op.for_each_closure(&mut |_| escaped = true);
        match data {
            InsnData::Call {
                receiver, args, ..
            } => {
                visit(receiver);
                args.iter().for_each(&mut visit);
            }
            _ => data.for_each_operand(&mut visit),
        }
        escaped
    })
}
