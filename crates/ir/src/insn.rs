//! This module contains bindplace IR instruction definitions.
use std::fmt;

use smallvec::SmallVec;

use crate::{BlockId, ClosureId, Operand, VarId};

/// An opaque reference to [`InsnData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InsnId(pub u32);
cranelift_entity::entity_impl!(InsnId);

/// An instruction data definition.
#[derive(Debug, Clone, PartialEq)]
pub enum InsnData {
    /// Receive the `index`-th argument of the activation.
    ReceiveArg { dst: VarId, index: u32 },

    /// Copy an operand into a variable.
    Copy { dst: VarId, src: Operand },

    /// Method call. `closure` is the block argument passed to the callee,
    /// which may run it any number of times before returning.
    Call {
        dst: Option<VarId>,
        receiver: Operand,
        method: String,
        args: Vec<Operand>,
        closure: Option<Operand>,
    },

    /// Receive the exception being handled. Only valid in handler blocks.
    ReceiveException { dst: VarId },

    /// Unconditional jump.
    Jump { dest: BlockId },

    /// Conditional branch on the truthiness of `cond`.
    Branch {
        cond: Operand,
        then_dest: BlockId,
        else_dest: BlockId,
    },

    Return { value: Operand },

    Raise { exception: Operand },

    /// Allocate the binding frame of the current activation unless it already
    /// has one.
    AllocBinding,

    /// Store the fast slot of `var` into the binding frame that owns it.
    StoreToBinding { var: VarId },

    /// Load `var` from the binding frame that owns it into its fast slot.
    LoadFromBinding { var: VarId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    ReceiveArg,
    Copy,
    Call,
    ReceiveException,
    Jump,
    Branch,
    Return,
    Raise,
    AllocBinding,
    StoreToBinding,
    LoadFromBinding,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReceiveArg => "recv_arg",
            Self::Copy => "copy",
            Self::Call => "call",
            Self::ReceiveException => "recv_exc",
            Self::Jump => "jump",
            Self::Branch => "br",
            Self::Return => "return",
            Self::Raise => "raise",
            Self::AllocBinding => "alloc_binding",
            Self::StoreToBinding => "store_binding",
            Self::LoadFromBinding => "load_binding",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl InsnData {
    pub fn copy(dst: VarId, src: impl Into<Operand>) -> Self {
        Self::Copy {
            dst,
            src: src.into(),
        }
    }

    pub fn jump(dest: BlockId) -> Self {
        Self::Jump { dest }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Self::ReceiveArg { .. } => Opcode::ReceiveArg,
            Self::Copy { .. } => Opcode::Copy,
            Self::Call { .. } => Opcode::Call,
            Self::ReceiveException { .. } => Opcode::ReceiveException,
            Self::Jump { .. } => Opcode::Jump,
            Self::Branch { .. } => Opcode::Branch,
            Self::Return { .. } => Opcode::Return,
            Self::Raise { .. } => Opcode::Raise,
            Self::AllocBinding => Opcode::AllocBinding,
            Self::StoreToBinding { .. } => Opcode::StoreToBinding,
            Self::LoadFromBinding { .. } => Opcode::LoadFromBinding,
        }
    }

    /// Returns the variable written by the instruction.
    ///
    /// `LoadFromBinding` writes the fast slot of its variable, so it reports
    /// that variable as its result.
    pub fn result(&self) -> Option<VarId> {
        match self {
            Self::ReceiveArg { dst, .. }
            | Self::Copy { dst, .. }
            | Self::ReceiveException { dst }
            | Self::LoadFromBinding { var: dst } => Some(*dst),
            Self::Call { dst, .. } => *dst,
            Self::Jump { .. }
            | Self::Branch { .. }
            | Self::Return { .. }
            | Self::Raise { .. }
            | Self::AllocBinding
            | Self::StoreToBinding { .. } => None,
        }
    }

    /// Visits the operands of the instruction in order.
    pub fn for_each_operand(&self, f: &mut impl FnMut(&Operand)) {
        match self {
            Self::Copy { src, .. } => f(src),
            Self::Call {
                receiver,
                args,
                closure,
                ..
            } => {
                f(receiver);
                for arg in args {
                    f(arg);
                }
                if let Some(closure) = closure {
                    f(closure);
                }
            }
            Self::Branch { cond, .. } => f(cond),
            Self::Return { value } => f(value),
            Self::Raise { exception } => f(exception),
            Self::ReceiveArg { .. }
            | Self::ReceiveException { .. }
            | Self::Jump { .. }
            | Self::AllocBinding
            | Self::StoreToBinding { .. }
            | Self::LoadFromBinding { .. } => {}
        }
    }

    /// Returns the operands of the instruction in order.
    pub fn operands(&self) -> SmallVec<[&Operand; 4]> {
        let mut operands = SmallVec::new();
        match self {
            Self::Copy { src, .. } => operands.push(src),
            Self::Call {
                receiver,
                args,
                closure,
                ..
            } => {
                operands.push(receiver);
                operands.extend(args.iter());
                operands.extend(closure.iter());
            }
            Self::Branch { cond, .. } => operands.push(cond),
            Self::Return { value } => operands.push(value),
            Self::Raise { exception } => operands.push(exception),
            _ => {}
        }
        operands
    }

    /// Visits every variable whose fast slot the instruction reads.
    pub fn for_each_used_var(&self, f: &mut impl FnMut(VarId)) {
        if let Self::StoreToBinding { var } = self {
            f(*var);
        }
        self.for_each_operand(&mut |op| op.for_each_var(f));
    }

    pub fn uses_var(&self, var: VarId) -> bool {
        let mut found = false;
        self.for_each_used_var(&mut |v| found |= v == var);
        found
    }

    /// Returns the nested closures handed over by the instruction.
    pub fn closures(&self) -> SmallVec<[ClosureId; 2]> {
        let mut closures = SmallVec::new();
        self.for_each_operand(&mut |op| op.for_each_closure(&mut |c| closures.push(c)));
        closures
    }

    /// Returns `true` if the instruction may transfer control to an
    /// exception handler.
    pub fn can_raise(&self) -> bool {
        matches!(self, Self::Call { .. } | Self::Raise { .. })
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Jump { .. } | Self::Branch { .. } | Self::Return { .. } | Self::Raise { .. }
        )
    }

    /// Returns `true` if the instruction leaves the activation.
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Return { .. } | Self::Raise { .. })
    }

    pub fn is_binding_insn(&self) -> bool {
        matches!(
            self,
            Self::AllocBinding | Self::StoreToBinding { .. } | Self::LoadFromBinding { .. }
        )
    }

    pub fn branch_dests(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            Self::Jump { dest } => smallvec::smallvec![*dest],
            Self::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                if then_dest == else_dest {
                    smallvec::smallvec![*then_dest]
                } else {
                    smallvec::smallvec![*then_dest, *else_dest]
                }
            }
            _ => SmallVec::new(),
        }
    }
}
