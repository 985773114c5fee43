pub mod builder;
pub mod capture;
pub mod cfg;
pub mod insn;
pub mod ir_writer;
pub mod layout;
pub mod operand;
pub mod scope;
pub mod variable;

pub use builder::ScopeBuilder;
pub use capture::{collect_used_by_closures, CaptureSummaries, CaptureSummary};
pub use cfg::ControlFlowGraph;
pub use insn::{InsnData, InsnId, Opcode};
pub use ir_writer::ScopeWriter;
pub use layout::Layout;
pub use operand::{ClosureId, Operand};
pub use scope::{BlockData, BlockId, Scope, ScopeKind};
pub use variable::{VarId, Variable};

/// A compilation unit: the top level scopes of a source file.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub scopes: Vec<Scope>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }
}
