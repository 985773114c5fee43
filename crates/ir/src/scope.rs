//! This module contains the [`Scope`] definition, the unit the binding
//! optimizer analyzes and rewrites: a method or closure body.
use std::collections::BTreeSet;

use cranelift_entity::entity_impl;
use cranelift_entity::PrimaryMap;
use rustc_hash::FxHashMap;

use crate::{ClosureId, InsnData, InsnId, Layout, VarId, Variable};

/// An opaque reference to [`BlockData`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);
cranelift_entity::entity_impl!(BlockId, "block");

/// A block data definition.
/// A block data doesn't hold any information for layout of a program. It is
/// managed by [`Layout`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockData {
    /// The handler receiving exceptions raised inside the block.
    pub handler: Option<BlockId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Method,
    Closure,
    Script,
}

impl ScopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Method => "method",
            Self::Closure => "closure",
            Self::Script => "script",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub name: String,
    pub kind: ScopeKind,
    pub layout: Layout,

    /// Own locals read or written by some nested closure.
    ///
    /// Populated by the IR builder. Only these variables (and enclosing
    /// locals) are candidates for binding placement; an incomplete set makes
    /// the optimizer under-allocate.
    pub used_by_closures: BTreeSet<VarId>,

    /// The binding can be observed outside the instructions of this scope
    /// (`binding`, `eval`, an escaping closure), so every call and every exit
    /// may read or write it.
    pub binding_escapes: bool,

    /// Set when placement failed and the scope fell back to treating every
    /// captured local as always frame backed.
    pub eager_binding: bool,

    blocks: PrimaryMap<BlockId, BlockData>,
    insns: PrimaryMap<InsnId, InsnData>,
    vars: PrimaryMap<VarId, Variable>,
    var_index: FxHashMap<Variable, VarId>,
    closures: PrimaryMap<ClosureId, Scope>,
}

impl Scope {
    pub fn new(name: impl Into<String>, kind: ScopeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            layout: Layout::new(),
            used_by_closures: BTreeSet::new(),
            binding_escapes: false,
            eager_binding: false,
            blocks: PrimaryMap::new(),
            insns: PrimaryMap::new(),
            vars: PrimaryMap::new(),
            var_index: FxHashMap::default(),
            closures: PrimaryMap::new(),
        }
    }

    /// Returns `true` if the scope has a materialized control flow graph.
    pub fn has_cfg(&self) -> bool {
        self.layout.entry_block().is_some()
    }

    pub fn make_block(&mut self) -> BlockId {
        self.blocks.push(BlockData::default())
    }

    pub fn handler_of(&self, block: BlockId) -> Option<BlockId> {
        self.blocks[block].handler
    }

    pub fn set_handler(&mut self, block: BlockId, handler: Option<BlockId>) {
        self.blocks[block].handler = handler;
    }

    /// Allocates an instruction. The instruction is not inserted in the
    /// layout.
    pub fn make_insn(&mut self, data: InsnData) -> InsnId {
        self.insns.push(data)
    }

    pub fn insn(&self, insn: InsnId) -> &InsnData {
        &self.insns[insn]
    }

    pub fn insn_result(&self, insn: InsnId) -> Option<VarId> {
        self.insns[insn].result()
    }

    /// Returns every instruction in layout order.
    pub fn iter_insns(&self) -> impl Iterator<Item = InsnId> + '_ {
        self.layout
            .iter_block()
            .flat_map(move |block| self.layout.iter_insn(block))
    }

    /// Returns the interned local variable `name` at `depth`, declaring it
    /// on first use.
    pub fn local(&mut self, name: &str, depth: u32) -> VarId {
        self.intern(Variable::local(name, depth))
    }

    pub fn lookup_local(&self, name: &str, depth: u32) -> Option<VarId> {
        self.var_index.get(&Variable::local(name, depth)).copied()
    }

    /// Makes a fresh temporary.
    pub fn make_temp(&mut self) -> VarId {
        let index = self.vars.values().filter(|v| v.is_temporary()).count() as u32;
        self.intern(Variable::Temporary { index })
    }

    pub fn var(&self, var: VarId) -> &Variable {
        &self.vars[var]
    }

    pub fn vars(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars.iter()
    }

    pub fn var_num(&self) -> usize {
        self.vars.len()
    }

    /// Returns the locals declared by the scope itself.
    pub fn declared_vars(&self) -> impl Iterator<Item = VarId> + '_ {
        self.vars
            .iter()
            .filter(|(_, v)| v.depth() == Some(0))
            .map(|(id, _)| id)
    }

    /// Returns the locals of enclosing scopes referenced by this scope.
    pub fn enclosing_vars(&self) -> impl Iterator<Item = VarId> + '_ {
        self.vars
            .iter()
            .filter(|(_, v)| v.is_enclosing())
            .map(|(id, _)| id)
    }

    pub fn is_captured(&self, var: VarId) -> bool {
        self.used_by_closures.contains(&var)
    }

    pub fn add_closure(&mut self, closure: Scope) -> ClosureId {
        debug_assert_eq!(closure.kind, ScopeKind::Closure);
        self.closures.push(closure)
    }

    pub fn closure(&self, closure: ClosureId) -> &Scope {
        &self.closures[closure]
    }

    pub fn closures(&self) -> impl Iterator<Item = (ClosureId, &Scope)> {
        self.closures.iter()
    }

    pub fn closures_mut(&mut self) -> impl Iterator<Item = (ClosureId, &mut Scope)> {
        self.closures.iter_mut()
    }

    fn intern(&mut self, var: Variable) -> VarId {
        if let Some(&id) = self.var_index.get(&var) {
            return id;
        }
        let id = self.vars.push(var.clone());
        self.var_index.insert(var, id);
        id
    }
}
