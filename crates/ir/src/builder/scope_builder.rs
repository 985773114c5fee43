use crate::{
    capture::collect_used_by_closures, BlockId, ClosureId, InsnData, InsnId, Operand, Scope,
    ScopeKind, VarId,
};

/// Cursor style builder of a [`Scope`].
///
/// Instructions are appended to the bottom of the current block, set with
/// [`ScopeBuilder::switch_to_block`].
pub struct ScopeBuilder {
    pub scope: Scope,
    current: Option<BlockId>,
}

impl ScopeBuilder {
    pub fn new(name: impl Into<String>, kind: ScopeKind) -> Self {
        Self {
            scope: Scope::new(name, kind),
            current: None,
        }
    }

    /// Finishes building and computes the locals used by nested closures.
    pub fn finish(mut self) -> Scope {
        collect_used_by_closures(&mut self.scope);
        self.scope
    }

    pub fn append_block(&mut self) -> BlockId {
        let block = self.scope.make_block();
        self.scope.layout.append_block(block);
        block
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        debug_assert!(self.scope.layout.is_block_inserted(block));
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    /// Sets the exception handler of the current block.
    pub fn set_handler(&mut self, handler: Option<BlockId>) {
        let block = self.expect_current();
        self.scope.set_handler(block, handler);
    }

    /// Marks the binding of the scope as reachable from outside the scope.
    pub fn set_binding_escapes(&mut self) {
        self.scope.binding_escapes = true;
    }

    /// Returns the local `name` of the scope itself.
    pub fn local(&mut self, name: &str) -> VarId {
        self.scope.local(name, 0)
    }

    /// Returns the local `name` of the `depth`-th enclosing scope.
    pub fn outer(&mut self, name: &str, depth: u32) -> VarId {
        debug_assert!(depth > 0);
        self.scope.local(name, depth)
    }

    pub fn temp(&mut self) -> VarId {
        self.scope.make_temp()
    }

    /// Adds a nested closure. The closure must already be finished.
    pub fn closure(&mut self, closure: Scope) -> ClosureId {
        self.scope.add_closure(closure)
    }

    pub fn receive_arg(&mut self, dst: VarId, index: u32) -> InsnId {
        self.insert(InsnData::ReceiveArg { dst, index })
    }

    pub fn copy(&mut self, dst: VarId, src: impl Into<Operand>) -> InsnId {
        self.insert(InsnData::copy(dst, src))
    }

    /// Inserts a call on `self`.
    pub fn call(
        &mut self,
        dst: Option<VarId>,
        method: &str,
        args: Vec<Operand>,
        closure: Option<ClosureId>,
    ) -> InsnId {
        self.call_on(dst, Operand::SelfValue, method, args, closure)
    }

    pub fn call_on(
        &mut self,
        dst: Option<VarId>,
        receiver: impl Into<Operand>,
        method: &str,
        args: Vec<Operand>,
        closure: Option<ClosureId>,
    ) -> InsnId {
        self.insert(InsnData::Call {
            dst,
            receiver: receiver.into(),
            method: method.to_string(),
            args,
            closure: closure.map(Operand::Closure),
        })
    }

    pub fn receive_exception(&mut self, dst: VarId) -> InsnId {
        self.insert(InsnData::ReceiveException { dst })
    }

    pub fn jump(&mut self, dest: BlockId) -> InsnId {
        self.insert(InsnData::jump(dest))
    }

    pub fn br(&mut self, cond: impl Into<Operand>, then_dest: BlockId, else_dest: BlockId) -> InsnId {
        self.insert(InsnData::Branch {
            cond: cond.into(),
            then_dest,
            else_dest,
        })
    }

    pub fn ret(&mut self, value: impl Into<Operand>) -> InsnId {
        self.insert(InsnData::Return {
            value: value.into(),
        })
    }

    pub fn raise(&mut self, exception: impl Into<Operand>) -> InsnId {
        self.insert(InsnData::Raise {
            exception: exception.into(),
        })
    }

    /// Appends `data` to the bottom of the current block.
    pub fn insert(&mut self, data: InsnData) -> InsnId {
        let block = self.expect_current();
        debug_assert!(
            self.scope
                .layout
                .last_insn_of(block)
                .map_or(true, |last| !self.scope.insn(last).is_terminator()),
            "`{block}` is already terminated"
        );

        let insn = self.scope.make_insn(data);
        self.scope.layout.append_insn(insn, block);
        insn
    }

    fn expect_current(&self) -> BlockId {
        self.current
            .expect("no current block, call `switch_to_block` first")
    }
}
