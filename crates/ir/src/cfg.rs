//! Control flow graph view of a [`Scope`].
//!
//! Besides the normal branch and fall-through edges, the graph records an
//! exception edge from every block containing a raising instruction to the
//! handler protecting that block.
use std::collections::BTreeSet;

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use smallvec::SmallVec;

use crate::{BlockId, Scope};

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ControlFlowGraph {
    entry: PackedOption<BlockId>,
    blocks: SecondaryMap<BlockId, BlockNode>,
    /// Blocks that may leave the activation, normally or by raising.
    pub exits: SmallVec<[BlockId; 8]>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, scope: &Scope) {
        self.clear();

        self.entry = scope.layout.entry_block().into();

        for block in scope.layout.iter_block() {
            self.analyze_block(scope, block);
        }
    }

    pub fn preds_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].preds.iter()
    }

    pub fn succs_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].succs.iter()
    }

    /// Returns the blocks whose raising instructions are handled by `block`.
    pub fn exc_preds_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].exc_preds.iter()
    }

    /// Returns the handler receiving exceptions raised in `block`.
    pub fn exc_succs_of(&self, block: BlockId) -> impl Iterator<Item = &BlockId> {
        self.blocks[block].exc_succs.iter()
    }

    /// Returns normal and exceptional successors of `block`.
    pub fn all_succs_of(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        let node = &self.blocks[block];
        node.succs.union(&node.exc_succs).copied()
    }

    /// Returns normal and exceptional predecessors of `block`.
    pub fn all_preds_of(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        let node = &self.blocks[block];
        node.preds.union(&node.exc_preds).copied()
    }

    pub fn succ_num_of(&self, block: BlockId) -> usize {
        self.blocks[block].succs.len() + self.blocks[block].exc_succs.len()
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry.expand()
    }

    pub fn is_exit(&self, block: BlockId) -> bool {
        self.exits.contains(&block)
    }

    pub fn post_order(&self) -> CfgPostOrder<'_> {
        CfgPostOrder::new(self)
    }

    /// Returns the blocks reachable from the entry in reverse post order.
    pub fn reverse_post_order(&self) -> Vec<BlockId> {
        let mut rpo: Vec<_> = self.post_order().collect();
        rpo.reverse();
        rpo
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[to].preds.insert(from);
        self.blocks[from].succs.insert(to);
    }

    pub fn add_exc_edge(&mut self, from: BlockId, handler: BlockId) {
        self.blocks[handler].exc_preds.insert(from);
        self.blocks[from].exc_succs.insert(handler);
    }

    pub fn clear(&mut self) {
        self.entry = None.into();
        self.blocks.clear();
        self.exits.clear();
    }

    fn analyze_block(&mut self, scope: &Scope, block: BlockId) {
        let handler = scope.handler_of(block);

        let mut may_raise = false;
        for insn in scope.layout.iter_insn(block) {
            may_raise |= scope.insn(insn).can_raise();
        }
        if may_raise {
            match handler {
                Some(handler) => self.add_exc_edge(block, handler),
                None => self.push_exit(block),
            }
        }

        let last = scope.layout.last_insn_of(block).map(|insn| scope.insn(insn));
        match last {
            Some(data) if data.is_terminator() => {
                for dest in data.branch_dests() {
                    self.add_edge(block, dest);
                }
                if data.is_exit() && !(data.can_raise() && handler.is_some()) {
                    self.push_exit(block);
                }
            }

            // Fall through to the next block in layout order.
            _ => match scope.layout.next_block_of(block) {
                Some(next) => self.add_edge(block, next),
                None => self.push_exit(block),
            },
        }
    }

    fn push_exit(&mut self, block: BlockId) {
        if !self.exits.contains(&block) {
            self.exits.push(block);
        }
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
struct BlockNode {
    preds: BTreeSet<BlockId>,
    succs: BTreeSet<BlockId>,
    exc_preds: BTreeSet<BlockId>,
    exc_succs: BTreeSet<BlockId>,
}

pub struct CfgPostOrder<'a> {
    cfg: &'a ControlFlowGraph,
    node_state: SecondaryMap<BlockId, NodeState>,
    stack: Vec<BlockId>,
}

impl<'a> CfgPostOrder<'a> {
    fn new(cfg: &'a ControlFlowGraph) -> Self {
        let mut stack = Vec::new();

        if let Some(entry) = cfg.entry() {
            stack.push(entry);
        }

        Self {
            cfg,
            node_state: SecondaryMap::default(),
            stack,
        }
    }
}

impl Iterator for CfgPostOrder<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        while let Some(&block) = self.stack.last() {
            if self.node_state[block].is_unvisited() {
                self.node_state[block].set_visited();
                for succ in self.cfg.all_succs_of(block) {
                    if self.node_state[succ].is_unvisited() {
                        self.stack.push(succ);
                    }
                }
            } else {
                self.stack.pop();
                if !self.node_state[block].has_finished() {
                    self.node_state[block].set_finished();
                    return Some(block);
                }
            }
        }

        None
    }
}

#[derive(Default, Debug, Clone, Copy)]
struct NodeState(u8);

impl NodeState {
    fn is_unvisited(self) -> bool {
        self.0 == 0
    }

    fn has_finished(self) -> bool {
        self.0 == 2
    }

    fn set_visited(&mut self) {
        self.0 = 1;
    }

    fn set_finished(&mut self) {
        self.0 = 2;
    }
}
