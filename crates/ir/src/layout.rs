//! This module contains scope layout information including block order and
//! instruction order.
//!
//! Blocks and instructions are arena allocated and referenced by index; the
//! layout only links them together, so inserting an instruction never
//! invalidates other live [`InsnId`]s.
use cranelift_entity::SecondaryMap;

use crate::{BlockId, InsnId};

#[derive(Debug, Clone)]
pub struct Layout {
    blocks: SecondaryMap<BlockId, BlockNode>,
    insns: SecondaryMap<InsnId, InsnNode>,
    entry_block: Option<BlockId>,
    last_block: Option<BlockId>,
}

impl Default for Layout {
    fn default() -> Self {
        Self::new()
    }
}

impl Layout {
    pub fn new() -> Self {
        Self {
            blocks: SecondaryMap::new(),
            insns: SecondaryMap::new(),
            entry_block: None,
            last_block: None,
        }
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry_block
    }

    pub fn last_block(&self) -> Option<BlockId> {
        self.last_block
    }

    pub fn next_block_of(&self, block: BlockId) -> Option<BlockId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].next
    }

    pub fn is_block_inserted(&self, block: BlockId) -> bool {
        Some(block) == self.entry_block || self.blocks[block] != BlockNode::default()
    }

    pub fn first_insn_of(&self, block: BlockId) -> Option<InsnId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].first_insn
    }

    pub fn last_insn_of(&self, block: BlockId) -> Option<InsnId> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].last_insn
    }

    pub fn prev_insn_of(&self, insn: InsnId) -> Option<InsnId> {
        debug_assert!(self.is_insn_inserted(insn));
        self.insns[insn].prev
    }

    pub fn next_insn_of(&self, insn: InsnId) -> Option<InsnId> {
        debug_assert!(self.is_insn_inserted(insn));
        self.insns[insn].next
    }

    /// Returns the block containing `insn`.
    ///
    /// # Panics
    /// Panics if `insn` is not inserted in the layout.
    pub fn insn_block(&self, insn: InsnId) -> BlockId {
        self.insns[insn]
            .block
            .expect("instruction is not inserted in the layout")
    }

    pub fn is_insn_inserted(&self, insn: InsnId) -> bool {
        self.insns[insn].block.is_some()
    }

    /// Returns the position counter of `insn`.
    ///
    /// Positions are only meaningful after [`Layout::renumber`]; they
    /// increase monotonically within a block and across blocks in layout
    /// order.
    pub fn position_of(&self, insn: InsnId) -> u32 {
        debug_assert!(self.is_insn_inserted(insn));
        self.insns[insn].position
    }

    /// Reassigns position counters in layout order.
    pub fn renumber(&mut self) {
        let mut position = 0;
        let mut next_block = self.entry_block;
        while let Some(block) = next_block {
            let mut next_insn = self.blocks[block].first_insn;
            while let Some(insn) = next_insn {
                let node = &mut self.insns[insn];
                node.position = position;
                position += 1;
                next_insn = node.next;
            }
            next_block = self.blocks[block].next;
        }
    }

    pub fn iter_block(&self) -> impl Iterator<Item = BlockId> + '_ {
        BlockIter {
            next: self.entry_block,
            blocks: &self.blocks,
        }
    }

    pub fn iter_insn(&self, block: BlockId) -> impl Iterator<Item = InsnId> + '_ {
        debug_assert!(self.is_block_inserted(block));
        InsnIter {
            next: self.blocks[block].first_insn,
            insns: &self.insns,
        }
    }

    pub fn iter_insn_rev(&self, block: BlockId) -> impl Iterator<Item = InsnId> + '_ {
        debug_assert!(self.is_block_inserted(block));
        RevInsnIter {
            next: self.blocks[block].last_insn,
            insns: &self.insns,
        }
    }

    pub fn block_num(&self) -> usize {
        self.iter_block().count()
    }

    pub fn append_block(&mut self, block: BlockId) {
        debug_assert!(!self.is_block_inserted(block));

        let mut block_node = BlockNode::default();

        if let Some(last_block) = self.last_block {
            let last_block_node = &mut self.blocks[last_block];
            last_block_node.next = Some(block);
            block_node.prev = Some(last_block);
        } else {
            self.entry_block = Some(block);
        }

        self.blocks[block] = block_node;
        self.last_block = Some(block);
    }

    pub fn append_insn(&mut self, insn: InsnId, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));
        debug_assert!(!self.is_insn_inserted(insn));

        let block_node = &mut self.blocks[block];
        let mut insn_node = InsnNode::with_block(block);

        if let Some(last_insn) = block_node.last_insn {
            insn_node.prev = Some(last_insn);
            self.insns[last_insn].next = Some(insn);
        } else {
            block_node.first_insn = Some(insn);
        }

        block_node.last_insn = Some(insn);
        self.insns[insn] = insn_node;
    }

    pub fn prepend_insn(&mut self, insn: InsnId, block: BlockId) {
        debug_assert!(self.is_block_inserted(block));
        debug_assert!(!self.is_insn_inserted(insn));

        let block_node = &mut self.blocks[block];
        let mut insn_node = InsnNode::with_block(block);

        if let Some(first_insn) = block_node.first_insn {
            insn_node.next = Some(first_insn);
            self.insns[first_insn].prev = Some(insn);
        } else {
            block_node.last_insn = Some(insn);
        }

        block_node.first_insn = Some(insn);
        self.insns[insn] = insn_node;
    }

    pub fn insert_insn_before(&mut self, insn: InsnId, before: InsnId) {
        debug_assert!(self.is_insn_inserted(before));
        debug_assert!(!self.is_insn_inserted(insn));

        let before_insn_node = &self.insns[before];
        let block = self.insn_block(before);
        let mut insn_node = InsnNode::with_block(block);

        match before_insn_node.prev {
            Some(prev) => {
                insn_node.prev = Some(prev);
                self.insns[prev].next = Some(insn);
            }
            None => self.blocks[block].first_insn = Some(insn),
        }
        insn_node.next = Some(before);
        self.insns[before].prev = Some(insn);
        self.insns[insn] = insn_node;
    }

    pub fn insert_insn_after(&mut self, insn: InsnId, after: InsnId) {
        debug_assert!(self.is_insn_inserted(after));
        debug_assert!(!self.is_insn_inserted(insn));

        let after_insn_node = &self.insns[after];
        let block = self.insn_block(after);
        let mut insn_node = InsnNode::with_block(block);

        match after_insn_node.next {
            Some(next) => {
                insn_node.next = Some(next);
                self.insns[next].prev = Some(insn);
            }
            None => self.blocks[block].last_insn = Some(insn),
        }
        insn_node.prev = Some(after);
        self.insns[after].next = Some(insn);
        self.insns[insn] = insn_node;
    }
}

struct BlockIter<'a> {
    next: Option<BlockId>,
    blocks: &'a SecondaryMap<BlockId, BlockNode>,
}

impl Iterator for BlockIter<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        let next = self.next?;
        self.next = self.blocks[next].next;
        Some(next)
    }
}

struct InsnIter<'a> {
    next: Option<InsnId>,
    insns: &'a SecondaryMap<InsnId, InsnNode>,
}

impl Iterator for InsnIter<'_> {
    type Item = InsnId;

    fn next(&mut self) -> Option<InsnId> {
        let next = self.next?;
        self.next = self.insns[next].next;
        Some(next)
    }
}

struct RevInsnIter<'a> {
    next: Option<InsnId>,
    insns: &'a SecondaryMap<InsnId, InsnNode>,
}

impl Iterator for RevInsnIter<'_> {
    type Item = InsnId;

    fn next(&mut self) -> Option<InsnId> {
        let next = self.next?;
        self.next = self.insns[next].prev;
        Some(next)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
struct BlockNode {
    prev: Option<BlockId>,
    next: Option<BlockId>,
    first_insn: Option<InsnId>,
    last_insn: Option<InsnId>,
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
struct InsnNode {
    /// A block in which the insn exists.
    block: Option<BlockId>,
    /// A previous instruction.
    prev: Option<InsnId>,
    /// A next instruction.
    next: Option<InsnId>,
    /// Position counter, see [`Layout::renumber`].
    position: u32,
}

impl InsnNode {
    fn with_block(block: BlockId) -> Self {
        Self {
            block: Some(block),
            prev: None,
            next: None,
            position: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn block(n: usize) -> BlockId {
        BlockId::new(n)
    }

    fn insn(n: usize) -> InsnId {
        InsnId::new(n)
    }

    #[test]
    fn test_block_insertion() {
        let mut layout = Layout::new();
        assert_eq!(layout.entry_block, None);
        assert_eq!(layout.last_block, None);

        let b1 = block(1);
        layout.append_block(b1);
        assert_eq!(layout.entry_block, Some(b1));
        assert_eq!(layout.last_block, Some(b1));
        assert_eq!(layout.next_block_of(b1), None);

        let b2 = block(2);
        layout.append_block(b2);
        assert_eq!(layout.entry_block, Some(b1));
        assert_eq!(layout.last_block, Some(b2));
        assert_eq!(layout.next_block_of(b1), Some(b2));
    }

    #[test]
    fn test_insn_insertion() {
        let mut layout = Layout::new();
        let b0 = block(0);
        layout.append_block(b0);

        let (i0, i1, i2, i3) = (insn(0), insn(1), insn(2), insn(3));
        layout.append_insn(i0, b0);
        layout.append_insn(i1, b0);
        assert_eq!(layout.first_insn_of(b0), Some(i0));
        assert_eq!(layout.last_insn_of(b0), Some(i1));

        // i2 -> i0 -> i1.
        layout.prepend_insn(i2, b0);
        assert_eq!(layout.first_insn_of(b0), Some(i2));
        assert_eq!(layout.next_insn_of(i2), Some(i0));

        // i2 -> i0 -> i3 -> i1.
        layout.insert_insn_after(i3, i0);
        assert_eq!(
            layout.iter_insn(b0).collect::<Vec<_>>(),
            vec![i2, i0, i3, i1]
        );
        assert_eq!(
            layout.iter_insn_rev(b0).collect::<Vec<_>>(),
            vec![i1, i3, i0, i2]
        );

        let i4 = insn(4);
        layout.insert_insn_before(i4, i2);
        assert_eq!(layout.first_insn_of(b0), Some(i4));
        assert_eq!(layout.insn_block(i4), b0);
    }

    #[test]
    fn renumber_is_monotonic() {
        let mut layout = Layout::new();
        let (b0, b1) = (block(0), block(1));
        layout.append_block(b0);
        layout.append_block(b1);
        layout.append_insn(insn(0), b0);
        layout.append_insn(insn(1), b1);
        layout.append_insn(insn(2), b0);
        layout.insert_insn_before(insn(3), insn(1));
        layout.renumber();

        let positions: Vec<_> = layout
            .iter_block()
            .flat_map(|b| layout.iter_insn(b).collect::<Vec<_>>())
            .map(|i| layout.position_of(i))
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert_eq!(layout.position_of(insn(3)), 2);
    }
}
