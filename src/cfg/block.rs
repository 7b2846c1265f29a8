//! Basic blocks.

use std::fmt;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::lir::{LirInsertionBuffer, LirInst};

/// Identity of a basic block within its control flow graph.
///
/// Blocks are always referenced by id and owned by the graph's arena, so
/// loops in the graph never create ownership cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

bitflags! {
    /// Per-block markers maintained by the ordering pass (and, for
    /// `CRITICAL_EDGE_SPLIT`, by the edge-splitting pass upstream).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u8 {
        const LOOP_HEADER = 1 << 0;
        const LOOP_END = 1 << 1;
        const BACKWARD_BRANCH_TARGET = 1 << 2;
        const CRITICAL_EDGE_SPLIT = 1 << 3;
    }
}

/// A single-entry region of straight-line instructions.
///
/// The block owns its instructions; predecessor and successor edges are
/// id lists maintained by [`ControlFlowGraph`](super::ControlFlowGraph).
/// A non-empty block ends in at most one branch, and that branch is
/// always the last instruction.
#[derive(Debug)]
pub struct BasicBlock {
    id: BlockId,
    instructions: Vec<LirInst>,
    preds: SmallVec<[BlockId; 2]>,
    succs: SmallVec<[BlockId; 2]>,
    flags: BlockFlags,
    /// Innermost loop containing this block, -1 if none.
    pub loop_index: i32,
    /// Number of loops containing this block.
    pub loop_depth: u32,
    /// Position in the linear-scan order, -1 until assigned.
    pub linear_scan_number: i32,
}

impl BasicBlock {
    pub(super) fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            flags: BlockFlags::empty(),
            loop_index: -1,
            loop_depth: 0,
            linear_scan_number: -1,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn instructions(&self) -> &[LirInst] {
        &self.instructions
    }

    pub fn instructions_mut(&mut self) -> &mut Vec<LirInst> {
        &mut self.instructions
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn first_inst(&self) -> Option<&LirInst> {
        self.instructions.first()
    }

    pub fn last_inst(&self) -> Option<&LirInst> {
        self.instructions.last()
    }

    pub fn last_inst_mut(&mut self) -> Option<&mut LirInst> {
        self.instructions.last_mut()
    }

    /// Appends an instruction, keeping the branch terminator last.
    ///
    /// A non-branch appended to a block that already ends in a branch goes
    /// in front of the branch. Appending a second branch is a caller bug.
    pub fn append_inst(&mut self, inst: LirInst) {
        match self.instructions.last() {
            Some(last) if last.is_branch() => {
                assert!(
                    !inst.is_branch(),
                    "cannot insert more than one branch in a basic block"
                );
                let at = self.instructions.len() - 1;
                self.instructions.insert(at, inst);
            }
            _ => self.instructions.push(inst),
        }
    }

    /// Commits an insertion buffer bound to this block, splicing every
    /// buffered instruction in one ascending pass, then detaches it.
    pub fn append_buffer(&mut self, buffer: &mut LirInsertionBuffer) {
        assert_eq!(
            buffer.block(),
            Some(self.id),
            "insertion buffer is bound to a different block"
        );

        let (points, ops) = buffer.drain_for_commit();
        let old = std::mem::take(&mut self.instructions);
        let old_len = old.len();
        let mut merged = Vec::with_capacity(old_len + ops.len());
        let mut ops = ops.into_iter();
        let mut point = points.iter().peekable();

        for (index, inst) in old.into_iter().enumerate() {
            while let Some(&&(at, count)) = point.peek() {
                if at != index {
                    break;
                }
                for _ in 0..count {
                    merged.push(ops.next().expect("op for every recorded count"));
                }
                point.next();
            }
            merged.push(inst);
        }
        // Insertions at the end of the list.
        while let Some(&(at, count)) = point.next() {
            assert!(at == old_len, "insertion index {at} beyond block length");
            for _ in 0..count {
                merged.push(ops.next().expect("op for every recorded count"));
            }
        }
        debug_assert!(ops.next().is_none());

        self.instructions = merged;
        buffer.finish();
    }

    pub fn preds(&self) -> &[BlockId] {
        &self.preds
    }

    pub fn succs(&self) -> &[BlockId] {
        &self.succs
    }

    pub(super) fn add_pred(&mut self, pred: BlockId) -> bool {
        if self.preds.contains(&pred) {
            return false;
        }
        self.preds.push(pred);
        true
    }

    pub(super) fn add_succ(&mut self, succ: BlockId) -> bool {
        if self.succs.contains(&succ) {
            return false;
        }
        self.succs.push(succ);
        true
    }

    pub(super) fn remove_pred(&mut self, pred: BlockId) -> bool {
        match self.preds.iter().position(|&p| p == pred) {
            Some(at) => {
                self.preds.remove(at);
                true
            }
            None => false,
        }
    }

    pub(super) fn remove_succ(&mut self, succ: BlockId) -> bool {
        match self.succs.iter().position(|&s| s == succ) {
            Some(at) => {
                self.succs.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn set_flag(&mut self, flag: BlockFlags) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: BlockFlags) {
        self.flags -= flag;
    }

    pub fn has_flag(&self, flag: BlockFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_loop_header(&self) -> bool {
        self.has_flag(BlockFlags::LOOP_HEADER)
    }

    pub fn is_loop_end(&self) -> bool {
        self.has_flag(BlockFlags::LOOP_END)
    }

    pub fn is_critical_edge_split(&self) -> bool {
        self.has_flag(BlockFlags::CRITICAL_EDGE_SPLIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{LirInst, LirKind, LirValue, LirVariable};

    fn var(i: u32) -> LirValue {
        LirValue::Variable(LirVariable::new(i, LirKind::Int))
    }

    #[test]
    fn append_keeps_branch_last() {
        let mut block = BasicBlock::new(BlockId::new(0));
        block.append_inst(LirInst::mov(var(0), var(1)));
        block.append_inst(LirInst::jump(BlockId::new(1)));
        block.append_inst(LirInst::mov(var(1), var(2)));

        assert_eq!(block.instructions().len(), 3);
        assert!(block.last_inst().unwrap().is_branch());
        assert!(!block.instructions()[1].is_branch());
    }

    #[test]
    #[should_panic(expected = "more than one branch")]
    fn second_branch_is_rejected() {
        let mut block = BasicBlock::new(BlockId::new(0));
        block.append_inst(LirInst::jump(BlockId::new(1)));
        block.append_inst(LirInst::jump(BlockId::new(2)));
    }

    #[test]
    fn edge_lists_deduplicate() {
        let mut block = BasicBlock::new(BlockId::new(0));
        assert!(block.add_succ(BlockId::new(1)));
        assert!(!block.add_succ(BlockId::new(1)));
        assert!(block.remove_succ(BlockId::new(1)));
        assert!(!block.remove_succ(BlockId::new(1)));
    }
}
