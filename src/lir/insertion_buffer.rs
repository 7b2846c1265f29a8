//! Write-behind buffer for splicing instructions into a block.
//!
//! The allocator discovers spill and reload points while walking a block's
//! instruction list; inserting each one eagerly would shift every later
//! index it still holds. The insertion buffer records (index, instruction)
//! pairs instead (indices must arrive in non-decreasing order) and the
//! block splices them all in with one pass when the walk is done.
//!
//! A buffer is bound to exactly one block between `init` and `finish` and
//! must never be shared across two targets at once.

use crate::cfg::BlockId;

use super::inst::LirInst;
use super::value::LirValue;

/// Pending insertions for a single block's instruction list.
#[derive(Debug, Default)]
pub struct LirInsertionBuffer {
    /// Block the buffer is bound to; `None` while uninitialized.
    block: Option<BlockId>,
    /// (index, count) records in strictly ascending index order: `count`
    /// instructions go in front of the instruction at `index`.
    index_and_count: Vec<(usize, usize)>,
    /// The instructions to insert, in record order.
    ops: Vec<LirInst>,
}

impl LirInsertionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the buffer to a block. Must not already be initialized.
    pub fn init(&mut self, block: BlockId) {
        assert!(!self.initialized(), "insertion buffer already initialized");
        self.block = Some(block);
        self.index_and_count.clear();
        self.ops.clear();
    }

    pub fn initialized(&self) -> bool {
        self.block.is_some()
    }

    /// The block this buffer is bound to.
    pub fn block(&self) -> Option<BlockId> {
        self.block
    }

    /// Detaches the buffer; called by the block-side commit.
    pub fn finish(&mut self) {
        self.block = None;
    }

    /// Records `op` for insertion in front of the instruction at `index`.
    ///
    /// Indices must be appended in non-decreasing order; appends at the
    /// same index coalesce into the last record.
    pub fn append(&mut self, index: usize, op: LirInst) {
        assert!(self.initialized(), "insertion buffer not initialized");
        match self.index_and_count.last_mut() {
            Some((last_index, count)) if *last_index == index => {
                *count += 1;
            }
            Some((last_index, _)) => {
                assert!(
                    *last_index < index,
                    "insertions must be appended in ascending index order"
                );
                self.index_and_count.push((index, 1));
            }
            None => self.index_and_count.push((index, 1)),
        }
        self.ops.push(op);
        debug_assert!(self.verify());
    }

    /// Records a `dst = src` move in front of the instruction at `index`.
    pub fn move_value(&mut self, index: usize, src: LirValue, dst: LirValue) {
        self.append(index, LirInst::mov(src, dst));
    }

    pub fn number_of_insertion_points(&self) -> usize {
        self.index_and_count.len()
    }

    pub fn index_at(&self, i: usize) -> usize {
        self.index_and_count[i].0
    }

    pub fn count_at(&self, i: usize) -> usize {
        self.index_and_count[i].1
    }

    pub fn number_of_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn op_at(&self, i: usize) -> &LirInst {
        &self.ops[i]
    }

    /// Hands the records and instructions to the committing block.
    pub(crate) fn drain_for_commit(&mut self) -> (Vec<(usize, usize)>, Vec<LirInst>) {
        (
            std::mem::take(&mut self.index_and_count),
            std::mem::take(&mut self.ops),
        )
    }

    fn verify(&self) -> bool {
        let mut sum = 0;
        let mut prev_index = None;
        for &(index, count) in &self.index_and_count {
            assert!(
                prev_index.map_or(true, |p| p < index),
                "insertion indices must be ascending"
            );
            assert!(count > 0, "empty insertion record");
            prev_index = Some(index);
            sum += count;
        }
        assert_eq!(sum, self.ops.len(), "record counts must cover every op");
        true
    }
}
