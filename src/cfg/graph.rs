//! The control flow graph arena.

use super::block::{BasicBlock, BlockId};

/// Owns every basic block of one method.
///
/// Blocks live in an arena indexed by [`BlockId`]; ids are dense and
/// assigned in creation order, so `max_block_id` doubles as the size of
/// any block-indexed side table.
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    blocks: Vec<BasicBlock>,
    entry: Option<BlockId>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new block and assigns it the next id.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn set_entry(&mut self, entry: BlockId) {
        self.entry = Some(entry);
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// One past the highest assigned block id.
    pub fn max_block_id(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    /// Adds `from -> to` to both edge lists. Duplicate edges collapse.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).add_succ(to);
        self.block_mut(to).add_pred(from);
    }

    /// Removes `from -> to` from both edge lists.
    pub fn remove_edge(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).remove_succ(to);
        self.block_mut(to).remove_pred(from);
    }
}
