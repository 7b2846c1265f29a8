//! Linear-scan block ordering.
//!
//! Computes the total block order a linear-scan register allocator
//! processes a method in. The order must keep every block after its
//! dominator, every successor after its predecessors (back edges of loops
//! excepted), and every loop's blocks in one contiguous run, so that live
//! intervals built over the order stay well formed.
//!
//! The computation is two walks over the graph:
//!
//! 1. A depth-first discovery walk that counts incoming forward edges,
//!    classifies back edges (flagging loop headers and loop ends), and
//!    numbers loops in post-order so inner loops get smaller indices.
//!    Loop membership is then flood-filled backwards from each loop end,
//!    loops that contain the method entry are discarded as non-natural,
//!    and every block gets its loop depth and innermost loop index.
//! 2. A worklist pass that emits blocks once all their forward edges are
//!    processed, picking among eligible blocks by a weight that keeps
//!    loop bodies dense and defers return-adjacent blocks to the end.
//!
//! Both walks use explicit stacks; method graphs can be deep enough to
//! overrun native recursion.

use bitvec::prelude::*;
use log::{debug, trace};

use crate::error::{CompileError, CompileResult};

use super::block::{BlockFlags, BlockId};
use super::dominators::DominatorTree;
use super::graph::ControlFlowGraph;
use super::loops::Loop;

/// Result of the ordering pass.
///
/// Holds the emitted order and the surviving natural-loop structure. The
/// pass also writes `linear_scan_number`, `loop_index`, `loop_depth` and
/// the loop flags onto every reachable block.
#[derive(Debug)]
pub struct LinearScanOrder {
    order: Vec<BlockId>,
    /// Per-loop membership, one bit per block id.
    loop_rows: Vec<BitVec>,
    /// Header of each surviving loop, indexed like `loop_rows`.
    headers: Vec<BlockId>,
}

/// Computes the linear-scan block order for the graph reachable from
/// `entry`, rewriting the per-block ordering fields as a side effect.
///
/// `dominators` must hold the immediate dominator of every reachable
/// block except the entry; it is consulted by the debug-build
/// verification pass. Fails on graphs that violate the ordering
/// contract; such graphs indicate a bug in an earlier phase, and the
/// caller must abort compilation of the method.
pub fn compute_linear_scan_order(
    cfg: &mut ControlFlowGraph,
    entry: BlockId,
    dominators: &DominatorTree,
) -> CompileResult<LinearScanOrder> {
    let mut computer = OrderComputer::new(cfg, entry);
    computer.reset_blocks();
    computer.count_edges();
    if !computer.headers.is_empty() {
        computer.mark_loops();
        computer.clear_non_natural_loops();
        computer.assign_loop_depth();
    }
    computer.compute_scan_order()?;

    let result = LinearScanOrder {
        order: computer.order,
        loop_rows: computer.loop_rows,
        headers: computer.headers,
    };
    result.log_blocks(cfg, dominators);
    if cfg!(debug_assertions) {
        result.verify(cfg, dominators)?;
    }
    Ok(result)
}

impl LinearScanOrder {
    /// The blocks in linear-scan order; `linear_scan_number` of each
    /// block equals its position here.
    pub fn blocks(&self) -> &[BlockId] {
        &self.order
    }

    /// Number of natural loops. Loops containing the entry block were
    /// discarded and are not counted.
    pub fn num_loops(&self) -> usize {
        self.loop_rows.len()
    }

    pub fn is_block_in_loop(&self, loop_index: usize, block: BlockId) -> bool {
        self.loop_rows[loop_index][block.index()]
    }

    /// Builds the [`Loop`] structures for the surviving loops: members in
    /// scan order (header first), exit blocks, and the follow block when
    /// the loop exits to a single target.
    pub fn loops(&self, cfg: &ControlFlowGraph) -> Vec<Loop> {
        let mut loops = Vec::with_capacity(self.num_loops());
        for (index, row) in self.loop_rows.iter().enumerate() {
            let members: Vec<BlockId> = self
                .order
                .iter()
                .copied()
                .filter(|b| row[b.index()])
                .collect();
            let header = self.headers[index];
            debug_assert_eq!(members.first(), Some(&header));

            let mut exit_blocks = Vec::new();
            let mut outside: Vec<BlockId> = Vec::new();
            for &member in &members {
                let mut is_exit = false;
                for &succ in cfg.block(member).succs() {
                    if !row[succ.index()] {
                        is_exit = true;
                        if !outside.contains(&succ) {
                            outside.push(succ);
                        }
                    }
                }
                if is_exit {
                    exit_blocks.push(member);
                }
            }
            let follow = match outside.as_slice() {
                [single] => Some(*single),
                _ => None,
            };
            loops.push(Loop::new(index, members, header, exit_blocks, follow));
        }
        loops
    }

    /// Re-derives every ordering constraint from the emitted order.
    ///
    /// Runs automatically in debug builds at the end of
    /// [`compute_linear_scan_order`]; tests can call it directly.
    pub fn verify(&self, cfg: &ControlFlowGraph, dominators: &DominatorTree) -> CompileResult<()> {
        for (i, &cur_id) in self.order.iter().enumerate() {
            let cur = cfg.block(cur_id);
            if cur.linear_scan_number != i as i32 {
                return Err(CompileError::BlockOrder {
                    reason: format!(
                        "{cur_id} has linear scan number {} but sits at position {i}",
                        cur.linear_scan_number
                    ),
                });
            }

            for &succ_id in cur.succs() {
                let succ = cfg.block(succ_id);
                if succ.linear_scan_number < 0 {
                    return Err(CompileError::BlockOrder {
                        reason: format!("successor {succ_id} of {cur_id} was never ordered"),
                    });
                }
                if !cur.is_loop_end() && succ.linear_scan_number <= cur.linear_scan_number {
                    return Err(CompileError::BlockOrder {
                        reason: format!(
                            "{cur_id} must precede its successor {succ_id} on a forward edge"
                        ),
                    });
                }
                if cur.loop_depth == succ.loop_depth
                    && cur.loop_index != succ.loop_index
                    && !succ.is_loop_header()
                {
                    return Err(CompileError::LoopStructure {
                        reason: format!(
                            "adjacent blocks {cur_id} and {succ_id} share a loop depth but not a loop"
                        ),
                    });
                }
            }

            for &pred_id in cur.preds() {
                let pred = cfg.block(pred_id);
                if pred.linear_scan_number < 0 {
                    return Err(CompileError::BlockOrder {
                        reason: format!("predecessor {pred_id} of {cur_id} was never ordered"),
                    });
                }
                if !cur.is_loop_header() && pred.linear_scan_number >= cur.linear_scan_number {
                    return Err(CompileError::BlockOrder {
                        reason: format!(
                            "{cur_id} must follow its predecessor {pred_id} on a forward edge"
                        ),
                    });
                }
                if cur.loop_depth == pred.loop_depth
                    && cur.loop_index != pred.loop_index
                    && !cur.is_loop_header()
                {
                    return Err(CompileError::LoopStructure {
                        reason: format!(
                            "adjacent blocks {pred_id} and {cur_id} share a loop depth but not a loop"
                        ),
                    });
                }
                if let Some(dom) = dominators.idom(cur_id) {
                    if cfg.block(dom).linear_scan_number > pred.linear_scan_number {
                        return Err(CompileError::BlockOrder {
                            reason: format!(
                                "dominator {dom} of {cur_id} must precede its predecessor {pred_id}"
                            ),
                        });
                    }
                }
            }

            let dom = dominators.idom(cur_id);
            if i == 0 {
                if dom.is_some() {
                    return Err(CompileError::BlockOrder {
                        reason: format!("entry block {cur_id} must not have a dominator"),
                    });
                }
            } else {
                if dom.is_none() {
                    return Err(CompileError::BlockOrder {
                        reason: format!("{cur_id} has no dominator"),
                    });
                }
                if cur.preds().len() == 1 && dom != Some(cur.preds()[0]) {
                    return Err(CompileError::BlockOrder {
                        reason: format!(
                            "single predecessor of {cur_id} must also be its dominator"
                        ),
                    });
                }
            }
        }

        // every loop occupies one contiguous run of the order
        for loop_index in 0..self.num_loops() {
            if !self.order.is_empty() && self.is_block_in_loop(loop_index, self.order[0]) {
                return Err(CompileError::LoopStructure {
                    reason: format!("entry block belongs to loop {loop_index}"),
                });
            }
            let mut i = 0;
            while i < self.order.len() && !self.is_block_in_loop(loop_index, self.order[i]) {
                i += 1;
            }
            while i < self.order.len() && self.is_block_in_loop(loop_index, self.order[i]) {
                i += 1;
            }
            while i < self.order.len() {
                if self.is_block_in_loop(loop_index, self.order[i]) {
                    return Err(CompileError::LoopStructure {
                        reason: format!(
                            "loop {loop_index} is not contiguous in the linear scan order"
                        ),
                    });
                }
                i += 1;
            }
        }

        Ok(())
    }

    fn log_blocks(&self, cfg: &ControlFlowGraph, dominators: &DominatorTree) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        debug!("----- linear scan block order:");
        for &id in &self.order {
            let block = cfg.block(id);
            let mut line = format!(
                "{:4}: {}  loop {:2} depth {:2}",
                block.linear_scan_number, id, block.loop_index, block.loop_depth
            );
            line.push_str(if block.is_critical_edge_split() { " ce" } else { "   " });
            line.push_str(if block.is_loop_header() { " lh" } else { "   " });
            line.push_str(if block.is_loop_end() { " le" } else { "   " });
            match dominators.idom(id) {
                Some(dom) => line.push_str(&format!("  dom {dom}")),
                None => line.push_str("  dom -"),
            }
            debug!("{line}");
        }
    }
}

/// One frame of the explicit discovery stack.
#[derive(Clone, Copy)]
struct Frame {
    block: BlockId,
    /// Number of successor edges already handled.
    next: usize,
}

struct OrderComputer<'a> {
    cfg: &'a mut ControlFlowGraph,
    entry: BlockId,
    visited: BitVec,
    active: BitVec,
    /// Incoming forward edges still unprocessed, per block. Goes negative
    /// when back edges are discounted, which is exactly what keeps a loop
    /// header from becoming eligible twice.
    forward_branches: Vec<i32>,
    /// (loop end, loop header) pair per discovered back edge.
    loop_ends: Vec<(BlockId, BlockId)>,
    /// Loop headers in discovery post-order; position = loop index.
    headers: Vec<BlockId>,
    loop_rows: Vec<BitVec>,
    num_blocks: usize,
    order: Vec<BlockId>,
    work_list: Vec<BlockId>,
    /// Pass-scoped weight table; `linear_scan_number` is only written
    /// once a block is appended to the final order.
    weights: Vec<u32>,
}

impl<'a> OrderComputer<'a> {
    fn new(cfg: &'a mut ControlFlowGraph, entry: BlockId) -> Self {
        let max_block_id = cfg.max_block_id();
        Self {
            cfg,
            entry,
            visited: bitvec![0; max_block_id],
            active: bitvec![0; max_block_id],
            forward_branches: vec![0; max_block_id],
            loop_ends: Vec::new(),
            headers: Vec::new(),
            loop_rows: Vec::new(),
            num_blocks: 0,
            order: Vec::new(),
            work_list: Vec::new(),
            weights: vec![0; max_block_id],
        }
    }

    /// Clears the ordering state a previous run may have left behind, so
    /// recomputation over an unmodified graph is idempotent. The critical
    /// edge split flag belongs to the upstream splitting pass and stays.
    fn reset_blocks(&mut self) {
        for i in 0..self.cfg.max_block_id() {
            let block = self.cfg.block_mut(BlockId::new(i as u32));
            block.clear_flag(
                BlockFlags::LOOP_HEADER | BlockFlags::LOOP_END | BlockFlags::BACKWARD_BRANCH_TARGET,
            );
            block.loop_index = -1;
            block.loop_depth = 0;
            block.linear_scan_number = -1;
        }
    }

    fn begin_visit(&mut self, block: BlockId) {
        self.visited.set(block.index(), true);
        self.active.set(block.index(), true);
        self.num_blocks += 1;
    }

    /// Discovery walk: counts forward edges, flags loop headers and loop
    /// ends, and numbers loops in post-order so inner loops get the
    /// smaller indices.
    fn count_edges(&mut self) {
        debug!("----- counting edges and discovering loops");

        let mut stack: Vec<Frame> = Vec::new();
        self.begin_visit(self.entry);
        stack.push(Frame {
            block: self.entry,
            next: 0,
        });

        while let Some(&frame) = stack.last() {
            let block = frame.block;
            let num_succs = self.cfg.block(block).succs().len();

            if frame.next < num_succs {
                stack.last_mut().expect("frame").next += 1;
                // successors are handled last-to-first, matching the
                // recursive formulation this walk replaces
                let succ = self.cfg.block(block).succs()[num_succs - 1 - frame.next];

                if self.active[succ.index()] {
                    // back edge: target is on the current DFS path
                    debug_assert!(self.visited[succ.index()]);
                    trace!("back edge {block} -> {succ}");
                    self.cfg
                        .block_mut(succ)
                        .set_flag(BlockFlags::LOOP_HEADER | BlockFlags::BACKWARD_BRANCH_TARGET);
                    self.cfg.block_mut(block).set_flag(BlockFlags::LOOP_END);
                    self.loop_ends.push((block, succ));
                } else {
                    self.forward_branches[succ.index()] += 1;
                    if !self.visited[succ.index()] {
                        self.begin_visit(succ);
                        stack.push(Frame {
                            block: succ,
                            next: 0,
                        });
                    }
                }
            } else {
                self.active.set(block.index(), false);

                // assign the loop index on the way out: every loop nested
                // inside this one has already been numbered
                if self.cfg.block(block).is_loop_header() {
                    let index = self.headers.len();
                    let header = self.cfg.block_mut(block);
                    debug_assert_eq!(header.loop_index, -1, "loop index set twice");
                    header.loop_index = index as i32;
                    debug!("{block} is the header of loop {index}");
                    self.headers.push(block);
                }
                stack.pop();
            }
        }
    }

    /// Flood-fills loop membership backwards from every loop end, bounded
    /// by the loop header.
    fn mark_loops(&mut self) {
        debug!("----- marking loop blocks");

        let max_block_id = self.cfg.max_block_id();
        self.loop_rows = vec![bitvec![0; max_block_id]; self.headers.len()];
        let mut work: Vec<BlockId> = Vec::new();

        for i in (0..self.loop_ends.len()).rev() {
            let (loop_end, header) = self.loop_ends[i];
            debug_assert!(self.cfg.block(loop_end).is_loop_end());
            debug_assert!(self.cfg.block(header).is_loop_header());
            let loop_index = self.cfg.block(header).loop_index;
            debug_assert!(loop_index >= 0 && (loop_index as usize) < self.headers.len());
            let loop_index = loop_index as usize;
            trace!("marking loop {loop_index}: {header} .. {loop_end}");

            work.push(loop_end);
            self.loop_rows[loop_index].set(loop_end.index(), true);

            while let Some(top) = work.pop() {
                debug_assert!(self.loop_rows[loop_index][top.index()]);
                if top == header {
                    continue;
                }
                for pi in (0..self.cfg.block(top).preds().len()).rev() {
                    let pred = self.cfg.block(top).preds()[pi];
                    if !self.loop_rows[loop_index][pred.index()] {
                        self.loop_rows[loop_index].set(pred.index(), true);
                        work.push(pred);
                    }
                }
            }
        }
    }

    /// Drops loops that contain the method entry. Such a loop has a
    /// second way in besides its header, so it is not a natural loop and
    /// must not constrain the order.
    fn clear_non_natural_loops(&mut self) {
        let entry_index = self.entry.index();
        let rows = std::mem::take(&mut self.loop_rows);
        let headers = std::mem::take(&mut self.headers);
        for (row, header) in rows.into_iter().zip(headers) {
            if row[entry_index] {
                debug!("discarding non-natural loop with header {header}");
            } else {
                self.loop_rows.push(row);
                self.headers.push(header);
            }
        }
    }

    /// Visits every reachable block once, assigning its loop depth and
    /// its innermost surviving loop index.
    fn assign_loop_depth(&mut self) {
        debug!("----- computing loop depth");

        self.visited.fill(false);
        let mut work = vec![self.entry];

        while let Some(cur) = work.pop() {
            if self.visited[cur.index()] {
                continue;
            }
            self.visited.set(cur.index(), true);

            let mut min_loop_index = -1;
            let mut loop_depth = 0;
            for index in (0..self.loop_rows.len()).rev() {
                if self.loop_rows[index][cur.index()] {
                    min_loop_index = index as i32;
                    loop_depth += 1;
                }
            }
            let block = self.cfg.block_mut(cur);
            block.loop_depth = loop_depth;
            block.loop_index = min_loop_index;

            for i in (0..self.cfg.block(cur).succs().len()).rev() {
                work.push(self.cfg.block(cur).succs()[i]);
            }
        }
    }

    /// Discounts the edge just traveled into `block`. The block becomes
    /// eligible exactly when its last incoming forward edge is processed;
    /// back-edge traversals push the counter negative and never re-ready
    /// an already emitted block.
    fn is_ready(&mut self, block: BlockId) -> bool {
        let count = &mut self.forward_branches[block.index()];
        *count -= 1;
        if *count != 0 {
            return false;
        }
        debug_assert!(
            !self.order.contains(&block),
            "block can become ready only once"
        );
        debug_assert!(
            !self.work_list.contains(&block),
            "block can become ready only once"
        );
        true
    }

    fn compute_weight(&self, cur: BlockId) -> u32 {
        let block = self.cfg.block(cur);
        let single_succ = match block.succs() {
            [s] => Some(*s),
            _ => None,
        };

        // loop depth dominates all other criteria; it gets 15 bits, and
        // deeper nesting than that is rejected rather than wrapped
        assert!(
            block.loop_depth < 0x8000,
            "loop depth {} exceeds the weight encoding (maximum 32767)",
            block.loop_depth
        );
        let mut weight = block.loop_depth << 16;
        let mut cur_bit = 15;

        // two successive blocks can share a loop depth without sharing a
        // loop (endless loops); keep the header behind such peers
        if !block.is_loop_header() {
            weight |= 1 << cur_bit;
        }
        cur_bit -= 1;

        // loop ends go after every other block of their loop
        if !block.is_loop_end() {
            weight |= 1 << cur_bit;
        }
        cur_bit -= 1;

        // critical edge split blocks are preferred since they are likely
        // to stay empty
        if block.is_critical_edge_split() {
            weight |= 1 << cur_bit;
        }
        cur_bit -= 1;

        // blocks that return, or fall into a return, go last
        let returns = block.last_inst().is_some_and(|inst| inst.is_return());
        let succ_returns = single_succ.is_some_and(|s| {
            self.cfg
                .block(s)
                .last_inst()
                .is_some_and(|inst| inst.is_return())
        });
        if !returns && !succ_returns {
            weight |= 1 << cur_bit;
        }
        cur_bit -= 1;

        // keep the weight strictly positive
        weight |= 1;

        debug_assert!(cur_bit >= 0, "too many weight flags");
        debug_assert!(weight > 0);
        weight
    }

    /// Stable insertion into the worklist, ascending by weight. Among
    /// equal weights the earlier-inserted block stays later in the list
    /// and is therefore emitted first.
    fn sort_into_work_list(&mut self, block: BlockId) {
        debug_assert!(
            !self.work_list.contains(&block),
            "block already in work list"
        );

        let weight = self.compute_weight(block);
        self.weights[block.index()] = weight;

        self.work_list.push(block);
        let mut at = self.work_list.len() - 1;
        while at > 0 && weight <= self.weights[self.work_list[at - 1].index()] {
            self.work_list[at] = self.work_list[at - 1];
            at -= 1;
        }
        self.work_list[at] = block;

        if cfg!(debug_assertions) {
            for i in 1..self.work_list.len() {
                debug_assert!(
                    self.weights[self.work_list[i - 1].index()]
                        <= self.weights[self.work_list[i].index()],
                    "work list out of weight order"
                );
            }
        }
    }

    fn append_block(&mut self, block: BlockId) {
        debug_assert!(
            !self.order.contains(&block),
            "duplicate append into the linear scan order"
        );
        trace!("appending {block} to the linear scan order");
        self.cfg.block_mut(block).linear_scan_number = self.order.len() as i32;
        self.order.push(block);
    }

    fn compute_scan_order(&mut self) -> CompileResult<()> {
        debug!("----- computing final block order");

        self.order = Vec::with_capacity(self.num_blocks);
        debug_assert!(self.work_list.is_empty());

        if self.forward_branches[self.entry.index()] != 0 {
            return Err(CompileError::BlockOrder {
                reason: format!(
                    "entry block {} is not immediately eligible for processing",
                    self.entry
                ),
            });
        }
        self.sort_into_work_list(self.entry);

        while let Some(cur) = self.work_list.pop() {
            self.append_block(cur);
            for i in 0..self.cfg.block(cur).succs().len() {
                let succ = self.cfg.block(cur).succs()[i];
                if self.is_ready(succ) {
                    self.sort_into_work_list(succ);
                }
            }
        }

        if self.order.len() != self.num_blocks {
            return Err(CompileError::BlockOrder {
                reason: format!(
                    "linear scan order covers {} of {} reachable blocks",
                    self.order.len(),
                    self.num_blocks
                ),
            });
        }
        Ok(())
    }
}
