//! Loop rotation.
//!
//! Rewrites a pre-test loop into a guarded post-test loop:
//!
//! ```text
//!     while (cond) {          if (cond) {
//!         body                    do {
//!     }                               body
//!                                 } while (cond)
//!                             }
//! ```
//!
//! The steady state of the rotated loop runs one branch per iteration
//! instead of two. The old header keeps only its branch and becomes the
//! guard; its straight-line instructions move into a fresh in-loop header,
//! and a synthesized exit-test block re-tests the condition on the back
//! edge.

use log::{debug, trace};

use crate::lir::LirInst;

use super::block::BlockId;
use super::graph::ControlFlowGraph;
use super::loops::Loop;

/// Rotates every loop whose header ends in a conditional branch.
///
/// Mutates blocks, edges and loop membership in place. Loop analysis must
/// have run on the current graph shape; rotation trusts its invariants.
pub fn rotate_loops(cfg: &mut ControlFlowGraph, loops: &mut [Loop]) {
    for l in loops {
        rotate_loop(cfg, l);
    }
}

fn needs_rotation(cfg: &ControlFlowGraph, l: &Loop) -> bool {
    cfg.block(l.header)
        .last_inst()
        .is_some_and(|inst| inst.is_cond_jump())
}

fn rotate_loop(cfg: &mut ControlFlowGraph, l: &mut Loop) {
    if !needs_rotation(cfg, l) {
        trace!("loop {} needs no rotation", l.index);
        return;
    }
    // without a single exit target there is nowhere to route the false
    // edge of the exit test; leave the loop in pre-test form
    let Some(follow) = l.follow else {
        trace!("loop {} has no follow block, skipping rotation", l.index);
        return;
    };

    let header = l.header;
    debug!("rotating loop {} with header {header}", l.index);

    // split the header: everything but the branch moves to the new header
    let new_header = cfg.create_block();
    let keep_from = cfg.block(header).instructions().len() - 1;
    let moved: Vec<LirInst> = cfg
        .block_mut(header)
        .instructions_mut()
        .drain(..keep_from)
        .collect();
    cfg.block_mut(new_header).instructions_mut().extend(moved);

    // the guard's in-loop edge now enters through the new header
    let in_loop_succs: Vec<BlockId> = cfg
        .block(header)
        .succs()
        .iter()
        .copied()
        .filter(|&s| l.contains(s))
        .collect();
    for succ in in_loop_succs {
        cfg.remove_edge(header, succ);
        cfg.add_edge(new_header, succ);
        cfg.block_mut(header)
            .last_inst_mut()
            .expect("header branch")
            .replace_target(succ, new_header);
    }
    cfg.add_edge(header, new_header);

    // back edges enter the new header as well
    let in_loop_preds: Vec<BlockId> = cfg
        .block(header)
        .preds()
        .iter()
        .copied()
        .filter(|&p| l.contains(p))
        .collect();
    for pred in in_loop_preds {
        cfg.remove_edge(pred, header);
        cfg.add_edge(pred, new_header);
        if let Some(branch) = cfg.block_mut(pred).last_inst_mut().filter(|i| i.is_branch()) {
            branch.replace_target(header, new_header);
        }
    }

    // the old header leaves the loop, the new header leads it
    l.remove_block(header);
    l.add_block_front(new_header);

    // exit test: a copy of the guard's branch re-testing the condition on
    // the back edge, entering the loop at the new header
    let exit_test = cfg.create_block();
    let mut test_branch = cfg
        .block(header)
        .last_inst()
        .expect("header branch")
        .clone();
    test_branch.replace_target(header, new_header);
    cfg.block_mut(exit_test).append_inst(test_branch);

    // exits that branched to the follow block now leave through the exit
    // test; exits with other targets keep them untouched
    let exits: Vec<BlockId> = l.exit_blocks().to_vec();
    for exit in exits {
        let targets_follow = cfg
            .block(exit)
            .last_inst()
            .is_some_and(|inst| inst.is_branch() && inst.targets().contains(&follow));
        if !targets_follow {
            continue;
        }
        cfg.block_mut(exit)
            .last_inst_mut()
            .expect("exit branch")
            .replace_target(follow, exit_test);
        cfg.remove_edge(exit, follow);
        cfg.add_edge(exit, exit_test);
        l.remove_exit_block(exit);
    }
    l.add_exit_block(exit_test);

    // true target, then false target
    cfg.add_edge(exit_test, new_header);
    cfg.add_edge(exit_test, follow);
    l.add_block(exit_test);

    // every in-loop, non-exit predecessor of the new header takes the
    // back edge through the exit test
    let preds: Vec<BlockId> = cfg.block(new_header).preds().to_vec();
    for pred in preds {
        if !l.contains(pred) || l.is_exit_block(pred) {
            continue;
        }
        let is_branch = cfg
            .block(pred)
            .last_inst()
            .is_some_and(|inst| inst.is_branch());
        if !is_branch {
            continue;
        }
        cfg.block_mut(pred)
            .last_inst_mut()
            .expect("branch")
            .replace_target(new_header, exit_test);
        cfg.remove_edge(pred, new_header);
        cfg.add_edge(pred, exit_test);
    }
}
