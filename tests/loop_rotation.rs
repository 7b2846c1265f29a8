//! Loop rotation over hand-built graphs.

use regprep::{
    compute_linear_scan_order, rotate_loops, BlockId, ControlFlowGraph, DominatorTree,
    LirCondition, LirInst, LirKind, LirOpcode, LirValue, LirVariable,
};

fn var(i: u32) -> LirValue {
    LirValue::Variable(LirVariable::new(i, LirKind::Int))
}

fn jump(cfg: &mut ControlFlowGraph, from: BlockId, to: BlockId) {
    cfg.block_mut(from).append_inst(LirInst::jump(to));
    cfg.add_edge(from, to);
}

fn branch(cfg: &mut ControlFlowGraph, from: BlockId, on_true: BlockId, on_false: BlockId) {
    cfg.block_mut(from)
        .append_inst(LirInst::cond_jump(LirCondition::Lt, var(0), var(1), on_true, on_false));
    cfg.add_edge(from, on_true);
    cfg.add_edge(from, on_false);
}

/// entry -> header -> body -> header, header -> follow; the header carries
/// one straight-line instruction in front of its branch.
fn build_while_loop(cfg: &mut ControlFlowGraph) -> (BlockId, BlockId, BlockId, BlockId) {
    let entry = cfg.create_block();
    let header = cfg.create_block();
    let body = cfg.create_block();
    let follow = cfg.create_block();
    cfg.set_entry(entry);

    jump(cfg, entry, header);
    cfg.block_mut(header).append_inst(LirInst::mov(var(2), var(0)));
    branch(cfg, header, body, follow);
    cfg.block_mut(body).append_inst(LirInst::mov(var(0), var(3)));
    jump(cfg, body, header);
    cfg.block_mut(follow).append_inst(LirInst::ret(LirValue::Illegal));

    (entry, header, body, follow)
}

fn total_instructions(cfg: &ControlFlowGraph) -> usize {
    cfg.blocks().map(|b| b.instructions().len()).sum()
}

#[test]
fn while_loop_becomes_guarded_post_test() {
    let mut cfg = ControlFlowGraph::new();
    let (entry, header, body, follow) = build_while_loop(&mut cfg);

    let dominators: DominatorTree =
        [(header, entry), (body, header), (follow, header)].into_iter().collect();
    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();
    let mut loops = order.loops(&cfg);

    let blocks_before = cfg.num_blocks();
    let insts_before = total_instructions(&cfg);
    let guard_branch = cfg.block(header).last_inst().unwrap().clone();

    rotate_loops(&mut cfg, &mut loops);

    // rotation synthesizes exactly two blocks and duplicates exactly one
    // instruction, the branch
    assert_eq!(cfg.num_blocks(), blocks_before + 2);
    assert_eq!(total_instructions(&cfg), insts_before + 1);

    let new_header = loops[0].header;
    assert_ne!(new_header, header);

    // the guard kept only its branch, testing the same condition
    let guard = cfg.block(header);
    assert_eq!(guard.instructions().len(), 1);
    let guard_inst = guard.last_inst().unwrap();
    assert!(guard_inst.is_cond_jump());
    assert_eq!(guard_inst.condition, guard_branch.condition);
    // its loop-entry edge goes straight to the new header
    assert_eq!(guard_inst.true_target(), new_header);

    // the straight-line prefix of the old header moved, in order
    let rotated_header = cfg.block(new_header);
    assert_eq!(rotated_header.instructions().len(), 1);
    assert_eq!(rotated_header.instructions()[0], LirInst::mov(var(2), var(0)));

    // the body's back edge now runs through the exit test
    let exit_test = cfg.block(body).last_inst().unwrap().targets()[0];
    assert_ne!(exit_test, new_header);
    let test_inst = cfg.block(exit_test).last_inst().unwrap();
    assert!(test_inst.is_cond_jump());
    assert_eq!(test_inst.condition, guard_branch.condition);
    assert_eq!(test_inst.true_target(), new_header);
    assert_eq!(test_inst.false_target(), follow);

    // membership follows the rewrite
    assert!(!loops[0].contains(header));
    assert!(loops[0].contains(new_header));
    assert!(loops[0].contains(body));
    assert!(loops[0].contains(exit_test));
    assert_eq!(loops[0].exit_blocks(), &[exit_test]);

    // edge lists agree with the branches
    assert!(cfg.block(header).succs().contains(&new_header));
    assert!(cfg.block(exit_test).preds().contains(&body));
    assert!(cfg.block(exit_test).succs().contains(&new_header));
    assert!(cfg.block(exit_test).succs().contains(&follow));
    assert!(cfg.block(follow).preds().contains(&exit_test));
    assert!(!cfg.block(new_header).preds().contains(&body));
}

#[test]
fn jump_headed_loop_is_left_alone() {
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let header = cfg.create_block();
    let latch = cfg.create_block();
    let follow = cfg.create_block();
    cfg.set_entry(entry);

    // already post-test: the header falls into the latch, the latch tests
    jump(&mut cfg, entry, header);
    jump(&mut cfg, header, latch);
    branch(&mut cfg, latch, header, follow);
    cfg.block_mut(follow).append_inst(LirInst::ret(LirValue::Illegal));

    let dominators: DominatorTree =
        [(header, entry), (latch, header), (follow, latch)].into_iter().collect();
    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();
    let mut loops = order.loops(&cfg);

    let blocks_before = cfg.num_blocks();
    let insts_before = total_instructions(&cfg);

    rotate_loops(&mut cfg, &mut loops);

    assert_eq!(cfg.num_blocks(), blocks_before);
    assert_eq!(total_instructions(&cfg), insts_before);
    assert_eq!(cfg.block(header).last_inst().unwrap().opcode, LirOpcode::Jump);
}

#[test]
fn rotation_without_follow_block_is_skipped() {
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let header = cfg.create_block();
    let body = cfg.create_block();
    let exit_a = cfg.create_block();
    let exit_b = cfg.create_block();
    cfg.set_entry(entry);

    // the loop exits to two distinct targets, so it has no follow block
    jump(&mut cfg, entry, header);
    branch(&mut cfg, header, body, exit_a);
    branch(&mut cfg, body, header, exit_b);
    cfg.block_mut(exit_a).append_inst(LirInst::ret(LirValue::Illegal));
    cfg.block_mut(exit_b).append_inst(LirInst::ret(LirValue::Illegal));

    let dominators: DominatorTree = [
        (header, entry),
        (body, header),
        (exit_a, header),
        (exit_b, body),
    ]
    .into_iter()
    .collect();
    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();
    let mut loops = order.loops(&cfg);
    assert_eq!(loops[0].follow, None);

    let blocks_before = cfg.num_blocks();
    rotate_loops(&mut cfg, &mut loops);
    assert_eq!(cfg.num_blocks(), blocks_before);
}
