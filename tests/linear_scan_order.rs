//! Linear-scan block ordering over hand-built graphs.

use regprep::{
    compute_linear_scan_order, BlockFlags, BlockId, CompileError, ControlFlowGraph, DominatorTree,
    LirCondition, LirInst, LirKind, LirValue, LirVariable,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn var(i: u32) -> LirValue {
    LirValue::Variable(LirVariable::new(i, LirKind::Int))
}

/// Terminates `from` with an unconditional jump and records the edge.
fn jump(cfg: &mut ControlFlowGraph, from: BlockId, to: BlockId) {
    cfg.block_mut(from).append_inst(LirInst::jump(to));
    cfg.add_edge(from, to);
}

/// Terminates `from` with a two-way branch and records both edges.
fn branch(cfg: &mut ControlFlowGraph, from: BlockId, on_true: BlockId, on_false: BlockId) {
    cfg.block_mut(from)
        .append_inst(LirInst::cond_jump(LirCondition::Lt, var(0), var(1), on_true, on_false));
    cfg.add_edge(from, on_true);
    cfg.add_edge(from, on_false);
}

fn ret(cfg: &mut ControlFlowGraph, block: BlockId) {
    cfg.block_mut(block).append_inst(LirInst::ret(LirValue::Illegal));
}

#[test]
fn diamond_orders_branches_before_merge() {
    init_logging();
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let left = cfg.create_block();
    let right = cfg.create_block();
    let merge = cfg.create_block();
    cfg.set_entry(entry);

    branch(&mut cfg, entry, left, right);
    jump(&mut cfg, left, merge);
    jump(&mut cfg, right, merge);
    ret(&mut cfg, merge);

    let dominators: DominatorTree =
        [(left, entry), (right, entry), (merge, entry)].into_iter().collect();

    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();

    assert_eq!(order.blocks(), &[entry, left, right, merge]);
    assert_eq!(order.num_loops(), 0);
    for (i, &block) in order.blocks().iter().enumerate() {
        assert_eq!(cfg.block(block).linear_scan_number, i as i32);
        assert_eq!(cfg.block(block).loop_index, -1);
        assert_eq!(cfg.block(block).loop_depth, 0);
    }
    order.verify(&cfg, &dominators).unwrap();
}

#[test]
fn critical_edge_split_block_is_preferred() {
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let left = cfg.create_block();
    let right = cfg.create_block();
    let merge = cfg.create_block();
    cfg.set_entry(entry);

    branch(&mut cfg, entry, left, right);
    jump(&mut cfg, left, merge);
    jump(&mut cfg, right, merge);
    ret(&mut cfg, merge);

    // a split block is likely empty; it should win the tie against left
    cfg.block_mut(right).set_flag(BlockFlags::CRITICAL_EDGE_SPLIT);

    let dominators: DominatorTree =
        [(left, entry), (right, entry), (merge, entry)].into_iter().collect();

    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();
    assert_eq!(order.blocks(), &[entry, right, left, merge]);
}

#[test]
fn single_loop_is_discovered_and_contiguous() {
    init_logging();
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let header = cfg.create_block();
    let body = cfg.create_block();
    let follow = cfg.create_block();
    cfg.set_entry(entry);

    jump(&mut cfg, entry, header);
    branch(&mut cfg, header, body, follow);
    jump(&mut cfg, body, header);
    ret(&mut cfg, follow);

    let dominators: DominatorTree =
        [(header, entry), (body, header), (follow, header)].into_iter().collect();

    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();

    assert_eq!(order.num_loops(), 1);
    assert_eq!(order.blocks(), &[entry, header, body, follow]);

    assert!(cfg.block(header).has_flag(BlockFlags::LOOP_HEADER));
    assert!(cfg.block(header).has_flag(BlockFlags::BACKWARD_BRANCH_TARGET));
    assert!(cfg.block(body).has_flag(BlockFlags::LOOP_END));
    assert!(!cfg.block(entry).has_flag(BlockFlags::LOOP_HEADER));

    assert!(order.is_block_in_loop(0, header));
    assert!(order.is_block_in_loop(0, body));
    assert!(!order.is_block_in_loop(0, entry));
    assert!(!order.is_block_in_loop(0, follow));

    assert_eq!(cfg.block(header).loop_depth, 1);
    assert_eq!(cfg.block(body).loop_depth, 1);
    assert_eq!(cfg.block(header).loop_index, 0);
    assert_eq!(cfg.block(follow).loop_index, -1);

    let loops = order.loops(&cfg);
    assert_eq!(loops.len(), 1);
    assert_eq!(loops[0].header, header);
    assert_eq!(loops[0].blocks(), &[header, body]);
    assert_eq!(loops[0].exit_blocks(), &[header]);
    assert_eq!(loops[0].follow, Some(follow));

    order.verify(&cfg, &dominators).unwrap();
}

#[test]
fn nested_loops_number_inner_first() {
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let outer = cfg.create_block();
    let inner = cfg.create_block();
    let inner_body = cfg.create_block();
    let outer_latch = cfg.create_block();
    let exit = cfg.create_block();
    cfg.set_entry(entry);

    jump(&mut cfg, entry, outer);
    branch(&mut cfg, outer, inner, exit);
    branch(&mut cfg, inner, inner_body, outer_latch);
    jump(&mut cfg, inner_body, inner);
    jump(&mut cfg, outer_latch, outer);
    ret(&mut cfg, exit);

    let dominators: DominatorTree = [
        (outer, entry),
        (inner, outer),
        (inner_body, inner),
        (outer_latch, inner),
        (exit, outer),
    ]
    .into_iter()
    .collect();

    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();

    assert_eq!(order.num_loops(), 2);
    // post-order numbering: the inner loop gets the smaller index
    assert_eq!(cfg.block(inner).loop_index, 0);
    assert_eq!(cfg.block(inner_body).loop_index, 0);
    assert_eq!(cfg.block(outer).loop_index, 1);
    assert_eq!(cfg.block(outer_latch).loop_index, 1);

    assert_eq!(cfg.block(inner).loop_depth, 2);
    assert_eq!(cfg.block(inner_body).loop_depth, 2);
    assert_eq!(cfg.block(outer).loop_depth, 1);
    assert_eq!(cfg.block(outer_latch).loop_depth, 1);
    assert_eq!(cfg.block(exit).loop_depth, 0);

    // both loop bodies are dense in the order
    assert_eq!(
        order.blocks(),
        &[entry, outer, inner, inner_body, outer_latch, exit]
    );
    order.verify(&cfg, &dominators).unwrap();
}

#[test]
fn loop_containing_entry_is_discarded() {
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let latch = cfg.create_block();
    let exit = cfg.create_block();
    cfg.set_entry(entry);

    jump(&mut cfg, entry, latch);
    // the back edge targets the method entry: not a natural loop
    branch(&mut cfg, latch, entry, exit);
    ret(&mut cfg, exit);

    let dominators: DominatorTree = [(latch, entry), (exit, latch)].into_iter().collect();

    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();

    assert_eq!(order.num_loops(), 0);
    assert_eq!(order.blocks(), &[entry, latch, exit]);
    for &block in order.blocks() {
        assert_eq!(cfg.block(block).loop_index, -1);
        assert_eq!(cfg.block(block).loop_depth, 0);
    }
    order.verify(&cfg, &dominators).unwrap();
}

#[test]
fn recomputation_is_idempotent() {
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let header = cfg.create_block();
    let body = cfg.create_block();
    let follow = cfg.create_block();
    cfg.set_entry(entry);

    jump(&mut cfg, entry, header);
    branch(&mut cfg, header, body, follow);
    jump(&mut cfg, body, header);
    ret(&mut cfg, follow);

    let dominators: DominatorTree =
        [(header, entry), (body, header), (follow, header)].into_iter().collect();

    let first = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();
    let first_order: Vec<BlockId> = first.blocks().to_vec();
    let second = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();

    assert_eq!(first_order, second.blocks());
    assert_eq!(first.num_loops(), second.num_loops());
    second.verify(&cfg, &dominators).unwrap();
}

#[test]
fn return_blocks_go_last_among_peers() {
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let returning = cfg.create_block();
    let continuing = cfg.create_block();
    let left = cfg.create_block();
    let right = cfg.create_block();
    cfg.set_entry(entry);

    branch(&mut cfg, entry, returning, continuing);
    ret(&mut cfg, returning);
    branch(&mut cfg, continuing, left, right);
    ret(&mut cfg, left);
    ret(&mut cfg, right);

    let dominators: DominatorTree = [
        (returning, entry),
        (continuing, entry),
        (left, continuing),
        (right, continuing),
    ]
    .into_iter()
    .collect();

    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();

    // the returning block was inserted first but is deferred behind the
    // block that still has work below it
    assert_eq!(order.blocks()[0], entry);
    assert_eq!(order.blocks()[1], continuing);
    order.verify(&cfg, &dominators).unwrap();
}

#[test]
fn verify_rejects_tampered_numbering() {
    let mut cfg = ControlFlowGraph::new();
    let entry = cfg.create_block();
    let left = cfg.create_block();
    let right = cfg.create_block();
    let merge = cfg.create_block();
    cfg.set_entry(entry);

    branch(&mut cfg, entry, left, right);
    jump(&mut cfg, left, merge);
    jump(&mut cfg, right, merge);
    ret(&mut cfg, merge);

    let dominators: DominatorTree =
        [(left, entry), (right, entry), (merge, entry)].into_iter().collect();

    let order = compute_linear_scan_order(&mut cfg, entry, &dominators).unwrap();

    // corrupt the committed numbering behind the pass's back
    cfg.block_mut(left).linear_scan_number = 3;

    match order.verify(&cfg, &dominators) {
        Err(CompileError::BlockOrder { .. }) => {}
        other => panic!("expected a block order error, got {other:?}"),
    }
}
