//! regprep - Allocator preparation for a JIT method compiler.
//!
//! This crate is the layer between a lowered method body and a linear-scan
//! register allocator. Given a control flow graph of basic blocks holding
//! low-level IR instructions, it computes the block order the allocator
//! processes, derives the natural-loop structure of the graph, rotates
//! pre-test loops into guarded post-test form, and keeps the per-instruction
//! operand bookkeeping the allocator assigns locations through.
//!
//! # Primary Usage
//!
//! ```ignore
//! use regprep::{compute_linear_scan_order, rotate_loops};
//!
//! let order = compute_linear_scan_order(&mut cfg, entry, &dominators)?;
//! let mut loops = order.loops(&cfg);
//! rotate_loops(&mut cfg, &mut loops);
//! ```
//!
//! # Architecture
//!
//! - [`cfg`] - Graph model, linear-scan ordering, loop structure, rotation
//! - [`lir`] - Instruction operand model and the insertion buffer
//! - [`error`] - Internal-consistency failure reporting
//!
//! The physical assignment policy itself lives downstream; this crate only
//! guarantees the ordering and bookkeeping invariants that policy relies
//! on. Everything here is single-threaded and owns exactly one method's
//! graph at a time.

pub mod cfg;
pub mod error;
pub mod lir;

pub use cfg::{
    compute_linear_scan_order, rotate_loops, BasicBlock, BlockFlags, BlockId, ControlFlowGraph,
    DominatorTree, LinearScanOrder, Loop,
};
pub use error::{CompileError, CompileResult};
pub use lir::{
    AddressPart, CallingConvention, LirAddress, LirCondition, LirConstant, LirInsertionBuffer,
    LirInst, LirKind, LirOpcode, LirRegister, LirValue, LirVariable, OperandMode, StackSlot,
};
