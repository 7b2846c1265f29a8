//! Low-level IR operand model.
//!
//! The pieces the register allocator needs to reason about instructions:
//!
//! - [`value`] - the operand value kinds: constants, physical registers,
//!   virtual variables, stack slots and addresses.
//! - [`inst`] - instructions with their operand slots partitioned into
//!   output/input/temp classes for live-range computation.
//! - [`calling_convention`] - argument location lists for calls.
//! - [`insertion_buffer`] - batched multi-point insertion into a block's
//!   instruction list, used to splice in spill and reload code.

pub mod calling_convention;
pub mod inst;
pub mod insertion_buffer;
pub mod value;

pub use calling_convention::CallingConvention;
pub use inst::{LirCondition, LirInst, LirOpcode, OperandMode};
pub use insertion_buffer::LirInsertionBuffer;
pub use value::{
    AddressPart, LirAddress, LirConstant, LirKind, LirRegister, LirValue, LirVariable, StackSlot,
};
