//! Error types for the allocator-preparation passes.
//!
//! Everything in this crate runs on compiler-generated input, so every error
//! here is an internal-consistency failure: a malformed graph or an ordering
//! that does not satisfy the allocator's contract. None of these conditions
//! are recoverable; the caller is expected to abort compilation of the
//! affected method and leave other methods untouched.
//!
//! Cheap call-site preconditions (operand indices, insertion order, buffer
//! reuse) are asserted at the call site instead of being reported through
//! this type.

use thiserror::Error;

/// Fatal internal-consistency failure in a preparation pass.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("block order error: {reason}")]
    BlockOrder { reason: String },

    #[error("loop structure error: {reason}")]
    LoopStructure { reason: String },
}

/// Result type alias for the preparation passes.
pub type CompileResult<T> = Result<T, CompileError>;
