//! Argument location lists for calls.

use std::fmt;

use super::value::LirValue;

/// Describes where the arguments of a call are placed.
///
/// `locations` is ordered by argument index, leftmost parameter first.
/// Every location is either a register or a stack slot; nothing else can
/// carry an argument across a call boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct CallingConvention {
    pub locations: Vec<LirValue>,
    /// Stack space in bytes consumed by the stack-based arguments.
    pub stack_size: i32,
}

impl CallingConvention {
    pub fn new(locations: Vec<LirValue>, stack_size: i32) -> Self {
        let cc = Self {
            locations,
            stack_size,
        };
        debug_assert!(cc.verify());
        cc
    }

    fn verify(&self) -> bool {
        for location in &self.locations {
            assert!(
                location.is_stack_slot() || location.is_register(),
                "argument location must be a register or stack slot, not {location}"
            );
        }
        true
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallingConvention[")?;
        for (i, location) in self.locations.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{location}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::value::{LirKind, LirRegister, StackSlot};

    #[test]
    fn accepts_registers_and_stack_slots() {
        let cc = CallingConvention::new(
            vec![
                LirValue::Register(LirRegister::new(7, LirKind::Int)),
                LirValue::Stack(StackSlot::get(LirKind::Long, 0, true)),
            ],
            8,
        );
        assert_eq!(cc.locations.len(), 2);
        assert_eq!(cc.stack_size, 8);
    }

    #[test]
    #[should_panic(expected = "argument location")]
    fn rejects_constant_locations() {
        use crate::lir::value::LirConstant;
        CallingConvention::new(vec![LirValue::Constant(LirConstant::INT_0)], 0);
    }
}
