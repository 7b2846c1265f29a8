//! LIR instructions and their allocator-facing operand bookkeeping.
//!
//! Every instruction keeps, next to its ordinary operand slots, a flattened
//! list of the operands the register allocator must know about: the
//! variables it has to assign and the registers that are already pinned.
//! The list is partitioned contiguously as
//!
//! ```text
//!   <--- outputs ---> <-------- inputs --------> <------ temps ------>
//!  +-----------------+--------------------------+---------------------+
//!  | output operands |  inputs  |  input+temps  | (input+temps) temps |
//!  +-----------------+--------------------------+---------------------+
//! ```
//!
//! where operands that are both input and temp sit between the pure inputs
//! and the pure temps and are counted in both the input and the temp
//! totals (they are live at the read position and at the write position).
//! Constants and stack slots never enter the list; their location is fixed
//! before allocation starts.

use std::fmt;

use smallvec::SmallVec;

use crate::cfg::BlockId;

use super::value::{AddressPart, LirAddress, LirKind, LirValue};

/// Operation performed by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LirOpcode {
    Move,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Cmp,
    Load,
    Store,
    Call,
    Jump,
    CondJump,
    Return,
}

/// Comparison tested by a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LirCondition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Partition of the allocator operand list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandMode {
    /// Defined by the instruction, live after it.
    Output,
    /// Read by the instruction, live before it. Unless the slot is also a
    /// temp, the instruction must not modify it.
    Input,
    /// Modified by the instruction without surviving it.
    Temp,
}

/// How one original operand position maps into the instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OperandSlot {
    /// The "no value" marker.
    Illegal,
    /// A value whose location is fixed: a constant, a stack slot, or an
    /// address built purely from registers.
    Fixed(LirValue),
    /// Index into the allocator operand list.
    Alloc(usize),
    /// An address with at least one variable component; `base`/`index`
    /// hold allocator-list positions for the variable parts.
    Address {
        base: Option<usize>,
        index: Option<usize>,
        template: LirAddress,
    },
}

/// A single low-level instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct LirInst {
    pub opcode: LirOpcode,
    /// Condition of a [`LirOpcode::CondJump`], `None` otherwise.
    pub condition: Option<LirCondition>,
    /// Branch targets: one for `Jump`, true-then-false for `CondJump`,
    /// empty otherwise.
    targets: SmallVec<[BlockId; 2]>,
    /// Instruction number assigned by the allocator, -1 until then.
    pub id: i32,
    /// Does this instruction destroy all caller-saved registers?
    pub has_call: bool,
    result: OperandSlot,
    operands: Vec<OperandSlot>,
    allocator_operands: Vec<LirValue>,
    output_count: usize,
    input_count: usize,
    temp_input_count: usize,
    temp_count: usize,
}

impl LirInst {
    /// Constructs an instruction with no input or temp operands.
    pub fn new(opcode: LirOpcode, result: LirValue, has_call: bool) -> Self {
        Self::with_operands(opcode, result, has_call, 0, 0, Vec::new())
    }

    /// Constructs an instruction from its operand list.
    ///
    /// The `operands` vector is ordered as pure inputs, then the
    /// `temp_input_count` operands that are both input and temp, then the
    /// `temp_count` pure temps. `result` may be [`LirValue::Illegal`] for
    /// instructions that produce nothing.
    pub fn with_operands(
        opcode: LirOpcode,
        result: LirValue,
        has_call: bool,
        temp_input_count: usize,
        temp_count: usize,
        operands: Vec<LirValue>,
    ) -> Self {
        assert!(
            opcode != LirOpcode::Move || result.is_legal(),
            "a move must produce a result"
        );
        assert!(
            temp_input_count + temp_count <= operands.len(),
            "temp counts exceed the operand list"
        );

        let mut inst = Self {
            opcode,
            condition: None,
            targets: SmallVec::new(),
            id: -1,
            has_call,
            result: OperandSlot::Illegal,
            operands: Vec::new(),
            allocator_operands: Vec::with_capacity(operands.len() + 3),
            output_count: 0,
            input_count: 0,
            temp_input_count: 0,
            temp_count: 0,
        };
        inst.result = inst.init_output(result);
        inst.init_inputs_and_temps(temp_input_count, temp_count, operands);
        debug_assert!(inst.verify_operands());
        inst
    }

    /// A `dst = src` move.
    pub fn mov(src: LirValue, dst: LirValue) -> Self {
        Self::with_operands(LirOpcode::Move, dst, false, 0, 0, vec![src])
    }

    /// An unconditional jump.
    pub fn jump(target: BlockId) -> Self {
        let mut inst = Self::new(LirOpcode::Jump, LirValue::Illegal, false);
        inst.targets.push(target);
        inst
    }

    /// A two-way conditional jump comparing `left` and `right`.
    pub fn cond_jump(
        condition: LirCondition,
        left: LirValue,
        right: LirValue,
        on_true: BlockId,
        on_false: BlockId,
    ) -> Self {
        let mut inst = Self::with_operands(
            LirOpcode::CondJump,
            LirValue::Illegal,
            false,
            0,
            0,
            vec![left, right],
        );
        inst.condition = Some(condition);
        inst.targets.push(on_true);
        inst.targets.push(on_false);
        inst
    }

    /// A return, optionally carrying a value.
    pub fn ret(value: LirValue) -> Self {
        let operands = if value.is_legal() { vec![value] } else { Vec::new() };
        Self::with_operands(LirOpcode::Return, LirValue::Illegal, false, 0, 0, operands)
    }

    fn init_output(&mut self, output: LirValue) -> OperandSlot {
        match output {
            LirValue::Illegal => OperandSlot::Illegal,
            LirValue::Address(addr) => self.add_address(addr),
            LirValue::Stack(_) => OperandSlot::Fixed(output),
            _ => {
                assert!(
                    output.is_variable_or_register(),
                    "result must be a variable or register, not {output}"
                );
                debug_assert_eq!(self.allocator_operands.len(), self.output_count);
                self.allocator_operands.push(output);
                self.output_count += 1;
                OperandSlot::Alloc(self.allocator_operands.len() - 1)
            }
        }
    }

    /// Registers one address component with the allocator. Returns the
    /// allocator-list position for a variable part; registers are pinned
    /// and need no later patching, so they return `None`.
    fn add_address_part(&mut self, part: AddressPart) -> Option<usize> {
        match part {
            AddressPart::Register(r) => {
                self.input_count += 1;
                self.allocator_operands.push(LirValue::Register(r));
                None
            }
            AddressPart::Variable(v) => {
                self.input_count += 1;
                self.allocator_operands.push(LirValue::Variable(v));
                Some(self.allocator_operands.len() - 1)
            }
            AddressPart::Illegal => None,
        }
    }

    fn add_address(&mut self, addr: LirAddress) -> OperandSlot {
        assert!(
            !addr.base.is_illegal(),
            "address base must be a variable or register"
        );

        let base = self.add_address_part(addr.base);
        let index = self.add_address_part(addr.index);

        if base.is_some() || index.is_some() {
            OperandSlot::Address {
                base,
                index,
                template: addr,
            }
        } else {
            debug_assert!(addr.base.is_register());
            debug_assert!(addr.index.is_illegal() || addr.index.is_register());
            OperandSlot::Fixed(LirValue::Address(addr))
        }
    }

    fn add_operand(&mut self, operand: LirValue, is_input: bool, is_temp: bool) -> OperandSlot {
        match operand {
            LirValue::Illegal => OperandSlot::Illegal,
            LirValue::Address(_) => unreachable!("addresses are classified up front"),
            LirValue::Stack(_) | LirValue::Constant(_) => OperandSlot::Fixed(operand),
            _ => {
                debug_assert_eq!(
                    self.allocator_operands.len(),
                    self.output_count + self.input_count + self.temp_input_count + self.temp_count
                );
                self.allocator_operands.push(operand);
                if is_input && is_temp {
                    self.temp_input_count += 1;
                } else if is_input {
                    self.input_count += 1;
                } else {
                    debug_assert!(is_temp);
                    self.temp_count += 1;
                }
                OperandSlot::Alloc(self.allocator_operands.len() - 1)
            }
        }
    }

    fn init_inputs_and_temps(
        &mut self,
        temp_input_count: usize,
        temp_count: usize,
        operands: Vec<LirValue>,
    ) {
        let mut slots: Vec<Option<OperandSlot>> = vec![None; operands.len()];

        // Addresses first: their variable parts must land in the input
        // partition before any input-and-temp or temp operand is added.
        for (i, op) in operands.iter().enumerate() {
            if let LirValue::Address(addr) = op {
                slots[i] = Some(self.add_address(*addr));
            }
        }

        let input_only = operands.len() - temp_input_count - temp_count;
        let mut z = 0;
        for _ in 0..input_only {
            if slots[z].is_none() {
                slots[z] = Some(self.add_operand(operands[z], true, false));
            }
            z += 1;
        }
        for _ in 0..temp_input_count {
            if slots[z].is_none() {
                slots[z] = Some(self.add_operand(operands[z], true, true));
            }
            z += 1;
        }
        for _ in 0..temp_count {
            if slots[z].is_none() {
                slots[z] = Some(self.add_operand(operands[z], false, true));
            }
            z += 1;
        }

        self.operands = slots.into_iter().map(|s| s.expect("slot filled")).collect();
    }

    fn verify_operands(&self) -> bool {
        for operand in &self.allocator_operands {
            assert!(
                operand.is_variable_or_register(),
                "allocator operands can only be variables and registers initially, not {operand}"
            );
        }
        assert_eq!(
            self.output_count + self.input_count + self.temp_input_count + self.temp_count,
            self.allocator_operands.len(),
            "partition counts must cover the allocator operand list"
        );
        true
    }

    fn resolve_part(&self, pos: Option<usize>, fallback: AddressPart) -> AddressPart {
        match pos {
            None => fallback,
            Some(i) => match self.allocator_operands[i] {
                LirValue::Register(r) => AddressPart::Register(r),
                LirValue::Variable(v) => AddressPart::Variable(v),
                other => panic!("address part resolved to non-register {other}"),
            },
        }
    }

    fn slot_value(&self, slot: &OperandSlot) -> LirValue {
        match slot {
            OperandSlot::Illegal => LirValue::Illegal,
            OperandSlot::Fixed(v) => *v,
            OperandSlot::Alloc(i) => self.allocator_operands[*i],
            OperandSlot::Address {
                base,
                index,
                template,
            } => {
                let mut addr = *template;
                addr.base = self.resolve_part(*base, template.base);
                addr.index = self.resolve_part(*index, template.index);
                LirValue::Address(addr)
            }
        }
    }

    /// The `index`'th original operand, with resolved locations
    /// substituted for variables. [`LirValue::Illegal`] past the end.
    pub fn operand(&self, index: usize) -> LirValue {
        match self.operands.get(index) {
            None => LirValue::Illegal,
            Some(slot) => self.slot_value(slot),
        }
    }

    /// The instruction's result, [`LirValue::Illegal`] if it has none.
    pub fn result(&self) -> LirValue {
        self.slot_value(&self.result)
    }

    /// Number of allocator-visible operands in the given partition. A slot
    /// that is both input and temp counts toward both totals.
    pub fn operand_count(&self, mode: OperandMode) -> usize {
        match mode {
            OperandMode::Output => self.output_count,
            OperandMode::Input => self.input_count + self.temp_input_count,
            OperandMode::Temp => self.temp_input_count + self.temp_count,
        }
    }

    fn allocator_index(&self, mode: OperandMode, index: usize) -> usize {
        assert!(
            index < self.operand_count(mode),
            "operand index {index} out of range for {mode:?}"
        );
        match mode {
            OperandMode::Output => index,
            OperandMode::Input => index + self.output_count,
            OperandMode::Temp => index + self.output_count + self.input_count,
        }
    }

    /// The `index`'th allocator operand of the given partition.
    pub fn operand_at(&self, mode: OperandMode, index: usize) -> LirValue {
        self.allocator_operands[self.allocator_index(mode, index)]
    }

    /// Resolves a variable slot to its assigned location. The slot must
    /// still hold an unresolved variable and the location must be legal.
    pub fn set_operand_at(&mut self, mode: OperandMode, index: usize, location: LirValue) {
        let pos = self.allocator_index(mode, index);
        assert!(
            location.kind() != LirKind::Illegal,
            "cannot assign a location of illegal kind"
        );
        assert!(
            self.allocator_operands[pos].is_variable(),
            "only an unresolved variable slot can be assigned a location"
        );
        self.allocator_operands[pos] = location;
    }

    /// Does the allocator have to look at this instruction at all?
    pub fn has_operands(&self) -> bool {
        self.has_call || !self.allocator_operands.is_empty()
    }

    /// Number of original (non-flattened) operand slots.
    pub fn operand_len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.opcode, LirOpcode::Jump | LirOpcode::CondJump)
    }

    pub fn is_cond_jump(&self) -> bool {
        self.opcode == LirOpcode::CondJump
    }

    pub fn is_return(&self) -> bool {
        self.opcode == LirOpcode::Return
    }

    /// Branch targets; empty for non-branches.
    pub fn targets(&self) -> &[BlockId] {
        &self.targets
    }

    /// True target of a conditional jump.
    pub fn true_target(&self) -> BlockId {
        assert!(self.is_cond_jump(), "not a conditional jump");
        self.targets[0]
    }

    /// False target of a conditional jump.
    pub fn false_target(&self) -> BlockId {
        assert!(self.is_cond_jump(), "not a conditional jump");
        self.targets[1]
    }

    /// Replaces every occurrence of `old` in the target list with `new`.
    pub fn replace_target(&mut self, old: BlockId, new: BlockId) {
        for target in self.targets.iter_mut() {
            if *target == old {
                *target = new;
            }
        }
    }
}

impl fmt::Display for LirInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !matches!(self.result, OperandSlot::Illegal) {
            write!(f, "{} = ", self.result())?;
        }
        write!(f, "{:?}", self.opcode)?;
        if let Some(cond) = self.condition {
            write!(f, ".{cond:?}")?;
        }
        for i in 0..self.operands.len() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.operand(i))?;
        }
        for (i, target) in self.targets.iter().enumerate() {
            if i == 0 && self.operands.is_empty() {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "B{}", target.index())?;
        }
        Ok(())
    }
}
