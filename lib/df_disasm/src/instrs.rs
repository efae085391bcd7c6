//! Decoded instructions.

use crate::operands::Operand;
use crate::registers::{RegId, Register};
use crate::Addr;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// How an instruction transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Sequence,
    Jump,
    CondJump,
    Call,
    Return,
}

impl FlowKind {
    /// Classifies an instruction from its mnemonic.
    #[must_use]
    pub fn from_mnemonic(mnemonic: &str) -> Self {
        match mnemonic {
            "jmp" => Self::Jump,
            "call" => Self::Call,
            "ret" | "retn" => Self::Return,
            m if m.starts_with('j') => Self::CondJump,
            _ => Self::Sequence,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_branching(self) -> bool {
        matches!(self, Self::Jump | Self::CondJump | Self::Return)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Register,
    Stack,
    Other,
}

/// A variable record, live at the start of an instruction.
///
/// On a function entry instruction, a register record with offset 0 denotes
/// a value passed in that register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveVariable {
    pub location: LocationKind,
    pub register: Option<Register>,
    pub offset: i64,
}

impl fmt::Display for LiveVariable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (&self.location, &self.register) {
            (LocationKind::Register, Some(reg)) => write!(f, "{reg}:{}", self.offset),
            (LocationKind::Stack, _) => write!(f, "stack:{}", self.offset),
            _ => write!(f, "?:{}", self.offset),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    addr: Addr,
    size: u64,
    mnemonic: String,
    operands: Vec<Operand>,
    flow: FlowKind,
    return_register: Option<Register>,
    preserved: BTreeSet<RegId>,
    live_variables: Vec<LiveVariable>,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {op}")?;
            } else {
                write!(f, ", {op}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for Instruction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Instr", 4)?;
        state.serialize_field("address", &self.addr)?;
        state.serialize_field("mnemonic", &self.mnemonic)?;
        state.serialize_field("operands", &self.operands)?;
        state.serialize_field("text", &self.to_string())?;
        state.end()
    }
}

impl Instruction {
    #[must_use]
    pub fn new(addr: Addr, size: u64, mnemonic: &str, operands: Vec<Operand>) -> Self {
        let mnemonic = mnemonic.to_ascii_lowercase();
        Self {
            addr,
            size,
            flow: FlowKind::from_mnemonic(&mnemonic),
            mnemonic,
            operands,
            return_register: None,
            preserved: BTreeSet::new(),
            live_variables: Vec::new(),
        }
    }

    /// Sets the call convention of a call instruction: the register holding
    /// its result and the registers it does not clobber.
    #[must_use]
    pub fn with_convention(
        mut self,
        return_register: Option<Register>,
        preserved: BTreeSet<RegId>,
    ) -> Self {
        self.return_register = return_register;
        self.preserved = preserved;
        self
    }

    #[must_use]
    pub fn with_live_variables(mut self, live_variables: Vec<LiveVariable>) -> Self {
        self.live_variables = live_variables;
        self
    }

    #[must_use]
    pub fn resized(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn next_addr(&self) -> Addr {
        Addr(self.addr.0.wrapping_add(self.size))
    }

    #[inline]
    #[must_use]
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    #[inline]
    pub fn operands(&self) -> impl DoubleEndedIterator<Item = &Operand> + ExactSizeIterator {
        self.operands.iter()
    }

    #[inline]
    #[must_use]
    pub const fn flow(&self) -> FlowKind {
        self.flow
    }

    #[inline]
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.flow == FlowKind::Call
    }

    /// Returns the register a call writes its result into.
    #[must_use]
    pub fn return_register(&self) -> Option<&Register> {
        if self.is_call() {
            self.return_register.as_ref()
        } else {
            None
        }
    }

    /// Returns the branch target given as an immediate operand, if any.
    #[must_use]
    pub fn branch_target(&self) -> Option<Addr> {
        match self.flow {
            FlowKind::Jump | FlowKind::CondJump | FlowKind::Call => self
                .operands
                .iter()
                .find(|op| op.is_immediate())
                .and_then(Operand::immediate_value)
                .map(Addr),
            _ => None,
        }
    }

    /// Returns the variables live when the instruction starts executing.
    pub fn live_variables(&self) -> impl Iterator<Item = &LiveVariable> {
        self.live_variables.iter()
    }

    /// Checks if the value of the given register before the instruction is
    /// still held by the register after it.
    ///
    /// For calls this follows the calling convention; other instructions
    /// only clobber what their output operands write.
    #[must_use]
    pub fn preserves_register_value(&self, id: RegId) -> bool {
        if self.is_call() {
            self.preserved.contains(&id)
        } else {
            !self
                .operands
                .iter()
                .any(|op| op.is_output() && op.is_register() && op.uses_register(id))
        }
    }
}
