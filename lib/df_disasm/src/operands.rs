//! Instruction operands.
//!
//! An operand is either a register, a memory reference or an immediate
//! value. Its role in the instruction (read, written, or both) is described
//! by [`OperandAttrs`] flags, which are the only thing dataflow algorithms
//! need to inspect.

use crate::registers::{RegId, Register};
use bitflags::bitflags;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;

bitflags! {
    pub struct OperandAttrs: u8 {
        const INPUT = 0x01;
        const OUTPUT = 0x02;
        const REGISTER = 0x04;
        const MEMORY_REFERENCE = 0x08;
        const IMMEDIATE = 0x10;
        const HAS_IMMEDIATE = 0x20;
    }
}

/// A memory reference of the form `[base + index * scale + displacement]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemRef {
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: u8,
    pub displacement: i64,
    pub size: u32,
}

impl fmt::Display for MemRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let size = match self.size {
            1 => "byte ",
            2 => "word ",
            4 => "dword ",
            8 => "qword ",
            _ => "",
        };
        write!(f, "{size}[")?;
        let mut empty = true;
        if let Some(base) = &self.base {
            write!(f, "{base}")?;
            empty = false;
        }
        if let Some(index) = &self.index {
            if !empty {
                write!(f, "+")?;
            }
            write!(f, "{index}*{}", self.scale)?;
            empty = false;
        }
        if empty {
            write!(f, "{:#x}", self.displacement)?;
        } else if self.displacement < 0 {
            write!(f, "-{:#x}", self.displacement.unsigned_abs())?;
        } else if self.displacement > 0 {
            write!(f, "+{:#x}", self.displacement)?;
        }
        write!(f, "]")
    }
}

impl MemRef {
    fn same_form(&self, other: &Self) -> bool {
        let id = |r: &Option<Register>| r.as_ref().map(Register::id);
        id(&self.base) == id(&other.base)
            && id(&self.index) == id(&other.index)
            && (self.index.is_none() || self.scale == other.scale)
    }

    /// Checks if both references denote byte ranges sharing at least one
    /// byte. References whose address expressions differ cannot be compared
    /// and are considered disjoint.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        if !self.same_form(other) {
            return false;
        }
        let (a_beg, a_end) = (
            i128::from(self.displacement),
            i128::from(self.displacement) + i128::from(self.size.max(1)),
        );
        let (b_beg, b_end) = (
            i128::from(other.displacement),
            i128::from(other.displacement) + i128::from(other.size.max(1)),
        );
        a_beg < b_end && b_beg < a_end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandKind {
    Register(Register),
    Memory(MemRef),
    Immediate(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    attrs: OperandAttrs,
    kind: OperandKind,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            OperandKind::Register(reg) => write!(f, "{reg}"),
            OperandKind::Memory(mem) => write!(f, "{mem}"),
            OperandKind::Immediate(value) => write!(f, "{value:#x}"),
        }
    }
}

impl Serialize for Operand {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Operand", 3)?;
        state.serialize_field("text", &self.to_string())?;
        state.serialize_field("input", &self.is_input())?;
        state.serialize_field("output", &self.is_output())?;
        state.end()
    }
}

impl Operand {
    #[must_use]
    pub fn register(reg: Register, input: bool, output: bool) -> Self {
        Self {
            attrs: OperandAttrs::REGISTER | direction(input, output),
            kind: OperandKind::Register(reg),
        }
    }

    #[must_use]
    pub fn memory(mem: MemRef, input: bool, output: bool) -> Self {
        let mut attrs = OperandAttrs::MEMORY_REFERENCE | direction(input, output);
        if mem.displacement != 0 || (mem.base.is_none() && mem.index.is_none()) {
            attrs |= OperandAttrs::HAS_IMMEDIATE;
        }
        Self {
            attrs,
            kind: OperandKind::Memory(mem),
        }
    }

    #[must_use]
    pub fn immediate(value: u64) -> Self {
        Self {
            attrs: OperandAttrs::IMMEDIATE | OperandAttrs::HAS_IMMEDIATE | OperandAttrs::INPUT,
            kind: OperandKind::Immediate(value),
        }
    }

    #[inline]
    #[must_use]
    pub const fn attrs(&self) -> OperandAttrs {
        self.attrs
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> &OperandKind {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub const fn is_input(&self) -> bool {
        self.attrs.contains(OperandAttrs::INPUT)
    }

    #[inline]
    #[must_use]
    pub const fn is_output(&self) -> bool {
        self.attrs.contains(OperandAttrs::OUTPUT)
    }

    #[inline]
    #[must_use]
    pub const fn is_register(&self) -> bool {
        self.attrs.contains(OperandAttrs::REGISTER)
    }

    #[inline]
    #[must_use]
    pub const fn is_memory_reference(&self) -> bool {
        self.attrs.contains(OperandAttrs::MEMORY_REFERENCE)
    }

    #[inline]
    #[must_use]
    pub const fn is_immediate(&self) -> bool {
        self.attrs.contains(OperandAttrs::IMMEDIATE)
    }

    #[inline]
    #[must_use]
    pub const fn has_immediate(&self) -> bool {
        self.attrs.contains(OperandAttrs::HAS_IMMEDIATE)
    }

    /// Returns the registers the operand references: the register itself,
    /// or the base and index registers of a memory reference.
    pub fn registers(&self) -> impl Iterator<Item = &Register> {
        let (first, second) = match &self.kind {
            OperandKind::Register(reg) => (Some(reg), None),
            OperandKind::Memory(mem) => (mem.base.as_ref(), mem.index.as_ref()),
            OperandKind::Immediate(_) => (None, None),
        };
        first.into_iter().chain(second)
    }

    /// Returns the immediate value, or the displacement of a memory
    /// reference.
    #[must_use]
    pub fn immediate_value(&self) -> Option<u64> {
        match &self.kind {
            OperandKind::Immediate(value) => Some(*value),
            OperandKind::Memory(mem) if self.has_immediate() => Some(mem.displacement as u64),
            _ => None,
        }
    }

    /// Checks if both operands are memory references to overlapping bytes.
    #[must_use]
    pub fn references_same_memory(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (OperandKind::Memory(a), OperandKind::Memory(b)) => a.overlaps(b),
            _ => false,
        }
    }

    /// Checks if the operand reads or writes the given register, directly or
    /// through a sub-register.
    #[must_use]
    pub fn uses_register(&self, id: RegId) -> bool {
        self.registers().any(|reg| reg.covers(id))
    }
}

fn direction(input: bool, output: bool) -> OperandAttrs {
    let mut attrs = OperandAttrs::empty();
    if input {
        attrs |= OperandAttrs::INPUT;
    }
    if output {
        attrs |= OperandAttrs::OUTPUT;
    }
    attrs
}
