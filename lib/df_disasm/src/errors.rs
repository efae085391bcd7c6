//! Disassembly errors definitions.

use crate::Addr;
use std::{fmt, io};
use thiserror::Error;

/// An alias for result that can be a [`DisasmError`].
pub type DisasmResult<T> = Result<T, DisasmError>;

/// The disassembly error type.
#[derive(Debug, Error)]
pub enum DisasmError {
    /// Error that can be returned when doing [std::io](I/O) operations.
    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    /// Error that can be returned when formatting listing parts.
    #[error("Formatting error: {0}")]
    Fmt(#[from] fmt::Error),

    /// Error that can be returned at listing parsing.
    #[error("parsing error (line {line}): {message}")]
    Parsing { line: usize, message: String },

    /// Custom internal error type.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("unknown register: {0}")]
    UnknownRegister(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    #[error("Instruction not found (address: {0})")]
    InstructionNotFound(Addr),

    #[error("Duplicated instruction (address: {0})")]
    DuplicatedInstruction(Addr),

    #[error("No basic block contains address {0}")]
    BlockNotFound(Addr),

    #[error("No instruction can be disassembled at {0}")]
    NoInstructions(Addr),

    #[error("Memory at {0} cannot be read")]
    UnreadableMemory(Addr),
}
