//! Analysis errors definition.

use df_disasm::errors::DisasmError;
use df_disasm::Addr;
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("disassembly error: {0}")]
    Disasm(#[from] DisasmError),

    #[error("no basic block contains address {0}")]
    BlockNotFound(Addr),

    #[error("instruction not found: {0}")]
    InstructionNotFound(Addr),

    #[error("unable to find function name to disassemble ({0})")]
    NoFunction(String),

    #[error("no current instruction pointer")]
    NoInstructionPointer,
}
