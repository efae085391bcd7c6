//! This crate provides the backward data flow analysis of the `DataFlow`
//! project: given an instruction, find the instructions of its function
//! producing the values it reads.

pub mod calls;
pub mod errors;
pub mod lifetimes;
pub mod locate;
pub mod memory;
pub mod registers;
pub mod resolve;
pub mod scanner;
pub mod trace;

use crate::errors::AnalysisResult;
use crate::trace::DataFlowTrace;
use df_disasm::{Addr, Disassembler, Memory, Symbols, ThreadContext};

/// Traces the data flow of the instruction at `addr` (the current
/// instruction when `None`), disassembling the function holding it.
pub fn trace_data_flow<H>(host: &H, addr: Option<Addr>) -> AnalysisResult<DataFlowTrace<'_, H>>
where
    H: Disassembler + Memory + Symbols + ThreadContext,
{
    let info = resolve::disassembly_info(host, addr)?;
    let function = host.disassemble_function(&info.function)?;
    DataFlowTrace::new(host, function, info.address)
}
