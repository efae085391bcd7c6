//! Resolution of the function to disassemble for a trace, when only an
//! address (or nothing) is known.

use crate::errors::{AnalysisError, AnalysisResult};
use df_disasm::{Addr, Symbols, ThreadContext};

/// Where to disassemble, and which instruction to trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassemblyInfo {
    pub function: String,
    pub address: Addr,
}

/// Finds the function holding `addr`, defaulting to the current
/// instruction pointer. When symbols cannot tell, the function name is
/// taken from the top stack frame description (`MODULE!NAME+OFFSET`).
///
/// # Errors
///
/// [`AnalysisError::NoFunction`] when no function can be found.
pub fn disassembly_info<H: Symbols + ThreadContext>(
    host: &H,
    addr: Option<Addr>,
) -> AnalysisResult<DisassemblyInfo> {
    let address = match addr {
        Some(addr) => addr,
        None => {
            log::debug!("no address given, using instruction pointer");
            host.instruction_pointer()
                .ok_or(AnalysisError::NoInstructionPointer)?
        }
    };

    if let Some(function) = host.function_containing(address) {
        return Ok(DisassemblyInfo { function, address });
    }

    let frame = host
        .top_frame()
        .ok_or_else(|| AnalysisError::NoFunction(format!("no symbol for {address}")))?;
    let (module, name) =
        parse_frame(&frame).ok_or_else(|| AnalysisError::NoFunction(frame.clone()))?;
    log::debug!("module name = '{module}'; function name = '{name}'");

    host.module_symbol(module, name)
        .map(|function| DisassemblyInfo { function, address })
        .ok_or_else(|| AnalysisError::NoFunction(frame.clone()))
}

/// Splits `MODULE!NAME+OFFSET` into module and function names.
fn parse_frame(frame: &str) -> Option<(&str, &str)> {
    let symbol = frame.split('+').next().unwrap_or_default().trim();
    let (module, name) = symbol.split_once('!')?;
    if module.is_empty() || name.is_empty() {
        None
    } else {
        Some((module, name))
    }
}
