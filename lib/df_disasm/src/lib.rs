//! Disassembly data structures for the `DataFlow` project: registers,
//! operands, instructions, control flow graphs, and a textual listing
//! loader that plays the role of the host debugger.

mod addr;
mod listing;

pub mod arch;
pub mod errors;
pub mod function;
pub mod instrs;
pub mod operands;
pub mod program;
pub mod registers;

pub use crate::addr::Addr;
pub use crate::listing::parse_listing as parse;

use crate::arch::PointerWidth;
use crate::errors::DisasmResult;
use crate::function::Function;
use crate::instrs::Instruction;
use crate::registers::{RegId, Register};

/// Decodes code of the inspected program.
pub trait Disassembler {
    /// Disassembles a whole function into its control flow graph.
    ///
    /// # Errors
    ///
    /// Unknown function, or undecodable code.
    fn disassemble_function(&self, name: &str) -> DisasmResult<Function>;

    /// Linearly decodes instructions starting at the given address.
    ///
    /// # Errors
    ///
    /// Nothing can be decoded at `addr`.
    fn disassemble_instructions(
        &self,
        addr: Addr,
    ) -> DisasmResult<Box<dyn Iterator<Item = Instruction> + '_>>;

    /// Looks up a register of the target architecture.
    fn register(&self, id: RegId) -> Option<&Register>;

    fn pointer_width(&self) -> PointerWidth;
}

/// Reads the memory of the inspected program.
pub trait Memory {
    /// # Errors
    ///
    /// The address is not readable.
    fn read_pointer(&self, addr: Addr, width: PointerWidth) -> DisasmResult<u64>;
}

/// Symbol resolution.
pub trait Symbols {
    /// Name of the function holding the given address.
    fn function_containing(&self, addr: Addr) -> Option<String>;

    /// Resolves `name` inside `module` into a function name.
    fn module_symbol(&self, module: &str, name: &str) -> Option<String>;
}

/// State of the currently inspected thread.
pub trait ThreadContext {
    fn instruction_pointer(&self) -> Option<Addr>;

    /// Symbolic description of the innermost stack frame, formatted as
    /// `MODULE!NAME+OFFSET`.
    fn top_frame(&self) -> Option<String>;
}
