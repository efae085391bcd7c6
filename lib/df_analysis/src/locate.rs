//! Address to basic block mapping.

use crate::errors::{AnalysisError, AnalysisResult};
use df_disasm::function::{BlockId, Function};
use df_disasm::instrs::Instruction;
use df_disasm::Addr;

pub struct BlockLocator<'a> {
    function: &'a Function,
}

impl<'a> BlockLocator<'a> {
    #[must_use]
    pub const fn new(function: &'a Function) -> Self {
        Self { function }
    }

    /// Finds the first block (by start address) whose range holds `addr`.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::BlockNotFound`] if no block does.
    pub fn find_block(&self, addr: Addr) -> AnalysisResult<BlockId> {
        self.function
            .block_ids()
            .find(|id| self.function.block(*id).contains(addr))
            .ok_or(AnalysisError::BlockNotFound(addr))
    }

    /// Finds the instruction starting exactly at `addr`, and its block.
    ///
    /// # Errors
    ///
    /// Not found block or instruction.
    pub fn find_instruction(&self, addr: Addr) -> AnalysisResult<(BlockId, &'a Instruction)> {
        let id = self.find_block(addr)?;
        let function: &'a Function = self.function;
        let block = function.block(id);
        block
            .position(addr)
            .and_then(|pos| block.get(pos))
            .map(|instr| (id, instr))
            .ok_or(AnalysisError::InstructionNotFound(addr))
    }
}
