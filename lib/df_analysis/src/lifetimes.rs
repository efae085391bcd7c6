//! Kill-then-generate update of the live sets for one instruction.

use crate::calls::{CallAnalyzer, CallInputs};
use crate::memory::MemoryReferenceSet;
use crate::registers::RegisterReferenceSet;
use df_disasm::arch::PointerWidth;
use df_disasm::instrs::Instruction;
use df_disasm::{Disassembler, Memory};

/// Computes the live sets valid right before an instruction, from the
/// ones valid right after it.
pub struct LifetimeReformer<'a, H> {
    host: &'a H,
    calls: CallAnalyzer<'a, H>,
}

impl<'a, H: Disassembler + Memory> LifetimeReformer<'a, H> {
    pub fn new(host: &'a H, pointer_width: PointerWidth) -> Self {
        Self {
            host,
            calls: CallAnalyzer::new(host, pointer_width),
        }
    }

    /// Applies the instruction effects: outputs are killed, then inputs are
    /// made live. For calls, registers the callee does not preserve are
    /// killed and callee inputs are inferred.
    pub fn reform(
        &self,
        instr: &Instruction,
        regs: &mut RegisterReferenceSet,
        mems: &mut MemoryReferenceSet,
    ) -> Option<CallInputs> {
        if instr.is_call() {
            self.kill_clobbered(instr, regs);
        } else {
            for operand in instr.operands().filter(|op| op.is_output()) {
                if operand.is_register() {
                    for reg in operand.registers() {
                        regs.remove_references(reg);
                    }
                } else if operand.is_memory_reference() {
                    mems.remove_overlapping(operand);
                }
            }
        }

        for operand in instr.operands().filter(|op| op.is_input()) {
            for reg in operand.registers() {
                regs.add_references(reg);
            }
            if operand.is_memory_reference() {
                mems.add_if_absent(operand);
            }
        }

        instr
            .is_call()
            .then(|| self.calls.add_call_input_registers(instr, regs))
    }

    /// Kills the live registers whose value does not survive a call.
    pub fn kill_clobbered(&self, instr: &Instruction, regs: &mut RegisterReferenceSet) {
        let live: Vec<_> = regs.ids().collect();
        for id in live {
            let preserved = instr.preserves_register_value(id);
            log::trace!("    preservation of {id} by {}: {preserved}", instr.addr());
            if !preserved {
                match self.host.register(id) {
                    Some(reg) => regs.remove_references(reg),
                    None => regs.remove_id(id),
                }
            }
        }
    }

    #[must_use]
    pub const fn call_analyzer(&self) -> &CallAnalyzer<'a, H> {
        &self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use df_disasm::program::Program;
    use df_disasm::Addr;

    const LISTING: &str = "
arch generic 8
reg r1 r1l
reg r2 r2l
reg r3
reg r4
preserve r4
return r1

function main
  0x100 4 add <>r1, <r2
  0x104 4 mov >qword [r3+8], <r2l
  0x108 4 mov >r1l, <qword [r3+8]
  0x10c 4 call #0x200
  0x110 4 ret

function callee
  0x200 1 ret !live r2:0
";

    fn instr(program: &Program, addr: u64) -> Instruction {
        program
            .disassemble_instructions(Addr(addr))
            .unwrap()
            .next()
            .unwrap()
    }

    #[test]
    fn read_modify_write_keeps_inputs() {
        let program: Program = LISTING.parse().unwrap();
        let reformer = LifetimeReformer::new(&program, PointerWidth::Bits64);
        let regs_file = program.arch().registers();

        let mut regs = RegisterReferenceSet::new();
        let mut mems = MemoryReferenceSet::new();
        regs.add_references(regs_file.by_name("r1").unwrap());
        assert_eq!(reformer.reform(&instr(&program, 0x100), &mut regs, &mut mems), None);
        assert!(regs.has_reference(regs_file.by_name("r1").unwrap()));
        assert!(regs.has_reference(regs_file.by_name("r2").unwrap()));
    }

    #[test]
    fn outputs_killed_inputs_generated() {
        let program: Program = LISTING.parse().unwrap();
        let reformer = LifetimeReformer::new(&program, PointerWidth::Bits64);
        let regs_file = program.arch().registers();

        let mut regs = RegisterReferenceSet::new();
        let mut mems = MemoryReferenceSet::new();
        regs.add_references(regs_file.by_name("r1").unwrap());

        let load = instr(&program, 0x108);
        reformer.reform(&load, &mut regs, &mut mems);
        assert!(!regs.contains(regs_file.by_name("r1l").unwrap().id()));
        assert!(regs.contains(regs_file.by_name("r1").unwrap().id()));
        assert!(regs.has_reference(regs_file.by_name("r3").unwrap()));
        assert_eq!(mems.len(), 1);

        let store = instr(&program, 0x104);
        reformer.reform(&store, &mut regs, &mut mems);
        assert!(mems.is_empty());
        assert!(regs.contains(regs_file.by_name("r2l").unwrap().id()));
        assert!(!regs.contains(regs_file.by_name("r2").unwrap().id()));
    }

    #[test]
    fn call_kills_unpreserved_and_adds_inputs() {
        let program: Program = LISTING.parse().unwrap();
        let reformer = LifetimeReformer::new(&program, PointerWidth::Bits64);
        let regs_file = program.arch().registers();

        let mut regs = RegisterReferenceSet::new();
        let mut mems = MemoryReferenceSet::new();
        regs.add_references(regs_file.by_name("r1").unwrap());
        regs.add_references(regs_file.by_name("r3").unwrap());
        regs.add_references(regs_file.by_name("r4").unwrap());

        let inputs = reformer.reform(&instr(&program, 0x10c), &mut regs, &mut mems);
        assert!(matches!(inputs, Some(CallInputs::Inferred(ref found)) if found.len() == 1));
        assert!(!regs.has_reference(regs_file.by_name("r1").unwrap()));
        assert!(!regs.has_reference(regs_file.by_name("r3").unwrap()));
        assert!(regs.has_reference(regs_file.by_name("r4").unwrap()));
        assert!(regs.has_reference(regs_file.by_name("r2").unwrap()));
    }
}
