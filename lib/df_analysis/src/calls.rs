//! Call sites analysis: target resolution and inference of the registers a
//! callee takes as inputs.

use crate::registers::RegisterReferenceSet;
use df_disasm::arch::PointerWidth;
use df_disasm::instrs::{Instruction, LocationKind};
use df_disasm::registers::Register;
use df_disasm::{Addr, Disassembler, Memory};

/// Resolution of a call destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Immediate destination.
    Direct(Addr),
    /// Destination read from a pointer-sized memory cell.
    Indirect { table: Addr, target: Addr },
    /// No destination could be computed.
    Unresolved(String),
}

impl CallTarget {
    #[must_use]
    pub const fn addr(&self) -> Option<Addr> {
        match self {
            Self::Direct(target) | Self::Indirect { target, .. } => Some(*target),
            Self::Unresolved(_) => None,
        }
    }
}

/// Registers found holding incoming values at the callee entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInputs {
    Inferred(Vec<Register>),
    Unavailable(String),
}

pub struct CallAnalyzer<'a, H> {
    host: &'a H,
    pointer_width: PointerWidth,
}

impl<'a, H: Disassembler + Memory> CallAnalyzer<'a, H> {
    pub fn new(host: &'a H, pointer_width: PointerWidth) -> Self {
        Self {
            host,
            pointer_width,
        }
    }

    /// Computes the destination of a call instruction having a single
    /// operand: an immediate, or an absolute memory reference holding the
    /// destination.
    pub fn resolve_target(&self, instr: &Instruction) -> CallTarget {
        if instr.operands().len() != 1 {
            return CallTarget::Unresolved(format!(
                "{} operands on call",
                instr.operands().len()
            ));
        }
        let Some(dest) = instr.operands().next() else {
            return CallTarget::Unresolved("no operand on call".to_string());
        };

        if dest.is_immediate() {
            return match dest.immediate_value() {
                Some(value) => CallTarget::Direct(Addr(value)),
                None => CallTarget::Unresolved(format!("no immediate value in {dest}")),
            };
        }

        if dest.has_immediate() && dest.is_memory_reference() && dest.registers().next().is_none() {
            let Some(table) = dest.immediate_value().map(Addr) else {
                return CallTarget::Unresolved(format!("no displacement in {dest}"));
            };
            return match self.host.read_pointer(table, self.pointer_width) {
                Ok(value) => CallTarget::Indirect {
                    table,
                    target: Addr(value),
                },
                Err(err) => CallTarget::Unresolved(err.to_string()),
            };
        }

        CallTarget::Unresolved(format!("unsupported call operand {dest}"))
    }

    /// Looks at the live variables of the first instruction at the call
    /// destination: registers holding a value at offset 0 are inputs.
    pub fn infer_inputs(&self, instr: &Instruction) -> CallInputs {
        let target = self.resolve_target(instr);
        log::debug!("call {} target: {target:?}", instr.addr());
        let Some(addr) = target.addr() else {
            return match target {
                CallTarget::Unresolved(reason) => CallInputs::Unavailable(reason),
                _ => CallInputs::Unavailable("no call target".to_string()),
            };
        };

        let first = match self.host.disassemble_instructions(addr) {
            Ok(mut instrs) => instrs.next(),
            Err(err) => return CallInputs::Unavailable(err.to_string()),
        };
        let Some(first) = first else {
            return CallInputs::Unavailable(format!("nothing to disassemble at {addr}"));
        };

        log::debug!("looking at call destination '{first}' for live variables");
        CallInputs::Inferred(
            first
                .live_variables()
                .filter(|var| var.location == LocationKind::Register && var.offset == 0)
                .filter_map(|var| var.register.clone())
                .collect(),
        )
    }

    /// Makes the inferred call inputs live.
    pub fn add_call_input_registers(
        &self,
        instr: &Instruction,
        regs: &mut RegisterReferenceSet,
    ) -> CallInputs {
        let inputs = self.infer_inputs(instr);
        match &inputs {
            CallInputs::Inferred(found) => {
                for reg in found {
                    log::debug!("    found call input register '{reg}'");
                    regs.add_references(reg);
                }
            }
            CallInputs::Unavailable(reason) => {
                log::debug!("no call inputs inferred for {}: {reason}", instr.addr());
            }
        }
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use df_disasm::program::Program;

    const LISTING: &str = "
arch generic 4
reg r1 r1l
reg r2
reg r3
return r1
mem 0x3000 0x4000
mem 0x3004 0x5000

function main
  0x100 4 call #0x4000
  0x104 4 call <dword [0x3000]
  0x108 4 call <dword [0x3004]
  0x10c 4 call <dword [0x3008]
  0x110 4 call <r2
  0x114 4 call <[r2+0x10]
  0x118 4 ret

function callee
  0x4000 2 push <r3 !live r1:0, r2:4, r3:0, stack:0
  0x4002 1 ret
";

    fn call_at(program: &Program, addr: u64) -> Instruction {
        program
            .disassemble_instructions(Addr(addr))
            .unwrap()
            .next()
            .unwrap()
    }

    #[test]
    fn direct_and_indirect_targets() {
        let program: Program = LISTING.parse().unwrap();
        let analyzer = CallAnalyzer::new(&program, PointerWidth::Bits32);

        assert_eq!(
            analyzer.resolve_target(&call_at(&program, 0x100)),
            CallTarget::Direct(Addr(0x4000))
        );
        assert_eq!(
            analyzer.resolve_target(&call_at(&program, 0x104)),
            CallTarget::Indirect {
                table: Addr(0x3000),
                target: Addr(0x4000)
            }
        );
        assert!(matches!(
            analyzer.resolve_target(&call_at(&program, 0x10c)),
            CallTarget::Unresolved(_)
        ));
        assert!(matches!(
            analyzer.resolve_target(&call_at(&program, 0x110)),
            CallTarget::Unresolved(_)
        ));
        assert!(matches!(
            analyzer.resolve_target(&call_at(&program, 0x114)),
            CallTarget::Unresolved(_)
        ));
    }

    #[test]
    fn inputs_from_callee_entry() {
        let program: Program = LISTING.parse().unwrap();
        let analyzer = CallAnalyzer::new(&program, PointerWidth::Bits32);
        let regs = program.arch().registers();

        let mut live = RegisterReferenceSet::new();
        let inputs = analyzer.add_call_input_registers(&call_at(&program, 0x104), &mut live);
        let names: Vec<&str> = match &inputs {
            CallInputs::Inferred(found) => found.iter().map(Register::name).collect(),
            CallInputs::Unavailable(reason) => panic!("no inputs: {reason}"),
        };
        assert_eq!(names, vec!["r1", "r3"]);
        assert!(live.has_reference(regs.by_name("r1l").unwrap()));
        assert!(!live.has_reference(regs.by_name("r2").unwrap()));
    }

    #[test]
    fn no_inference_possible() {
        let program: Program = LISTING.parse().unwrap();
        let analyzer = CallAnalyzer::new(&program, PointerWidth::Bits32);

        let mut live = RegisterReferenceSet::new();
        // table cell points to undecodable code
        assert!(matches!(
            analyzer.add_call_input_registers(&call_at(&program, 0x108), &mut live),
            CallInputs::Unavailable(_)
        ));
        // unreadable table cell
        assert!(matches!(
            analyzer.infer_inputs(&call_at(&program, 0x10c)),
            CallInputs::Unavailable(_)
        ));
        assert!(live.is_empty());
    }
}
