//! Data flow trace of an instruction source operands.

use crate::errors::{AnalysisError, AnalysisResult};
use crate::lifetimes::LifetimeReformer;
use crate::locate::BlockLocator;
use crate::memory::MemoryReferenceSet;
use crate::registers::RegisterReferenceSet;
use crate::scanner::BackwardScanner;
use df_disasm::arch::PointerWidth;
use df_disasm::function::{BlockId, Function};
use df_disasm::instrs::Instruction;
use df_disasm::operands::Operand;
use df_disasm::{Addr, Disassembler, Memory};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceOptions {
    /// Width of the pointers read when resolving indirect calls. Defaults to
    /// the disassembler architecture one.
    pub pointer_width: Option<PointerWidth>,
}

/// Instructions of a function whose results flow into the source operands
/// of a target instruction.
pub struct DataFlowTrace<'a, H> {
    host: &'a H,
    function: Function,
    addr: Addr,
    block: BlockId,
    target: Instruction,
    options: TraceOptions,
}

impl<'a, H: Disassembler + Memory> DataFlowTrace<'a, H> {
    /// Binds a trace to the instruction at `addr` in `function`.
    ///
    /// # Errors
    ///
    /// The address must be the start of an instruction of the function.
    pub fn new(host: &'a H, function: Function, addr: Addr) -> AnalysisResult<Self> {
        let (block, target) = BlockLocator::new(&function).find_instruction(addr)?;
        let target = target.clone();
        Ok(Self {
            host,
            function,
            addr,
            block,
            target,
            options: TraceOptions::default(),
        })
    }

    #[must_use]
    pub fn with_options(mut self, options: TraceOptions) -> Self {
        self.options = options;
        self
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn function(&self) -> &Function {
        &self.function
    }

    /// The traced instruction.
    #[inline]
    #[must_use]
    pub const fn target(&self) -> &Instruction {
        &self.target
    }

    pub fn source_operands(&self) -> impl Iterator<Item = &Operand> {
        self.target().operands().filter(|op| op.is_input())
    }

    /// Returns the instruction at `addr` in the target basic block.
    ///
    /// # Errors
    ///
    /// Returns an [`AnalysisError::InstructionNotFound`] error for addresses
    /// out of the target block.
    pub fn value_at(&self, addr: Addr) -> AnalysisResult<&Instruction> {
        self.function
            .block(self.block)
            .instruction_at(addr)
            .map_err(|_| AnalysisError::InstructionNotFound(addr))
    }

    /// Starts a new walk of the data flow. The target instruction comes
    /// first, then matching instructions in backward order.
    #[must_use]
    pub fn iter(&self) -> DataFlowIter<'_, H> {
        let target = self.target();
        log::debug!("starting instruction: {target}");

        let mut regs = RegisterReferenceSet::new();
        let mut mems = MemoryReferenceSet::new();
        for operand in self.source_operands() {
            if operand.is_memory_reference() {
                mems.push(operand.clone());
            }
            for reg in operand.registers() {
                regs.add_references(reg);
            }
        }

        let pointer_width = self
            .options
            .pointer_width
            .unwrap_or_else(|| self.host.pointer_width());
        let reformer = LifetimeReformer::new(self.host, pointer_width);
        DataFlowIter {
            target: Some(target),
            scanner: BackwardScanner::new(
                &self.function,
                reformer,
                self.block,
                self.addr,
                true,
                regs,
                mems,
            ),
        }
    }

    /// Walks the whole data flow into a serializable summary.
    #[must_use]
    pub fn summarize(&self) -> TraceSummary<'_> {
        let mut iter = self.iter();
        let flow = iter.by_ref().collect();
        TraceSummary {
            address: self.addr,
            instruction: self.target(),
            source_operands: self.source_operands().collect(),
            flow,
            visited_blocks: iter.visited_blocks().clone(),
        }
    }
}

impl<'t, 'a, H: Disassembler + Memory> IntoIterator for &'t DataFlowTrace<'a, H> {
    type Item = &'t Instruction;
    type IntoIter = DataFlowIter<'t, H>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, H: Disassembler + Memory> fmt::Display for DataFlowTrace<'a, H> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Traced data flow of {}: {} for source operands {{ ",
            self.addr,
            self.target()
        )?;
        for (i, operand) in self.source_operands().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{operand}")?;
        }
        write!(f, " }}")
    }
}

/// Lazy walk of a data flow. Work is only done when the next instruction
/// is requested.
pub struct DataFlowIter<'t, H> {
    target: Option<&'t Instruction>,
    scanner: BackwardScanner<'t, H>,
}

impl<'t, H: Disassembler + Memory> DataFlowIter<'t, H> {
    #[must_use]
    pub const fn visited_blocks(&self) -> &BTreeSet<Addr> {
        self.scanner.visited_blocks()
    }

    /// Number of blocks scanned so far. A block is never scanned twice.
    #[must_use]
    pub const fn scanned_blocks(&self) -> usize {
        self.scanner.scans()
    }
}

impl<'t, H: Disassembler + Memory> Iterator for DataFlowIter<'t, H> {
    type Item = &'t Instruction;

    fn next(&mut self) -> Option<Self::Item> {
        self.target.take().or_else(|| self.scanner.next())
    }
}

#[derive(Debug, Serialize)]
pub struct TraceSummary<'t> {
    pub address: Addr,
    pub instruction: &'t Instruction,
    pub source_operands: Vec<&'t Operand>,
    pub flow: Vec<&'t Instruction>,
    pub visited_blocks: BTreeSet<Addr>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use df_disasm::errors::DisasmResult;
    use df_disasm::function::Branch;
    use df_disasm::operands::Operand;
    use df_disasm::program::Program;
    use df_disasm::registers::{RegId, Register};
    use std::cell::Cell;

    /// Counts the linear disassemblies requested to the wrapped program.
    struct CountingHost<'p> {
        program: &'p Program,
        disassemblies: Cell<usize>,
    }

    impl Disassembler for CountingHost<'_> {
        fn disassemble_function(&self, name: &str) -> DisasmResult<Function> {
            self.program.disassemble_function(name)
        }

        fn disassemble_instructions(
            &self,
            addr: Addr,
        ) -> DisasmResult<Box<dyn Iterator<Item = Instruction> + '_>> {
            self.disassemblies.set(self.disassemblies.get() + 1);
            self.program.disassemble_instructions(addr)
        }

        fn register(&self, id: RegId) -> Option<&Register> {
            self.program.register(id)
        }

        fn pointer_width(&self) -> PointerWidth {
            self.program.pointer_width()
        }
    }

    impl Memory for CountingHost<'_> {
        fn read_pointer(&self, addr: Addr, width: PointerWidth) -> DisasmResult<u64> {
            self.program.read_pointer(addr, width)
        }
    }

    const LISTING: &str = "
arch generic 8
reg r1 r1l
reg r2 r2l
reg r3
reg r4
preserve r4
return r2
mem 0x3000 0x100000400

function straight
  0x0e8 8 mov >r3, #1
  0x0f0 8 mov >r1, #2
  0x0f8 8 mov >r2, #3
  0x100 8 add <>r1, <[r2+0]
  0x108 8 ret

function clobber
  0x1f0 8 mov >r1, #1
  0x1f8 8 call #0x400
  0x200 8 mov >r3, <r1
  0x208 8 ret

function retval
  0x2f8 8 mov >r3, #7
  0x300 8 mov >r2, #5
  0x308 8 call #0x400
  0x310 8 mov >r1, <r2
  0x318 8 ret

function callee
  0x400 8 ret !live r3:0, r1:8

function preserved
  0x500 8 mov >r4, #1
  0x508 8 call #0x400
  0x510 8 mov >r1, <r4
  0x518 8 ret

function parent
  0x600 8 mov >r2l, #1
  0x608 8 mov >r1l, #1
  0x610 8 mov >r3, <r1
  0x618 8 ret

function sub
  0x700 8 mov >r1, #1
  0x708 8 mov >r3, <r1l
  0x710 8 ret

function memory
  0x800 8 mov >qword [r3+0x8], <r2
  0x808 8 mov >dword [r3+0xc], <r4
  0x810 8 mov >r1, <qword [r3+0x8]
  0x818 8 ret

function cycle
  0x900 8 mov >r1, #0
  0x908 8 add <>r1, <r2
  0x910 8 jne #0x928
  0x918 8 sub <>r2, #1
  0x920 8 jmp #0x908
  0x928 8 mov >r3, <r1
  0x930 8 ret

function join
  0xa00 8 mov >r2, #0
  0xa08 8 je #0xa20
  0xa10 8 mov >r1, #1
  0xa18 8 jmp #0xa28
  0xa20 8 mov >r1, #2
  0xa28 8 add <>r1, <r2
  0xa30 8 ret

function indirect
  0xd00 8 mov >r3, #1
  0xd08 8 mov >r2, #0
  0xd10 8 call <[0x3000]
  0xd18 8 mov >r1, <r2
  0xd20 8 ret

function unresolved
  0xe00 8 mov >r3, #1
  0xe08 8 call <r3
  0xe10 8 mov >r1, <r2
  0xe18 8 ret
";

    fn program() -> Program {
        LISTING.parse().unwrap()
    }

    fn trace<'a>(program: &'a Program, function: &str, addr: u64) -> DataFlowTrace<'a, Program> {
        let function = program.disassemble_function(function).unwrap();
        DataFlowTrace::new(program, function, Addr(addr)).unwrap()
    }

    fn addrs<H: Disassembler + Memory>(trace: &DataFlowTrace<H>) -> Vec<u64> {
        trace.iter().map(|instr| instr.addr().value()).collect()
    }

    #[test]
    fn straight_line_block() {
        let program = program();
        let trace = trace(&program, "straight", 0x100);
        assert_eq!(addrs(&trace), vec![0x100, 0xf8, 0xf0]);
    }

    #[test]
    fn target_comes_first() {
        let program = program();
        for (function, addr) in [("straight", 0x0e8), ("join", 0xa28), ("cycle", 0x900)] {
            let trace = trace(&program, function, addr);
            assert_eq!(trace.iter().next().unwrap().addr(), Addr(addr));
        }
    }

    #[test]
    fn unpreserved_register_killed_by_call() {
        let program = program();
        let trace = trace(&program, "clobber", 0x200);
        assert_eq!(addrs(&trace), vec![0x200]);
    }

    #[test]
    fn call_return_register_and_inputs() {
        let program = program();
        let trace = trace(&program, "retval", 0x310);
        assert_eq!(addrs(&trace), vec![0x310, 0x308, 0x2f8]);
    }

    #[test]
    fn preserved_register_crosses_call() {
        let program = program();
        let trace = trace(&program, "preserved", 0x510);
        assert_eq!(addrs(&trace), vec![0x510, 0x500]);
    }

    #[test]
    fn sub_register_aliasing() {
        let program = program();
        assert_eq!(addrs(&trace(&program, "parent", 0x610)), vec![0x610, 0x608]);
        assert_eq!(addrs(&trace(&program, "sub", 0x708)), vec![0x708, 0x700]);
    }

    #[test]
    fn memory_overlap() {
        let program = program();
        let trace = trace(&program, "memory", 0x810);
        assert_eq!(addrs(&trace), vec![0x810, 0x808]);
    }

    #[test]
    fn cycle_visited_once() {
        let program = program();
        let trace = trace(&program, "cycle", 0x928);
        assert_eq!(trace.function().nb_blocks(), 4);

        let mut iter = trace.iter();
        let found: Vec<u64> = iter.by_ref().map(|i| i.addr().value()).collect();
        assert_eq!(found, vec![0x928, 0x908, 0x900, 0x918]);
        let visited: Vec<u64> = iter.visited_blocks().iter().map(|a| a.value()).collect();
        assert_eq!(visited, vec![0x900, 0x908, 0x918, 0x928]);
        // the loop back edge into 0x908 is followed but not scanned again
        assert_eq!(iter.scanned_blocks(), 4);
    }

    #[test]
    fn predecessors_explored_in_order_with_own_sets() {
        let program = program();
        let trace = trace(&program, "join", 0xa28);
        // the write to r1 on the first path does not hide the one on the
        // second path
        assert_eq!(addrs(&trace), vec![0xa28, 0xa10, 0xa00, 0xa20]);
    }

    #[test]
    fn mid_block_flow_source() {
        let program = program();
        let regs = program.arch().registers();
        let r1 = regs.by_name("r1").unwrap().clone();
        let r3 = regs.by_name("r3").unwrap().clone();

        let mut function = Function::new("manual");
        let pred = function
            .add_block(vec![
                Instruction::new(
                    Addr(0xb00),
                    8,
                    "mov",
                    vec![Operand::register(r1.clone(), false, true), Operand::immediate(1)],
                ),
                Instruction::new(
                    Addr(0xb08),
                    8,
                    "mov",
                    vec![Operand::register(r1.clone(), false, true), Operand::immediate(2)],
                ),
            ])
            .unwrap();
        let target = function
            .add_block(vec![Instruction::new(
                Addr(0xc00),
                8,
                "mov",
                vec![Operand::register(r3, false, true), Operand::register(r1, true, false)],
            )])
            .unwrap();
        function
            .add_flow(pred, Addr(0xb00), target, Branch::Jmp)
            .unwrap();

        let trace = DataFlowTrace::new(&program, function, Addr(0xc00)).unwrap();
        assert_eq!(addrs(&trace), vec![0xc00, 0xb00]);
    }

    #[test]
    fn indirect_call_pointer_width() {
        let program = program();
        let trace = trace(&program, "indirect", 0xd18);
        assert_eq!(addrs(&trace), vec![0xd18, 0xd10]);

        let trace = trace.with_options(TraceOptions {
            pointer_width: Some(PointerWidth::Bits32),
        });
        assert_eq!(addrs(&trace), vec![0xd18, 0xd10, 0xd00]);
    }

    #[test]
    fn unresolved_call_target() {
        let program = program();
        let trace = trace(&program, "unresolved", 0xe10);
        assert_eq!(addrs(&trace), vec![0xe10, 0xe08, 0xe00]);
    }

    #[test]
    fn idempotence() {
        let program = program();
        let first = trace(&program, "join", 0xa28);
        let second = trace(&program, "join", 0xa28);
        assert_eq!(addrs(&first), addrs(&second));
        assert_eq!(addrs(&first), addrs(&first));
    }

    #[test]
    fn lazy_walk() {
        let program = program();
        let trace = trace(&program, "join", 0xa28);
        let mut iter = trace.iter();
        assert!(iter.next().is_some());
        assert!(iter.visited_blocks().is_empty());
        assert!(iter.next().is_some());
        assert_eq!(iter.visited_blocks().len(), 2);
    }

    #[test]
    fn call_reformed_only_when_resumed() {
        let program = program();
        let host = CountingHost {
            program: &program,
            disassemblies: Cell::new(0),
        };
        let function = program.disassemble_function("retval").unwrap();
        let trace = DataFlowTrace::new(&host, function, Addr(0x310)).unwrap();

        let mut iter = trace.iter();
        let taken: Vec<u64> = iter.by_ref().take(2).map(|i| i.addr().value()).collect();
        assert_eq!(taken, vec![0x310, 0x308]);
        assert_eq!(host.disassemblies.get(), 0);

        let rest: Vec<u64> = iter.map(|i| i.addr().value()).collect();
        assert_eq!(rest, vec![0x2f8]);
        assert_eq!(host.disassemblies.get(), 1);
    }

    #[test]
    fn display_and_lookup() {
        let program = program();
        let trace = trace(&program, "straight", 0x100);
        assert_eq!(
            trace.to_string(),
            "Traced data flow of 0x100: add r1, qword [r2] for source operands { r1, qword [r2] }"
        );
        assert_eq!(trace.source_operands().count(), 2);
        assert_eq!(trace.value_at(Addr(0xf0)).unwrap().mnemonic(), "mov");
        assert!(trace.value_at(Addr(0x104)).is_err());

        let trace = self::trace(&program, "join", 0xa28);
        assert!(matches!(
            trace.value_at(Addr(0xa10)),
            Err(AnalysisError::InstructionNotFound(Addr(0xa10)))
        ));
    }

    #[test]
    fn target_must_be_an_instruction() {
        let program = program();
        let function = program.disassemble_function("straight").unwrap();
        assert!(matches!(
            DataFlowTrace::new(&program, function.clone(), Addr(0x104)),
            Err(AnalysisError::InstructionNotFound(Addr(0x104)))
        ));
        assert!(matches!(
            DataFlowTrace::new(&program, function, Addr(0x2000)),
            Err(AnalysisError::BlockNotFound(Addr(0x2000)))
        ));
    }

    #[test]
    fn summary() {
        let program = program();
        let trace = trace(&program, "straight", 0x100);
        let summary = trace.summarize();
        assert_eq!(summary.address, Addr(0x100));
        assert_eq!(summary.flow.len(), 3);
        assert_eq!(summary.visited_blocks.len(), 1);
    }
}
