//! In-memory program loaded from a listing.

use crate::arch::{Arch, PointerWidth};
use crate::errors::{DisasmError, DisasmResult};
use crate::function::Function;
use crate::instrs::Instruction;
use crate::listing::parse_listing;
use crate::registers::{RegId, Register};
use crate::{Addr, Disassembler, Memory, Symbols, ThreadContext};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// A loaded program: architecture, functions code, memory cells and the
/// state of the thread being inspected.
#[derive(Debug)]
pub struct Program {
    arch: Arch,
    module: String,
    functions: BTreeMap<String, Vec<Addr>>,
    code: BTreeMap<Addr, Instruction>,
    memory: BTreeMap<Addr, u64>,
    ip: Option<Addr>,
    frame: Option<String>,
}

impl FromStr for Program {
    type Err = DisasmError;

    fn from_str(s: &str) -> DisasmResult<Self> {
        parse_listing(s)
    }
}

impl Program {
    #[must_use]
    pub fn new(arch: Arch, module: &str) -> Self {
        Self {
            arch,
            module: module.to_string(),
            functions: BTreeMap::new(),
            code: BTreeMap::new(),
            memory: BTreeMap::new(),
            ip: None,
            frame: None,
        }
    }

    /// Loads a listing file.
    ///
    /// # Errors
    ///
    /// I/O and parsing errors.
    pub fn open<P: AsRef<Path>>(path: P) -> DisasmResult<Self> {
        let text = fs::read_to_string(path)?;
        parse_listing(&text)
    }

    #[inline]
    #[must_use]
    pub const fn arch(&self) -> &Arch {
        &self.arch
    }

    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Iterates over function names, in lexicographic order.
    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Registers a function and its code.
    ///
    /// # Errors
    ///
    /// The function must not be empty, and its instructions must not
    /// overlap already loaded code.
    pub fn add_function(&mut self, name: &str, instrs: Vec<Instruction>) -> DisasmResult<()> {
        if self.functions.contains_key(name) {
            return Err(DisasmError::Internal(format!(
                "function {name} defined twice"
            )));
        }
        if instrs.is_empty() {
            return Err(DisasmError::UnknownFunction(name.to_string()));
        }
        let mut addrs = Vec::with_capacity(instrs.len());
        for instr in instrs {
            if self.code.contains_key(&instr.addr()) {
                return Err(DisasmError::DuplicatedInstruction(instr.addr()));
            }
            addrs.push(instr.addr());
            self.code.insert(instr.addr(), instr);
        }
        log::trace!("function {name} loaded ({} instructions)", addrs.len());
        self.functions.insert(name.to_string(), addrs);
        Ok(())
    }

    pub fn write_pointer(&mut self, addr: Addr, value: u64) {
        self.memory.insert(addr, value);
    }

    pub fn set_instruction_pointer(&mut self, addr: Addr) {
        self.ip = Some(addr);
    }

    pub fn set_top_frame(&mut self, frame: &str) {
        self.frame = Some(frame.to_string());
    }

    fn function_code(&self, name: &str) -> Option<impl Iterator<Item = &Instruction>> {
        self.functions
            .get(name)
            .map(|addrs| addrs.iter().filter_map(|addr| self.code.get(addr)))
    }
}

impl Disassembler for Program {
    fn disassemble_function(&self, name: &str) -> DisasmResult<Function> {
        let instrs = self
            .function_code(name)
            .ok_or_else(|| DisasmError::UnknownFunction(name.to_string()))?
            .cloned()
            .collect();
        Function::build(name, instrs)
    }

    fn disassemble_instructions(
        &self,
        addr: Addr,
    ) -> DisasmResult<Box<dyn Iterator<Item = Instruction> + '_>> {
        if !self.code.contains_key(&addr) {
            return Err(DisasmError::NoInstructions(addr));
        }
        let mut expected = addr;
        Ok(Box::new(
            self.code
                .range(addr..)
                .map(|(_, instr)| instr)
                .take_while(move |instr| {
                    let contiguous = instr.addr() == expected;
                    expected = instr.next_addr();
                    contiguous
                })
                .cloned(),
        ))
    }

    fn register(&self, id: RegId) -> Option<&Register> {
        self.arch.registers().get(id)
    }

    fn pointer_width(&self) -> PointerWidth {
        self.arch.pointer_width()
    }
}

impl Memory for Program {
    fn read_pointer(&self, addr: Addr, width: PointerWidth) -> DisasmResult<u64> {
        let value = self
            .memory
            .get(&addr)
            .copied()
            .ok_or(DisasmError::UnreadableMemory(addr))?;
        Ok(match width {
            PointerWidth::Bits32 => value & 0xffff_ffff,
            PointerWidth::Bits64 => value,
        })
    }
}

impl Symbols for Program {
    fn function_containing(&self, addr: Addr) -> Option<String> {
        self.functions.iter().find_map(|(name, addrs)| {
            addrs
                .iter()
                .filter_map(|a| self.code.get(a))
                .any(|instr| instr.addr() <= addr && addr < instr.next_addr())
                .then(|| name.clone())
        })
    }

    fn module_symbol(&self, module: &str, name: &str) -> Option<String> {
        (module.eq_ignore_ascii_case(&self.module) && self.functions.contains_key(name))
            .then(|| name.to_string())
    }
}

impl ThreadContext for Program {
    fn instruction_pointer(&self) -> Option<Addr> {
        self.ip
    }

    fn top_frame(&self) -> Option<String> {
        self.frame.clone()
    }
}
