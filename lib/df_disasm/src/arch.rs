//! Architecture descriptions: register file, calling convention and pointer
//! width.

use crate::errors::{DisasmError, DisasmResult};
use crate::registers::{RegId, Register, RegisterFile};
use lazy_static::lazy_static;
use std::collections::BTreeSet;
use std::fmt;

/// Width of a pointer in target memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl fmt::Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bits32 => write!(f, "32-bit"),
            Self::Bits64 => write!(f, "64-bit"),
        }
    }
}

impl PointerWidth {
    /// Returns the pointer width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// Parses a pointer width given in bytes.
    ///
    /// # Errors
    ///
    /// Only 4 and 8 bytes wide pointers are supported.
    pub fn from_bytes(bytes: u64) -> DisasmResult<Self> {
        match bytes {
            4 => Ok(Self::Bits32),
            8 => Ok(Self::Bits64),
            _ => Err(DisasmError::Internal(format!(
                "unsupported pointer width: {bytes} bytes"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Arch {
    name: String,
    registers: RegisterFile,
    preserved: BTreeSet<RegId>,
    return_register: Option<RegId>,
    pointer_width: PointerWidth,
}

lazy_static! {
    static ref X64: DisasmResult<Arch> = build_x64();
}

impl Arch {
    /// Creates an architecture without any register.
    #[must_use]
    pub fn generic(pointer_width: PointerWidth) -> Self {
        Self {
            name: "generic".to_string(),
            registers: RegisterFile::new(),
            preserved: BTreeSet::new(),
            return_register: None,
            pointer_width,
        }
    }

    /// Returns the x86-64 architecture, with the Windows x64 calling
    /// convention.
    ///
    /// # Errors
    ///
    /// Fails if the static register table is inconsistent.
    pub fn x64() -> DisasmResult<Self> {
        X64.as_ref()
            .cloned()
            .map_err(|err| DisasmError::Internal(format!("x64 description: {err}")))
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    #[inline]
    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    #[inline]
    #[must_use]
    pub const fn pointer_width(&self) -> PointerWidth {
        self.pointer_width
    }

    /// Returns the register holding call results, if the calling convention
    /// has one.
    #[must_use]
    pub fn return_register(&self) -> Option<&Register> {
        self.return_register.and_then(|id| self.registers.get(id))
    }

    /// Returns the set of registers (sub-registers included) a callee must
    /// preserve.
    #[inline]
    #[must_use]
    pub const fn preserved(&self) -> &BTreeSet<RegId> {
        &self.preserved
    }

    /// Marks the named register and its sub-registers as preserved across
    /// calls.
    ///
    /// # Errors
    ///
    /// The register must be defined.
    pub fn preserve(&mut self, name: &str) -> DisasmResult<()> {
        let reg = self.registers.by_name(name)?;
        self.preserved.insert(reg.id());
        self.preserved.extend(reg.sub_registers());
        Ok(())
    }

    /// Sets the call return register.
    ///
    /// # Errors
    ///
    /// The register must be defined.
    pub fn set_return_register(&mut self, name: &str) -> DisasmResult<()> {
        self.return_register = Some(self.registers.by_name(name)?.id());
        Ok(())
    }
}

fn build_x64() -> DisasmResult<Arch> {
    let mut arch = Arch::generic(PointerWidth::Bits64);
    arch.name = "x64".to_string();

    let regs = &mut arch.registers;
    // legacy registers, narrowest first so that sub-registers are known
    for (r, l, h) in [("a", "al", "ah"), ("b", "bl", "bh"), ("c", "cl", "ch"), ("d", "dl", "dh")] {
        let x = format!("{r}x");
        let e = format!("e{r}x");
        let q = format!("r{r}x");
        regs.define(&x, &[l, h])?;
        regs.define(&e, &[x.as_str(), l, h])?;
        regs.define(&q, &[e.as_str(), x.as_str(), l, h])?;
    }
    for (r, l) in [("si", "sil"), ("di", "dil"), ("bp", "bpl"), ("sp", "spl")] {
        let e = format!("e{r}");
        let q = format!("r{r}");
        regs.define(r, &[l])?;
        regs.define(&e, &[r, l])?;
        regs.define(&q, &[e.as_str(), r, l])?;
    }
    for n in 8..16 {
        let q = format!("r{n}");
        let d = format!("r{n}d");
        let w = format!("r{n}w");
        let b = format!("r{n}b");
        regs.define(&w, &[b.as_str()])?;
        regs.define(&d, &[w.as_str(), b.as_str()])?;
        regs.define(&q, &[d.as_str(), w.as_str(), b.as_str()])?;
    }
    regs.define("rip", &["eip"])?;
    regs.define("rflags", &[])?;

    for name in ["rbx", "rbp", "rdi", "rsi", "rsp", "r12", "r13", "r14", "r15"] {
        arch.preserve(name)?;
    }
    arch.set_return_register("rax")?;

    Ok(arch)
}
