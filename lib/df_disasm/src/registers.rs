//! Types definitions to address machine registers.
//!
//! A [register](Register) is identified by a small integer ([`RegId`]) and
//! knows the identifiers of its direct sub-registers (for instance `rax`
//! decomposes into `eax`, `ax`, `al` and `ah`). Aliasing is only one level
//! deep: a register file lists, for every register, the registers occupying
//! a part of it.

use crate::errors::{DisasmError, DisasmResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// The register identifier type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RegId(u16);

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u16> for RegId {
    fn from(r: u16) -> Self {
        Self(r)
    }
}

impl From<RegId> for u16 {
    fn from(r: RegId) -> Self {
        r.0
    }
}

impl RegId {
    /// Returns the wrapped register number.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u16 {
        self.0
    }
}

/// A register descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Register {
    id: RegId,
    name: String,
    #[serde(skip)]
    sub_registers: Vec<RegId>,
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Register {
    #[must_use]
    pub fn new(id: RegId, name: &str, sub_registers: Vec<RegId>) -> Self {
        Self {
            id,
            name: name.to_string(),
            sub_registers,
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> RegId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the identifiers of the direct sub-registers.
    #[inline]
    pub fn sub_registers(&self) -> impl Iterator<Item = RegId> + '_ {
        self.sub_registers.iter().copied()
    }

    /// Checks if the given register identifier is this register or one of
    /// its direct sub-registers.
    #[must_use]
    pub fn covers(&self, id: RegId) -> bool {
        self.id == id || self.sub_registers.contains(&id)
    }
}

/// The set of registers of an architecture.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    registers: BTreeMap<RegId, Register>,
    names: BTreeMap<String, RegId>,
}

impl RegisterFile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a new register along with its direct sub-registers.
    ///
    /// Sub-registers that are not yet known are defined on the fly (without
    /// sub-registers of their own), so that narrow registers can be declared
    /// through their parent.
    ///
    /// # Errors
    ///
    /// Returns an error if the register name is already defined with
    /// sub-registers.
    pub fn define(&mut self, name: &str, sub_names: &[&str]) -> DisasmResult<RegId> {
        let mut subs = Vec::with_capacity(sub_names.len());
        for sub in sub_names {
            let id = match self.names.get(&sub.to_ascii_lowercase()) {
                Some(id) => *id,
                None => self.insert(sub, Vec::new())?,
            };
            subs.push(id);
        }

        if let Some(id) = self.names.get(&name.to_ascii_lowercase()).copied() {
            let reg = self
                .registers
                .get_mut(&id)
                .ok_or_else(|| DisasmError::Internal(format!("dangling register {name}")))?;
            if !reg.sub_registers.is_empty() && !subs.is_empty() {
                return Err(DisasmError::Internal(format!(
                    "register {name} defined twice"
                )));
            }
            reg.sub_registers = subs;
            return Ok(id);
        }

        self.insert(name, subs)
    }

    fn insert(&mut self, name: &str, subs: Vec<RegId>) -> DisasmResult<RegId> {
        let id = u16::try_from(self.registers.len())
            .map(RegId)
            .map_err(|_| DisasmError::Internal(format!("too many registers to define {name}")))?;
        self.registers.insert(id, Register::new(id, name, subs));
        self.names.insert(name.to_ascii_lowercase(), id);
        Ok(id)
    }

    #[must_use]
    pub fn get(&self, id: RegId) -> Option<&Register> {
        self.registers.get(&id)
    }

    /// Returns the register of the given name.
    ///
    /// # Errors
    ///
    /// Returns an [`DisasmError::UnknownRegister`] error if no such register
    /// is defined.
    pub fn by_name(&self, name: &str) -> DisasmResult<&Register> {
        self.names
            .get(&name.to_ascii_lowercase())
            .and_then(|id| self.registers.get(id))
            .ok_or_else(|| DisasmError::UnknownRegister(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_ids_exhausted() {
        let mut file = RegisterFile::new();
        for n in 0..=u16::MAX {
            file.define(&format!("r{n}"), &[]).unwrap();
        }
        assert_eq!(file.len(), 65536);
        assert!(matches!(
            file.define("overflow", &[]),
            Err(DisasmError::Internal(_))
        ));
        assert!(file.by_name("overflow").is_err());
        assert!(matches!(
            file.define("wide", &["narrow"]),
            Err(DisasmError::Internal(_))
        ));
    }

    #[test]
    fn define_with_subregisters() {
        let mut file = RegisterFile::new();
        let rax = file.define("rax", &["eax", "ax", "al"]).unwrap();
        let eax = file.by_name("eax").unwrap().id();
        assert!(file.get(rax).unwrap().covers(eax));
        assert!(!file.get(eax).unwrap().covers(rax));
        assert_eq!(file.len(), 4);
    }

    #[test]
    fn redefine_leaf_register() {
        let mut file = RegisterFile::new();
        file.define("rax", &["eax"]).unwrap();
        let eax = file.define("eax", &["ax"]).unwrap();
        assert_eq!(file.get(eax).unwrap().sub_registers().count(), 1);
        assert!(file.define("rax", &["ax"]).is_err());
    }

    #[test]
    fn unknown_register() {
        let file = RegisterFile::new();
        assert!(matches!(
            file.by_name("xmm0"),
            Err(DisasmError::UnknownRegister(_))
        ));
    }
}
